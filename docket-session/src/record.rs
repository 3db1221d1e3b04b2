//! Durable session record codec.
//!
//! Replication events deliver documents from the transaction table as
//! opaque bytes. Only the leading `_id` field matters to the catalog: it
//! names the session the record belongs to. The rest of the record (the
//! transaction state itself) is decoded elsewhere.
//!
//! # Wire Format
//!
//! - 1 byte: field tag, must be `TAG_SESSION_ID`
//! - 8 bytes: session ID (u64 big-endian)
//! - N bytes: remainder of the record, ignored here

use bytes::{Buf, BufMut, Bytes, BytesMut};
use docket_core::SessionId;

use crate::error::{SessionError, SessionResult};

/// Field tag of the leading session ID field.
const TAG_SESSION_ID: u8 = 0x01;

/// Extracts the session ID from a durable session record.
///
/// # Errors
///
/// Returns [`SessionError::MalformedSessionRecord`] if the record is
/// truncated or does not start with a session ID field.
pub fn decode_session_record(mut data: &[u8]) -> SessionResult<SessionId> {
    if data.remaining() < 1 + 8 {
        return Err(SessionError::MalformedSessionRecord {
            reason: "record too short for a session ID field",
        });
    }
    let tag = data.get_u8();
    if tag != TAG_SESSION_ID {
        return Err(SessionError::MalformedSessionRecord {
            reason: "record does not start with a session ID field",
        });
    }
    Ok(SessionId::new(data.get_u64()))
}

/// Encodes the leading session ID field of a session record.
///
/// The transaction state that follows is appended by the table writer.
#[must_use]
pub fn encode_session_record(session_id: SessionId) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 8);
    buf.put_u8(TAG_SESSION_ID);
    buf.put_u64(session_id.get());
    buf.freeze()
}
