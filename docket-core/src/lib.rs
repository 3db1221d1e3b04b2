//! Docket Core - Strongly-typed identifiers and limits for Docket.
//!
//! This crate provides the identifier types shared by every Docket server
//! crate. It deliberately carries no I/O, no synchronization, and no
//! dependencies: sessions, transactions, shards, and operations are all
//! named here and nowhere else.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up `SessionId` with `ShardId`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod limits;
mod types;

pub use limits::Limits;
pub use types::{OperationId, SessionId, ShardId, StatementId, Timestamp, TxnNumber};
