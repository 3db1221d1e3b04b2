//! Transaction-aware shard fan-out.
//!
//! The cluster already has a scatter-gather sender that dispatches a
//! batch of per-shard requests and yields responses as they arrive. When
//! the operation is part of a multi-statement transaction, every
//! outgoing request additionally needs the transaction fields its target
//! shard expects. [`TransactionRequestsSender`] is the decorator that
//! adds them: it rewrites the batch through the operation's
//! [`TransactionRouter`] before dispatch and records delivery back into
//! the router as responses are consumed. It carries no retry logic of
//! its own; the underlying sender's behavior is preserved, and per-shard
//! errors are delivered through [`next`](TransactionRequestsSender::next).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use docket_core::{Limits, ShardId};
use docket_runtime::OperationContext;
use thiserror::Error;

use crate::router::{TransactionRouter, TxnFields};

/// How responses should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    /// Read from the shard's primary.
    Primary,
    /// Prefer the primary, fall back to a secondary.
    PrimaryPreferred,
    /// Read from any nearest member.
    Nearest,
}

/// Retry behavior of the underlying sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Never retry.
    NoRetry,
    /// Retry failures of idempotent commands.
    Idempotent,
    /// Retry only errors that are safe for non-idempotent commands.
    NotIdempotent,
}

/// One outgoing per-shard command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRequest {
    /// The target shard.
    pub shard_id: ShardId,
    /// The command body, opaque to the fan-out layer.
    pub body: Bytes,
    /// Transaction fields, stamped by the router when the operation is
    /// in a transaction.
    pub txn: Option<TxnFields>,
}

/// A failure delivered on one shard's response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No connection to the shard could be established.
    #[error("shard {shard_id} is unreachable")]
    ShardUnreachable {
        /// The unreachable shard.
        shard_id: ShardId,
    },

    /// The request timed out.
    #[error("request to shard {shard_id} timed out")]
    Timeout {
        /// The shard that did not answer.
        shard_id: ShardId,
    },

    /// The shard answered with an error.
    #[error("shard {shard_id} returned an error: {message}")]
    Remote {
        /// The answering shard.
        shard_id: ShardId,
        /// The shard's error message.
        message: String,
    },
}

/// One shard's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardResponse {
    /// The shard this response came from.
    pub shard_id: ShardId,
    /// The response body, or the per-shard failure.
    pub body: Result<Bytes, SendError>,
}

/// Scatter-gather sender for per-shard request batches.
///
/// Dispatching happens at construction; responses are pulled one at a
/// time. Implementations own their retry behavior.
#[async_trait]
pub trait ShardRequestSender: Send + Sized {
    /// Dispatches `requests` and returns the in-flight batch.
    fn dispatch(
        db_name: &str,
        requests: Vec<ShardRequest>,
        read_preference: ReadPreference,
        retry_policy: RetryPolicy,
    ) -> Self;

    /// Returns true once every response has been consumed.
    fn done(&self) -> bool;

    /// Consumes the next response, or `None` when the batch is done.
    async fn next(&mut self) -> Option<ShardResponse>;

    /// Gives up on retries; outstanding requests fail as they are.
    fn stop_retrying(&mut self);
}

/// Decorates a shard fan-out with transaction fields.
pub struct TransactionRequestsSender<S: ShardRequestSender> {
    op: Arc<OperationContext>,
    sender: S,
}

impl<S: ShardRequestSender> TransactionRequestsSender<S> {
    /// Rewrites `requests` through the operation's transaction router,
    /// if one is bound, and dispatches the batch.
    ///
    /// Operations outside a transaction dispatch the batch unchanged.
    #[must_use]
    pub fn dispatch(
        op: &Arc<OperationContext>,
        db_name: &str,
        requests: Vec<ShardRequest>,
        read_preference: ReadPreference,
        retry_policy: RetryPolicy,
    ) -> Self {
        assert!(
            requests.len() <= Limits::new().max_requests_per_batch as usize,
            "fan-out batch exceeds the request limit"
        );
        let requests = attach_txn_details(op, requests);
        Self {
            op: Arc::clone(op),
            sender: S::dispatch(db_name, requests, read_preference, retry_policy),
        }
    }

    /// Returns true once every response has been consumed.
    #[must_use]
    pub fn done(&self) -> bool {
        self.sender.done()
    }

    /// Consumes the next response and marks its participant as having
    /// received a command, so the response can update participant state.
    pub async fn next(&mut self) -> Option<ShardResponse> {
        let response = self.sender.next().await?;
        if let Some(router) = TransactionRouter::get(&self.op) {
            router.mark_command_sent(response.shard_id);
        }
        Some(response)
    }

    /// Forwards to the underlying sender.
    pub fn stop_retrying(&mut self) {
        self.sender.stop_retrying();
    }
}

/// Rewrites a batch with the transaction fields each participant
/// demands. Without a router the batch passes through untouched.
fn attach_txn_details(op: &OperationContext, requests: Vec<ShardRequest>) -> Vec<ShardRequest> {
    let Some(router) = TransactionRouter::get(op) else {
        return requests;
    };
    requests
        .into_iter()
        .map(|request| router.attach_txn_fields(request))
        .collect()
}
