//! Docket Routing - coordinator-side transaction fan-out.
//!
//! This crate runs on the node that coordinates a sharded operation. It
//! provides the per-operation [`TransactionRouter`], which tracks the
//! shards participating in a multi-statement transaction, and the
//! [`TransactionRequestsSender`], which decorates an outgoing request
//! batch with the transaction fields each participant requires before
//! handing it to the cluster's scatter-gather sender.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod router;
mod sender;

pub use router::{ReadConcernLevel, TransactionRouter, TxnFields};
pub use sender::{
    ReadPreference, RetryPolicy, SendError, ShardRequest, ShardRequestSender, ShardResponse,
    TransactionRequestsSender,
};
