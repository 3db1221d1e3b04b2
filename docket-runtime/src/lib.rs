//! Docket Runtime - process plumbing for the Docket server.
//!
//! This crate provides the containers every server operation hangs off:
//!
//! - [`ServiceContext`]: one per running service, owns process-wide state
//! - [`Client`]: one per logical connection, owns the client lock
//! - [`OperationContext`]: one per in-flight operation, owns interrupt
//!   state and the session/transaction identity the operation carries
//! - [`Decorations`]: typed per-container state registry, so subsystems
//!   can attach their own state to a context without this crate knowing
//!   about them
//!
//! # Locking discipline
//!
//! The client lock is the outermost lock in the server: code that holds a
//! subsystem mutex (for example the session catalog mutex) may acquire a
//! client lock, so no code path may acquire a subsystem mutex while
//! holding the client lock and then wait. See [`Client`] for the rules.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod context;
mod decoration;
mod error;
mod interrupt;

pub use context::{Client, ClientInner, OperationContext, ReplicationMode, ServiceContext};
pub use decoration::Decorations;
pub use error::{RuntimeError, RuntimeResult};
pub use interrupt::InterruptReason;
