//! Keel engine: converge a component's objects onto the cluster.
//!
//! [`ComponentHandler::create_or_update_or_delete`] walks the desired objects
//! in order, mutates and merges each against the live state, writes only what
//! changed, then removes obsolete objects and reports workloads to the status
//! tracker.

#![forbid(unsafe_code)]

mod error;
mod handler;

pub use error::ReconcileError;
pub use handler::{ComponentHandler, MAX_WRITE_ATTEMPTS};
