//! Snapshot leases over a domain.
//!
//! A [`State`] is a lease: while one is held, changes from the change source
//! are queued instead of applied. Releasing the last lease replays the queue
//! in receipt order.

mod lease;
mod snapshot;

pub(crate) use lease::LeaseBook;
pub use snapshot::{ReleaseSummary, State};
