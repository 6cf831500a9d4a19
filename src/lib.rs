//! # Meld
//!
//! A shared, continuously updated collection of identity-addressed records
//! ("subjects"), with snapshot leases that keep every consumer's view
//! consistent while changes keep arriving.
//!
//! ## Core Concepts
//!
//! - **Subjects**: One canonical, identity-stable instance per id, updated in
//!   place by change records and local writes
//! - **Domain**: Serializes change application and counts snapshot leases
//! - **State**: A snapshot lease; changes from the change source are deferred
//!   while any is held and replayed in receipt order after the last release
//! - **Streams**: All subjects of a kind, then every new one, with deletion
//!   notices, independent of the snapshot that opened them
//!
//! ## Example
//!
//! ```ignore
//! use meld::{ChangeRecord, Conference, Domain, DomainConfig, StreamEvent, SubjectKind};
//! use serde_json::json;
//!
//! let domain = Domain::load(DomainConfig::default(), vec![ChangeRecord::payload(
//!     "c1",
//!     SubjectKind::Conference,
//!     json!({"name": "Conf1", "location": "X", "start": "2022-01-01"}),
//! )])?;
//!
//! let state = domain.state();
//! let conferences = state.all::<Conference>();
//! let conf = state.get::<Conference>("c1")?;
//! state.release()?;
//!
//! domain.receive(ChangeRecord::deletion("c1", SubjectKind::Conference))?;
//! assert!(conf.deleted());
//! ```

pub mod domain;
pub mod error;
mod registry;
pub mod state;
pub mod subjects;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use domain::{Domain, DomainConfig};
pub use error::{DomainError, RejectedChange, Result};
pub use state::{ReleaseSummary, State};
pub use subjects::{
    Conference, DeletionWatch, Fields, Presence, Speaker, Subject, SubjectFields,
};
pub use subscriptions::{
    DropReason, StreamEvent, SubjectStream, SubscriptionConfig, SubscriptionId,
    SubscriptionManager,
};
pub use types::*;
