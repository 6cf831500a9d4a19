//! Subject streams.
//!
//! A stream of one kind first emits every live subject registered when it
//! was opened, then every subject of that kind that becomes live afterwards.
//! Each emitted subject is watched, and its deletion is forwarded on the same
//! stream exactly once.
//!
//! Streams support:
//! - Explicit cancellation (or drop)
//! - Bounded buffers with slow-subscriber dropping
//!
//! # Example
//!
//! ```ignore
//! let state = domain.state();
//! let stream = state.all::<Conference>();
//! drop(state); // the stream keeps going
//!
//! loop {
//!     match stream.recv() {
//!         Ok(StreamEvent::Added(conference)) => println!("{}", conference.id()),
//!         Ok(StreamEvent::Deleted(id)) => println!("{} removed", id),
//!         Ok(StreamEvent::Dropped { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{DropReason, StreamEvent, SubjectStream, SubscriptionConfig, SubscriptionId};
