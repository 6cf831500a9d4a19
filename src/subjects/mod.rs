//! Subjects: identity-stable records updated in place.
//!
//! Each id has exactly one canonical instance per domain. Change records and
//! local writes both mutate that instance, so every holder of a handle sees
//! the same data without re-fetching.

mod cell;
mod kinds;

pub(crate) use cell::{DeletionWatcher, SubjectCell};
pub use cell::{DeletionWatch, Presence, Subject};
pub use kinds::{Conference, Fields, Speaker, SubjectFields};
