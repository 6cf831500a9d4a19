//! Core types for the subject domain.

use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Key holding the subject identity in the wire form of a change record.
pub const ID_KEY: &str = "@id";

/// Key holding the subject kind tag.
pub const TYPE_KEY: &str = "@type";

/// Key marking a change record as a deletion.
pub const DELETED_KEY: &str = "@deleted";

/// Identity of a subject. Unique across every kind in a domain.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        SubjectId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectId({})", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        SubjectId(id.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        SubjectId(id)
    }
}

impl From<&SubjectId> for SubjectId {
    fn from(id: &SubjectId) -> Self {
        id.clone()
    }
}

/// The closed set of subject kinds a domain understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    Conference,
    Speaker,
}

impl SubjectKind {
    pub const ALL: [SubjectKind; 2] = [SubjectKind::Conference, SubjectKind::Speaker];

    /// Tag used in the `@type` key of a change record.
    pub fn tag(self) -> &'static str {
        match self {
            SubjectKind::Conference => "Conference",
            SubjectKind::Speaker => "Speaker",
        }
    }

    /// Parse a `@type` tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Body of a change record.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeBody {
    /// Full field payload. Identity keys are stripped.
    Payload(Map<String, Value>),
    /// Deletion marker.
    Deleted,
}

/// A unit of inbound mutation from the change source.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeRecord {
    pub id: SubjectId,
    pub kind: SubjectKind,
    pub body: ChangeBody,
}

impl ChangeRecord {
    /// Create a payload record from a JSON object of fields.
    ///
    /// Keys starting with `@` are dropped. Non-object values produce an
    /// empty payload, which fails decoding for any kind with required fields.
    pub fn payload(id: impl Into<SubjectId>, kind: SubjectKind, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => strip_identity(map),
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            kind,
            body: ChangeBody::Payload(fields),
        }
    }

    /// Create a deletion record.
    pub fn deletion(id: impl Into<SubjectId>, kind: SubjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            body: ChangeBody::Deleted,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.body, ChangeBody::Deleted)
    }

    /// Parse the wire form: `{"@id", "@type", ...fields}` or
    /// `{"@id", "@type", "@deleted": true}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::parse(value, None)
    }

    /// Parse a JSON array of records. Entries without `@type` take
    /// `default_kind`, which suits a data file holding a single kind.
    pub fn batch_from_slice(bytes: &[u8], default_kind: Option<SubjectKind>) -> Result<Vec<Self>> {
        let values: Vec<Value> = serde_json::from_slice(bytes)?;
        values
            .iter()
            .map(|value| Self::parse(value, default_kind))
            .collect()
    }

    fn parse(value: &Value, default_kind: Option<SubjectKind>) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| DomainError::InvalidRecord("expected a JSON object".to_string()))?;

        let id = obj
            .get(ID_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::InvalidRecord(format!("missing string {}", ID_KEY)))?;

        let kind = match obj.get(TYPE_KEY) {
            Some(Value::String(tag)) => SubjectKind::from_tag(tag).ok_or_else(|| {
                DomainError::InvalidRecord(format!("unknown subject kind {:?}", tag))
            })?,
            Some(other) => {
                return Err(DomainError::InvalidRecord(format!(
                    "{} must be a string, got {}",
                    TYPE_KEY, other
                )))
            }
            None => default_kind.ok_or_else(|| {
                DomainError::InvalidRecord(format!("record {} has no {}", id, TYPE_KEY))
            })?,
        };

        let deleted = match obj.get(DELETED_KEY) {
            None => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(DomainError::InvalidRecord(format!(
                    "{} must be a boolean, got {}",
                    DELETED_KEY, other
                )))
            }
        };

        if deleted {
            Ok(Self::deletion(id, kind))
        } else {
            Ok(Self {
                id: id.into(),
                kind,
                body: ChangeBody::Payload(strip_identity(obj.clone())),
            })
        }
    }

    /// Encode to the wire form.
    pub fn to_json(&self) -> Value {
        let mut obj = match &self.body {
            ChangeBody::Payload(fields) => fields.clone(),
            ChangeBody::Deleted => {
                let mut obj = Map::new();
                obj.insert(DELETED_KEY.to_string(), Value::Bool(true));
                obj
            }
        };
        obj.insert(ID_KEY.to_string(), Value::String(self.id.to_string()));
        obj.insert(TYPE_KEY.to_string(), Value::String(self.kind.tag().to_string()));
        Value::Object(obj)
    }
}

fn strip_identity(mut map: Map<String, Value>) -> Map<String, Value> {
    map.retain(|key, _| !key.starts_with('@'));
    map
}

/// Outcome of applying one change record to the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The subject became live for the first time.
    Created,
    /// A live subject was updated in place.
    Updated,
    /// A live subject was marked deleted.
    Deleted,
    /// A never-populated id was recorded as deleted.
    Tombstoned,
    /// The record had no effect (the subject was already deleted).
    Ignored,
}

/// What the domain did with an inbound change record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receipt {
    /// Applied immediately (no lease outstanding).
    Applied(Applied),
    /// Queued until the last lease is released.
    Buffered {
        /// 1-based position in the pending queue.
        position: usize,
    },
}

/// Identifier of a snapshot lease.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub u64);

impl fmt::Debug for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseId({})", self.0)
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domain statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainStats {
    pub live_subjects: usize,
    pub deleted_subjects: usize,
    pub absent_subjects: usize,
    pub lease_count: usize,
    pub pending_changes: usize,
    pub subscriptions: usize,
    pub changes_applied: u64,
    pub changes_ignored: u64,
    pub changes_rejected: u64,
}
