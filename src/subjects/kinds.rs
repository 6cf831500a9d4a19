//! Field sets for each subject kind.
//!
//! Every kind has a static decoder and encoder. Decoding is strict: a payload
//! missing a required field, or carrying a malformed one, is rejected as a
//! whole.

use crate::error::{DomainError, Result};
use crate::types::{SubjectId, SubjectKind};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Typed field set of one subject kind.
pub trait SubjectFields:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The kind this field set belongs to.
    const KIND: SubjectKind;

    fn into_fields(self) -> Fields;

    fn from_fields(fields: &Fields) -> Option<&Self>;

    fn from_fields_mut(fields: &mut Fields) -> Option<&mut Self>;

    /// Cross-field checks run after every successful parse.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Parse every declared field of `payload`.
    fn decode(id: &SubjectId, payload: &Map<String, Value>) -> Result<Self> {
        let decode_error = |reason: String| DomainError::Decode {
            id: id.clone(),
            kind: Self::KIND,
            reason,
        };

        let fields: Self = serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|e| decode_error(e.to_string()))?;
        fields.validate().map_err(decode_error)?;
        Ok(fields)
    }

    fn encode(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(DomainError::Serialization(format!(
                "{} fields encoded to a non-object: {}",
                Self::KIND,
                other
            ))),
        }
    }
}

/// Field set of any kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Fields {
    Conference(Conference),
    Speaker(Speaker),
}

impl Fields {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Fields::Conference(_) => SubjectKind::Conference,
            Fields::Speaker(_) => SubjectKind::Speaker,
        }
    }

    /// Decode a payload with the decoder for `kind`.
    pub fn decode(id: &SubjectId, kind: SubjectKind, payload: &Map<String, Value>) -> Result<Self> {
        match kind {
            SubjectKind::Conference => Conference::decode(id, payload).map(Fields::Conference),
            SubjectKind::Speaker => Speaker::decode(id, payload).map(Fields::Speaker),
        }
    }

    pub fn encode(&self) -> Result<Map<String, Value>> {
        match self {
            Fields::Conference(fields) => fields.encode(),
            Fields::Speaker(fields) => fields.encode(),
        }
    }
}

/// A conference listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conference {
    pub name: String,
    pub location: String,
    pub start: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl SubjectFields for Conference {
    const KIND: SubjectKind = SubjectKind::Conference;

    fn into_fields(self) -> Fields {
        Fields::Conference(self)
    }

    fn from_fields(fields: &Fields) -> Option<&Self> {
        match fields {
            Fields::Conference(conference) => Some(conference),
            _ => None,
        }
    }

    fn from_fields_mut(fields: &mut Fields) -> Option<&mut Self> {
        match fields {
            Fields::Conference(conference) => Some(conference),
            _ => None,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self.end {
            Some(end) if end < self.start => {
                Err(format!("end {} is before start {}", end, self.start))
            }
            _ => Ok(()),
        }
    }
}

/// A speaker, optionally linked to a conference by id.
///
/// The link is a plain reference: deleting the conference does not delete or
/// unlink the speaker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conference: Option<SubjectId>,
}

impl SubjectFields for Speaker {
    const KIND: SubjectKind = SubjectKind::Speaker;

    fn into_fields(self) -> Fields {
        Fields::Speaker(self)
    }

    fn from_fields(fields: &Fields) -> Option<&Self> {
        match fields {
            Fields::Speaker(speaker) => Some(speaker),
            _ => None,
        }
    }

    fn from_fields_mut(fields: &mut Fields) -> Option<&mut Self> {
        match fields {
            Fields::Speaker(speaker) => Some(speaker),
            _ => None,
        }
    }
}
