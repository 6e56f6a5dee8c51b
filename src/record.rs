//! Message payloads and the documents derived from them.
//!
//! A [`Record`] is parsed from the JSON body of every delivery. Fields the worker
//! understands are lifted into typed members; everything else lands in
//! [`Record::extra`] and is written back to the store untouched.
//!
//! Two projections are derived from an [`EnrichedResult`]:
//!
//! - [`EnrichedResult::document`] is what the store persists. It never contains
//!   `type`, `status` or `duration`.
//! - [`EnrichedResult::status_record`] is what gets published. It carries only
//!   `msg_id`, `type` and `status`.

use std::{borrow::Cow, fmt, time::Duration};

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// JSON object as persisted by a [`crate::store::ResultStore`].
pub type Document = Map<String, Value>;

/// The action a message asks the worker to perform.
///
/// Unknown values are preserved verbatim so they can be logged and
/// acknowledged instead of failing the decode. A non-string `type` is kept as
/// its JSON text; only `null` is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum MessageType {
    Update,
    Delete,
    Unknown(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Unknown(value),
        }
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(value) => Ok(value.into()),
            Value::Null => Err(de::Error::custom("message type is null")),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Unknown(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status reported for a processed message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Done,
    Deleted,
}

/// A decoded message body.
///
/// Only `msg_id` and `type` are required. The optional known fields accept any
/// JSON value and are passed through to the store as sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub msg_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub text: Option<Value>,
    /// Usually an ISO-8601 string. Not interpreted.
    #[serde(default)]
    pub timestamp: Option<Value>,

    /// Fields the worker does not know about, in arrival order.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// Parses a delivery body.
    ///
    /// Fails when the body is not a JSON object or when `msg_id` or `type` is
    /// missing. Such messages are unprocessable and must not be retried.
    pub fn decode(body: impl AsRef<[u8]>) -> Result<Self, Error> {
        serde_json::from_slice(body.as_ref()).map_err(|source| Error::Decode { source })
    }

    pub fn new(msg_id: impl Into<String>, kind: MessageType) -> Self {
        Self {
            msg_id: msg_id.into(),
            kind,
            user_id: None,
            text: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<Value>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// The text to score, if the record carries a non-empty one.
    ///
    /// Strings are used as-is. Other non-empty values are scored on their JSON
    /// text. `null`, `""`, `0`, `false` and empty containers count as no text.
    pub fn scoring_text(&self) -> Option<Cow<'_, str>> {
        match self.text.as_ref()? {
            Value::Null | Value::Bool(false) => None,
            Value::String(text) if text.is_empty() => None,
            Value::String(text) => Some(Cow::Borrowed(text.as_str())),
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            Value::Array(items) if items.is_empty() => None,
            Value::Object(fields) if fields.is_empty() => None,
            other => Some(Cow::Owned(other.to_string())),
        }
    }
}

/// Output of the enrichment step for an `update` record.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedResult {
    pub record: Record,
    pub status: Status,
    /// Time spent enriching. Informational only.
    pub duration: Duration,
    /// Absent when the record carries no text.
    pub score: Option<u8>,
}

impl EnrichedResult {
    /// Builds the document persisted for this result.
    ///
    /// Extra fields come first and the known fields are merged over them, so a
    /// producer cannot shadow `msg_id` or `score` through the extra bag.
    pub fn document(&self) -> Document {
        let record = &self.record;
        let mut doc = record.extra.clone();

        for reserved in ["type", "status", "duration"] {
            doc.shift_remove(reserved);
        }

        doc.insert("msg_id".to_owned(), Value::from(record.msg_id.clone()));
        doc.insert("user_id".to_owned(), Value::from(record.user_id.clone()));
        doc.insert("text".to_owned(), Value::from(record.text.clone()));
        doc.insert("timestamp".to_owned(), Value::from(record.timestamp.clone()));
        doc.insert("score".to_owned(), Value::from(self.score));

        doc
    }

    pub fn status_record(&self) -> StatusRecord {
        StatusRecord {
            msg_id: self.record.msg_id.clone(),
            kind: self.record.kind.clone(),
            status: self.status,
        }
    }
}

/// Body published to the output queue once a message reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub msg_id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: Status,
}

impl StatusRecord {
    pub fn deleted(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            kind: MessageType::Delete,
            status: Status::Deleted,
        }
    }
}
