//! Remote documents and the metadata the remote store reports about them.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Attributes, Model};
use crate::Timestamp;

/// Type name used when documents are carried as related models.
pub const DOCUMENT_TYPE: &str = "Document";

/// One addressable remote resource and its last-modified timestamp.
///
/// Document values are produced fresh on every remote read and are never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    pub updated_at: Timestamp,
}

impl Document {
    pub fn new(url: impl Into<String>, updated_at: Timestamp) -> Self {
        Self {
            url: url.into(),
            updated_at,
        }
    }

    /// Represent this document as a related model (`url` + `updatedAt`).
    pub fn to_model(&self) -> Model {
        let mut attributes = Attributes::new();
        attributes.insert("url".to_string(), Value::String(self.url.clone()));
        attributes.insert(
            "updatedAt".to_string(),
            Value::from(self.updated_at.timestamp_millis()),
        );
        Model::from_persisted(DOCUMENT_TYPE, attributes)
    }

    /// Read a document back from its model form.
    ///
    /// Accepts `updatedAt` as epoch milliseconds or as an RFC 3339 string.
    pub fn from_model(model: &Model) -> Option<Self> {
        let url = model.url()?.to_string();
        let updated_at = match model.attribute("updatedAt")? {
            Value::Number(millis) => DateTime::from_timestamp_millis(millis.as_i64()?)?,
            Value::String(raw) => DateTime::parse_from_rfc3339(raw).ok()?.to_utc(),
            _ => return None,
        };
        Some(Self { url, updated_at })
    }
}

/// Metadata gathered while a document was read.
///
/// `described_by` names the auxiliary description document that governs the
/// shape of the resources stored in the document, when the server exposes one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub described_by: Option<String>,
}
