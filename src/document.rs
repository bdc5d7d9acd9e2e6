use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of documents that are excluded from reindexing.
pub const DELETED_STATE: &str = "deleted";

/// Character appended to the change trigger attribute during a touch.
pub const TOUCH_MARKER: char = ' ';

/// Opaque document identifier. Ordering is lexicographic on the raw id.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An enumerated document: its id and primary type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub doc_type: String,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(id),
            doc_type: doc_type.into(),
        }
    }
}

/// A simple attribute value as stored on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl AttributeValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value written during the first save of a touch: one character
    /// longer than the original. `Null` touches to the bare marker.
    ///
    /// ```
    /// use reindexer::document::AttributeValue;
    ///
    /// let touched = AttributeValue::text("Report").touched().unwrap();
    /// assert_eq!(touched, AttributeValue::text("Report "));
    /// ```
    pub fn touched(&self) -> Result<Self> {
        match self {
            Self::Text(s) => {
                let mut value = String::with_capacity(s.len() + 1);
                value.push_str(s);
                value.push(TOUCH_MARKER);
                Ok(Self::Text(value))
            }
            Self::Null => Ok(Self::Text(TOUCH_MARKER.to_string())),
            other => Err(Error::Session(format!(
                "change trigger attribute holds a non-text value: {other:?}"
            ))),
        }
    }
}

fn default_lifecycle_state() -> String {
    "project".to_string()
}

/// A document record as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Proxies point at another document and are never reindexed.
    #[serde(default)]
    pub is_proxy: bool,
    /// Versions are immutable through the normal document API.
    #[serde(default)]
    pub is_version: bool,
    #[serde(default = "default_lifecycle_state")]
    pub lifecycle_state: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl StoredDocument {
    pub fn new(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            is_proxy: false,
            is_version: false,
            lifecycle_state: default_lifecycle_state(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        value: AttributeValue,
    ) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Neither a proxy nor in the deleted lifecycle state.
    pub fn is_live(&self) -> bool {
        !self.is_proxy && self.lifecycle_state != DELETED_STATE
    }
}
