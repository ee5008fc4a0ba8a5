use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A resource as held by a storage backend: the JSON body plus the
/// version and timestamp metadata the protocol layer needs for ETags
/// and Last-Modified headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredResource {
    pub id: String,
    pub resource_type: String,
    pub version_id: String,
    pub resource: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl StoredResource {
    pub fn local_reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Weak ETag for this version, `W/"<version>"`.
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version_id)
    }
}

/// How a history entry came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMethod {
    Create,
    Update,
    Delete,
}

impl HistoryMethod {
    pub fn http_method(&self) -> &'static str {
        match self {
            Self::Create => "POST",
            Self::Update => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// One version in a resource's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub resource: StoredResource,
    pub method: HistoryMethod,
}
