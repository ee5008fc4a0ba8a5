//! Storage traits the platform layer depends on.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{HistoryEntry, StoredResource};

/// CRUD, history, and simple criteria search over FHIR resources.
///
/// Implementations must be thread-safe; every method takes `&self`.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a resource. Generates an id when the body has none.
    ///
    /// Returns `StorageError::AlreadyExists` when the `(type, id)` pair
    /// is taken.
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Read a resource; `None` when it does not exist.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Replace an existing resource, bumping its version.
    async fn update(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Delete a resource. Deleting a missing resource is idempotent.
    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError>;

    /// Version history for one resource (newest first), or for the
    /// whole type when `id` is `None`.
    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
    ) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Resources of a type whose fields match all criteria entries
    /// (string-coerced equality; dotted paths supported).
    async fn search(
        &self,
        resource_type: &str,
        criteria: &HashMap<String, String>,
    ) -> Result<Vec<StoredResource>, StorageError>;
}

/// Criteria matching used by bulk edit jobs.
#[async_trait]
pub trait ResourceMatcher: Send + Sync {
    async fn match_resources(
        &self,
        resource_type: &str,
        criteria: &HashMap<String, String>,
    ) -> Result<Vec<Value>, StorageError>;
}

/// Point reads used by graph traversal.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Value>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_store_object_safe(_: &dyn ResourceStore) {}
    fn _assert_matcher_object_safe(_: &dyn ResourceMatcher) {}
    fn _assert_fetcher_object_safe(_: &dyn ResourceFetcher) {}
}
