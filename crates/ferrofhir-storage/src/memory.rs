//! In-memory storage backend.
//!
//! Resources live in a readers/writer-locked map keyed `Type/id`; reads
//! clone before returning so callers may mutate freely. Version ids are
//! a monotonically increasing counter.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use ferrofhir_core::resource::{coerce_to_string, id_of, lookup_path, resource_type_of};

use crate::error::StorageError;
use crate::traits::{ResourceFetcher, ResourceMatcher, ResourceStore};
use crate::types::{HistoryEntry, HistoryMethod, StoredResource};

type StorageKey = String; // "ResourceType/id"

fn storage_key(resource_type: &str, id: &str) -> StorageKey {
    format!("{resource_type}/{id}")
}

#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    data: RwLock<HashMap<StorageKey, StoredResource>>,
    history: RwLock<HashMap<StorageKey, Vec<HistoryEntry>>>,
    version_counter: AtomicU64,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            version_counter: AtomicU64::new(1),
        }
    }

    fn next_version(&self) -> String {
        self.version_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn add_history(&self, stored: &StoredResource, method: HistoryMethod) {
        let key = storage_key(&stored.resource_type, &stored.id);
        let mut history = self.history.write().expect("history lock poisoned");
        history.entry(key).or_default().push(HistoryEntry {
            resource: stored.clone(),
            method,
        });
    }

    fn identity(resource: &Value) -> Result<(String, Option<String>), StorageError> {
        let resource_type = resource_type_of(resource)
            .ok_or_else(|| StorageError::invalid_resource("missing resourceType"))?
            .to_string();
        let id = id_of(resource).map(String::from);
        Ok((resource_type, id))
    }

    fn matches_criteria(resource: &Value, criteria: &HashMap<String, String>) -> bool {
        criteria.iter().all(|(field, want)| {
            lookup_path(resource, field)
                .iter()
                .any(|v| coerce_to_string(v).as_deref() == Some(want.as_str()))
        })
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        let (resource_type, id) = Self::identity(resource)?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = storage_key(&resource_type, &id);

        let mut body = resource.clone();
        if let Value::Object(map) = &mut body {
            map.insert("id".to_string(), Value::String(id.clone()));
        }

        let stored = StoredResource {
            id: id.clone(),
            resource_type: resource_type.clone(),
            version_id: self.next_version(),
            resource: body,
            last_updated: OffsetDateTime::now_utc(),
        };

        {
            let mut data = self.data.write().expect("data lock poisoned");
            if data.contains_key(&key) {
                return Err(StorageError::already_exists(resource_type, id));
            }
            data.insert(key, stored.clone());
        }

        self.add_history(&stored, HistoryMethod::Create);
        Ok(stored)
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        let data = self.data.read().expect("data lock poisoned");
        Ok(data.get(&storage_key(resource_type, id)).cloned())
    }

    async fn update(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        let (resource_type, id) = Self::identity(resource)?;
        let id = id.ok_or_else(|| StorageError::invalid_resource("update requires an id"))?;
        let key = storage_key(&resource_type, &id);

        let stored = StoredResource {
            id: id.clone(),
            resource_type: resource_type.clone(),
            version_id: self.next_version(),
            resource: resource.clone(),
            last_updated: OffsetDateTime::now_utc(),
        };

        {
            let mut data = self.data.write().expect("data lock poisoned");
            if !data.contains_key(&key) {
                return Err(StorageError::not_found(resource_type, id));
            }
            data.insert(key, stored.clone());
        }

        self.add_history(&stored, HistoryMethod::Update);
        Ok(stored)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        let key = storage_key(resource_type, id);
        let removed = {
            let mut data = self.data.write().expect("data lock poisoned");
            data.remove(&key)
        };
        if let Some(stored) = removed {
            self.add_history(&stored, HistoryMethod::Delete);
        }
        Ok(())
    }

    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let history = self.history.read().expect("history lock poisoned");
        let mut entries: Vec<HistoryEntry> = match id {
            Some(id) => history
                .get(&storage_key(resource_type, id))
                .cloned()
                .unwrap_or_default(),
            None => {
                let prefix = format!("{resource_type}/");
                history
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .flat_map(|(_, entries)| entries.clone())
                    .collect()
            }
        };
        entries.sort_by(|a, b| b.resource.last_updated.cmp(&a.resource.last_updated));
        Ok(entries)
    }

    async fn search(
        &self,
        resource_type: &str,
        criteria: &HashMap<String, String>,
    ) -> Result<Vec<StoredResource>, StorageError> {
        let prefix = format!("{resource_type}/");
        let data = self.data.read().expect("data lock poisoned");
        let mut matches: Vec<StoredResource> = data
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, stored)| Self::matches_criteria(&stored.resource, criteria))
            .map(|(_, stored)| stored.clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }
}

#[async_trait]
impl ResourceMatcher for InMemoryResourceStore {
    async fn match_resources(
        &self,
        resource_type: &str,
        criteria: &HashMap<String, String>,
    ) -> Result<Vec<Value>, StorageError> {
        let matched = self.search(resource_type, criteria).await?;
        Ok(matched.into_iter().map(|stored| stored.resource).collect())
    }
}

#[async_trait]
impl ResourceFetcher for InMemoryResourceStore {
    async fn fetch(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .read(resource_type, id)
            .await?
            .map(|stored| stored.resource))
    }
}
