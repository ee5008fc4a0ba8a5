//! In-memory index for dynamically registered search parameters.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde_json::Value;

use ferrofhir_core::resource::{id_of, resource_type_of};
use ferrofhir_core::time::parse_fhir_datetime;

use crate::extract::extract_index_values;
use crate::params::SearchIndexValue;
use crate::primitives::{SearchPrefix, split_prefix};
use crate::registry::DynamicParamRegistry;

#[derive(Debug, Clone)]
struct IndexEntry {
    param: String,
    value: SearchIndexValue,
}

/// Typed value index keyed `Type/id`. Re-indexing a key replaces all of
/// its prior values atomically.
#[derive(Debug, Default)]
pub struct SearchIndex {
    entries: RwLock<HashMap<String, Vec<IndexEntry>>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the indexed values for one resource.
    pub fn update(
        &self,
        resource_type: &str,
        id: &str,
        values: Vec<(String, SearchIndexValue)>,
    ) {
        let key = format!("{resource_type}/{id}");
        let entries = values
            .into_iter()
            .map(|(param, value)| IndexEntry { param, value })
            .collect();
        self.entries
            .write()
            .expect("index lock poisoned")
            .insert(key, entries);
    }

    pub fn remove(&self, resource_type: &str, id: &str) {
        let key = format!("{resource_type}/{id}");
        self.entries
            .write()
            .expect("index lock poisoned")
            .remove(&key);
    }

    /// Extract and store every registered parameter's values for one
    /// resource. Extraction failures for individual parameters are
    /// logged and skipped.
    pub fn index_resource(&self, registry: &DynamicParamRegistry, resource: &Value) {
        let Some(resource_type) = resource_type_of(resource) else {
            return;
        };
        let Some(id) = id_of(resource) else {
            return;
        };

        let mut values = Vec::new();
        for param in registry.list(resource_type) {
            match extract_index_values(&param, resource) {
                Ok(extracted) => {
                    values.extend(extracted.into_iter().map(|v| (param.name.clone(), v)));
                }
                Err(e) => {
                    tracing::warn!(param = %param.name, error = %e, "index extraction failed");
                }
            }
        }
        self.update(resource_type, id, values);
    }

    /// Search the index. Returns deduplicated resource ids in sorted
    /// order.
    pub fn search(&self, resource_type: &str, param: &str, raw_value: &str) -> Vec<String> {
        let (prefix, value) = split_prefix(raw_value);
        let type_prefix = format!("{resource_type}/");
        let entries = self.entries.read().expect("index lock poisoned");

        let mut ids = BTreeSet::new();
        for (key, key_entries) in entries.iter() {
            let Some(id) = key.strip_prefix(&type_prefix) else {
                continue;
            };
            for entry in key_entries {
                if entry.param != param {
                    continue;
                }
                if value_matches(&entry.value, prefix, value) {
                    ids.insert(id.to_string());
                    break;
                }
            }
        }
        ids.into_iter().collect()
    }
}

fn value_matches(indexed: &SearchIndexValue, prefix: SearchPrefix, value: &str) -> bool {
    match indexed {
        SearchIndexValue::String(s) => string_matches(s, prefix, value),
        SearchIndexValue::Uri(u) => match prefix {
            SearchPrefix::Ne => u != value,
            _ => u == value,
        },
        SearchIndexValue::Token { system, code } => token_matches(system.as_deref(), code, prefix, value),
        SearchIndexValue::Reference(r) => {
            let indexed_id = r.rsplit('/').next().unwrap_or(r);
            let query_id = value.rsplit('/').next().unwrap_or(value);
            match prefix {
                SearchPrefix::Ne => indexed_id != query_id,
                _ => indexed_id == query_id,
            }
        }
        SearchIndexValue::Number(n) => numeric_matches(*n, prefix, value),
        SearchIndexValue::Quantity { value: n, .. } => {
            let numeric = value.split('|').next().unwrap_or(value);
            numeric_matches(*n, prefix, numeric)
        }
        SearchIndexValue::Date(dt) => date_matches(*dt, prefix, value),
    }
}

fn string_matches(indexed: &str, prefix: SearchPrefix, value: &str) -> bool {
    match prefix {
        SearchPrefix::Eq | SearchPrefix::Ap => indexed == value,
        SearchPrefix::Ne => indexed != value,
        SearchPrefix::Gt | SearchPrefix::Sa => indexed > value,
        SearchPrefix::Lt | SearchPrefix::Eb => indexed < value,
        SearchPrefix::Ge => indexed >= value,
        SearchPrefix::Le => indexed <= value,
    }
}

fn token_matches(system: Option<&str>, code: &str, prefix: SearchPrefix, value: &str) -> bool {
    let matched = match value.split_once('|') {
        Some((want_system, want_code)) => {
            let system_ok = want_system.is_empty() || system == Some(want_system);
            let code_ok = want_code.is_empty() || code == want_code;
            system_ok && code_ok
        }
        None => code == value,
    };
    // An absent indexed code never equals the query, so `ne` holds.
    match prefix {
        SearchPrefix::Ne => !matched,
        _ => matched,
    }
}

fn numeric_matches(indexed: f64, prefix: SearchPrefix, value: &str) -> bool {
    let Ok(query) = value.parse::<f64>() else {
        return false;
    };
    match prefix {
        SearchPrefix::Eq => indexed == query,
        SearchPrefix::Ne => indexed != query,
        SearchPrefix::Gt | SearchPrefix::Sa => indexed > query,
        SearchPrefix::Lt | SearchPrefix::Eb => indexed < query,
        SearchPrefix::Ge => indexed >= query,
        SearchPrefix::Le => indexed <= query,
        SearchPrefix::Ap => {
            let window = query.abs() * 0.1;
            (indexed - query).abs() <= window
        }
    }
}

fn date_matches(indexed: time::OffsetDateTime, prefix: SearchPrefix, value: &str) -> bool {
    let Ok(parsed) = parse_fhir_datetime(value) else {
        return false;
    };
    match prefix {
        SearchPrefix::Eq => {
            if parsed.date_only {
                indexed >= parsed.instant && indexed <= parsed.day_range_end()
            } else {
                indexed == parsed.instant
            }
        }
        SearchPrefix::Ne => indexed != parsed.instant,
        SearchPrefix::Gt | SearchPrefix::Sa => indexed > parsed.instant,
        SearchPrefix::Lt | SearchPrefix::Eb => indexed < parsed.instant,
        SearchPrefix::Ge => indexed >= parsed.instant,
        SearchPrefix::Le => indexed <= parsed.instant,
        SearchPrefix::Ap => {
            let window = time::Duration::days(1);
            indexed >= parsed.instant - window && indexed <= parsed.instant + window
        }
    }
}
