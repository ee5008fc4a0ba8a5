//! Subscription criteria parsing and event matching.
//!
//! A criteria string has the shape `ResourceType?param=value&...`. The
//! parameter names are dotted JSON paths into the event's resource;
//! scalar field values are string-coerced before comparison. A missing
//! path never matches.

use serde_json::Value;

use ferrofhir_core::resource::{coerce_to_string, lookup_path};

use crate::error::SubscriptionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCriteria {
    pub resource_type: String,
    pub params: Vec<(String, String)>,
}

impl ParsedCriteria {
    /// Parse `Type?k=v&...`. The query part is optional.
    pub fn parse(criteria: &str) -> Result<Self, SubscriptionError> {
        let criteria = criteria.trim();
        if criteria.is_empty() {
            return Err(SubscriptionError::invalid_criteria("empty criteria"));
        }

        let (resource_type, query) = match criteria.split_once('?') {
            Some((rt, query)) => (rt, Some(query)),
            None => (criteria, None),
        };
        if resource_type.is_empty() {
            return Err(SubscriptionError::invalid_criteria(format!(
                "criteria '{criteria}' has no resource type"
            )));
        }

        let mut params = Vec::new();
        if let Some(query) = query {
            for pair in query.split('&') {
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                if key.is_empty() {
                    continue;
                }
                params.push((key.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            params,
        })
    }

    /// Whether an event for `resource_type` carrying `resource` matches
    /// this criteria.
    pub fn matches(&self, resource_type: &str, resource: &Value) -> bool {
        if self.resource_type != resource_type {
            return false;
        }
        self.params.iter().all(|(path, want)| {
            lookup_path(resource, path)
                .iter()
                .any(|v| coerce_to_string(v).as_deref() == Some(want.as_str()))
        })
    }
}
