//! Registry of user-defined search parameters.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::SearchError;
use crate::params::SearchParamExpression;

/// Thread-safe registry keyed `(resource type, parameter name)`.
///
/// Entries are copied on the way in and out so callers can never mutate
/// stored state.
#[derive(Debug, Default)]
pub struct DynamicParamRegistry {
    params: RwLock<HashMap<String, HashMap<String, SearchParamExpression>>>,
}

impl DynamicParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter for every resource type it declares.
    ///
    /// Fails without side effects if any `(resource type, name)` pair is
    /// already taken.
    pub fn register(&self, param: SearchParamExpression) -> Result<(), SearchError> {
        let mut params = self.params.write().expect("registry lock poisoned");

        for resource_type in &param.resource_types {
            if params
                .get(resource_type)
                .is_some_and(|by_name| by_name.contains_key(&param.name))
            {
                return Err(SearchError::DuplicateParameter {
                    resource_type: resource_type.clone(),
                    name: param.name.clone(),
                });
            }
        }

        for resource_type in &param.resource_types {
            params
                .entry(resource_type.clone())
                .or_default()
                .insert(param.name.clone(), param.clone());
        }

        Ok(())
    }

    pub fn get(&self, resource_type: &str, name: &str) -> Option<SearchParamExpression> {
        self.params
            .read()
            .expect("registry lock poisoned")
            .get(resource_type)
            .and_then(|by_name| by_name.get(name))
            .cloned()
    }

    /// All parameters registered for a resource type, sorted by name.
    pub fn list(&self, resource_type: &str) -> Vec<SearchParamExpression> {
        let params = self.params.read().expect("registry lock poisoned");
        let mut out: Vec<SearchParamExpression> = params
            .get(resource_type)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn remove(&self, resource_type: &str, name: &str) -> bool {
        let mut params = self.params.write().expect("registry lock poisoned");
        params
            .get_mut(resource_type)
            .and_then(|by_name| by_name.remove(name))
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SearchParamType;

    fn param(name: &str, resource_types: &[&str]) -> SearchParamExpression {
        SearchParamExpression {
            name: name.to_string(),
            param_type: SearchParamType::String,
            expression: format!("Patient.{name}"),
            resource_types: resource_types.iter().map(|s| s.to_string()).collect(),
            multiple_or: false,
            target: Vec::new(),
        }
    }

    #[test]
    fn register_and_get() {
        let registry = DynamicParamRegistry::new();
        registry.register(param("nickname", &["Patient"])).unwrap();
        assert!(registry.get("Patient", "nickname").is_some());
        assert!(registry.get("Observation", "nickname").is_none());
    }

    #[test]
    fn duplicate_registration_fails_for_any_resource_type() {
        let registry = DynamicParamRegistry::new();
        registry.register(param("nickname", &["Patient"])).unwrap();

        let err = registry
            .register(param("nickname", &["Practitioner", "Patient"]))
            .unwrap_err();
        assert!(matches!(err, SearchError::DuplicateParameter { .. }));

        // The failed registration must not have partially applied.
        assert!(registry.get("Practitioner", "nickname").is_none());
    }

    #[test]
    fn returned_copies_do_not_alias_stored_state() {
        let registry = DynamicParamRegistry::new();
        registry.register(param("nickname", &["Patient"])).unwrap();

        let mut fetched = registry.get("Patient", "nickname").unwrap();
        fetched.expression = "mutated".to_string();

        assert_eq!(
            registry.get("Patient", "nickname").unwrap().expression,
            "Patient.nickname"
        );
    }

    #[test]
    fn list_is_sorted_by_name() {
        let registry = DynamicParamRegistry::new();
        registry.register(param("zeta", &["Patient"])).unwrap();
        registry.register(param("alpha", &["Patient"])).unwrap();
        let names: Vec<String> = registry
            .list("Patient")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn remove_unregisters_one_type_only() {
        let registry = DynamicParamRegistry::new();
        registry
            .register(param("nickname", &["Patient", "Practitioner"]))
            .unwrap();
        assert!(registry.remove("Patient", "nickname"));
        assert!(registry.get("Patient", "nickname").is_none());
        assert!(registry.get("Practitioner", "nickname").is_some());
    }
}
