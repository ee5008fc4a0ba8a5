//! Terminology operations over stored conformance resources:
//! `ConceptMap/$translate`, `CodeSystem/$subsumes`,
//! `CodeSystem/$closure`, and `ValueSet/$expand`.
//!
//! The code-system content itself is data supplied as resources; only
//! the lookup logic lives here.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use ferrofhir_core::error::{CoreError, Result};
use ferrofhir_storage::ResourceStore;

/// One translation produced by `$translate`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TranslationMatch {
    pub system: String,
    pub code: String,
    pub display: Option<String>,
    pub equivalence: String,
}

/// A code with its system, as produced by `$expand`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
    pub display: Option<String>,
}

/// Subsumption outcomes per the FHIR `$subsumes` operation.
pub const OUTCOME_EQUIVALENT: &str = "equivalent";
pub const OUTCOME_SUBSUMES: &str = "subsumes";
pub const OUTCOME_SUBSUMED_BY: &str = "subsumed-by";
pub const OUTCOME_NOT_SUBSUMED: &str = "not-subsumed";

pub struct TerminologyService {
    store: Arc<dyn ResourceStore>,
    closures: RwLock<HashMap<String, HashSet<(String, String)>>>,
}

impl TerminologyService {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            closures: RwLock::new(HashMap::new()),
        }
    }

    /// Translate a source concept through every stored ConceptMap whose
    /// groups cover the source system.
    pub async fn translate(
        &self,
        source_system: &str,
        source_code: &str,
    ) -> Result<Vec<TranslationMatch>> {
        if source_system.is_empty() {
            return Err(CoreError::required("system"));
        }
        if source_code.is_empty() {
            return Err(CoreError::required("code"));
        }

        let maps = self
            .store
            .search("ConceptMap", &HashMap::new())
            .await
            .map_err(|e| CoreError::processing(e.to_string()))?;

        let mut matches = Vec::new();
        for map in maps {
            let Some(groups) = map.resource.get("group").and_then(|v| v.as_array()) else {
                continue;
            };
            for group in groups {
                let group_source = group.get("source").and_then(|v| v.as_str()).unwrap_or("");
                if group_source != source_system {
                    continue;
                }
                let target_system = group
                    .get("target")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let Some(elements) = group.get("element").and_then(|v| v.as_array()) else {
                    continue;
                };
                for element in elements {
                    if element.get("code").and_then(|v| v.as_str()) != Some(source_code) {
                        continue;
                    }
                    let Some(targets) = element.get("target").and_then(|v| v.as_array()) else {
                        continue;
                    };
                    for target in targets {
                        let Some(code) = target.get("code").and_then(|v| v.as_str()) else {
                            continue;
                        };
                        matches.push(TranslationMatch {
                            system: target_system.clone(),
                            code: code.to_string(),
                            display: target
                                .get("display")
                                .and_then(|v| v.as_str())
                                .map(String::from),
                            equivalence: target
                                .get("equivalence")
                                .and_then(|v| v.as_str())
                                .unwrap_or("equivalent")
                                .to_string(),
                        });
                    }
                }
            }
        }
        Ok(matches)
    }

    /// Decide the subsumption relation between two codes of one system.
    pub async fn subsumes(&self, system: &str, code_a: &str, code_b: &str) -> Result<&'static str> {
        if code_a == code_b {
            return Ok(OUTCOME_EQUIVALENT);
        }

        let criteria = HashMap::from([("url".to_string(), system.to_string())]);
        let systems = self
            .store
            .search("CodeSystem", &criteria)
            .await
            .map_err(|e| CoreError::processing(e.to_string()))?;
        let code_system = systems
            .first()
            .ok_or_else(|| CoreError::not_found(format!("CodeSystem {system}")))?;

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(concepts) = code_system.resource.get("concept").and_then(|v| v.as_array()) {
            for concept in concepts {
                collect_hierarchy(concept, &mut children);
            }
        }

        if is_descendant(&children, code_a, code_b) {
            return Ok(OUTCOME_SUBSUMES);
        }
        if is_descendant(&children, code_b, code_a) {
            return Ok(OUTCOME_SUBSUMED_BY);
        }
        Ok(OUTCOME_NOT_SUBSUMED)
    }

    /// Add concepts to a named closure table, returning only the pairs
    /// that were new.
    pub fn closure(&self, name: &str, concepts: &[(String, String)]) -> Vec<(String, String)> {
        let mut closures = self.closures.write().expect("closure lock poisoned");
        let table = closures.entry(name.to_string()).or_default();
        concepts
            .iter()
            .filter(|pair| table.insert((*pair).clone()))
            .cloned()
            .collect()
    }

    /// Expand a stored ValueSet's compose.include concepts, optionally
    /// filtered by a case-insensitive substring over code and display.
    pub async fn expand(&self, url: &str, filter: Option<&str>) -> Result<Vec<Coding>> {
        let criteria = HashMap::from([("url".to_string(), url.to_string())]);
        let sets = self
            .store
            .search("ValueSet", &criteria)
            .await
            .map_err(|e| CoreError::processing(e.to_string()))?;
        let value_set = sets
            .first()
            .ok_or_else(|| CoreError::not_found(format!("ValueSet {url}")))?;

        let mut codings = Vec::new();
        let includes = value_set
            .resource
            .get("compose")
            .and_then(|v| v.get("include"))
            .and_then(|v| v.as_array());
        if let Some(includes) = includes {
            for include in includes {
                let system = include
                    .get("system")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let Some(concepts) = include.get("concept").and_then(|v| v.as_array()) else {
                    continue;
                };
                for concept in concepts {
                    let Some(code) = concept.get("code").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let display = concept
                        .get("display")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    if let Some(filter) = filter {
                        let needle = filter.to_lowercase();
                        let hit = code.to_lowercase().contains(&needle)
                            || display
                                .as_deref()
                                .is_some_and(|d| d.to_lowercase().contains(&needle));
                        if !hit {
                            continue;
                        }
                    }
                    codings.push(Coding {
                        system: system.clone(),
                        code: code.to_string(),
                        display,
                    });
                }
            }
        }
        Ok(codings)
    }
}

fn collect_hierarchy(concept: &Value, children: &mut HashMap<String, Vec<String>>) {
    let Some(code) = concept.get("code").and_then(|v| v.as_str()) else {
        return;
    };
    if let Some(nested) = concept.get("concept").and_then(|v| v.as_array()) {
        for child in nested {
            if let Some(child_code) = child.get("code").and_then(|v| v.as_str()) {
                children
                    .entry(code.to_string())
                    .or_default()
                    .push(child_code.to_string());
            }
            collect_hierarchy(child, children);
        }
    }
}

fn is_descendant(children: &HashMap<String, Vec<String>>, ancestor: &str, code: &str) -> bool {
    let Some(direct) = children.get(ancestor) else {
        return false;
    };
    direct
        .iter()
        .any(|child| child == code || is_descendant(children, child, code))
}
