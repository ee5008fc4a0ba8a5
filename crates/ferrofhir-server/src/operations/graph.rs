//! GraphDefinition traversal: follow declared reference paths from a
//! start resource and collect the reachable graph into a Bundle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use ferrofhir_core::bundle::Bundle;
use ferrofhir_core::error::{CoreError, Result};
use ferrofhir_core::resource::{local_reference, lookup_path, split_reference};
use ferrofhir_storage::ResourceFetcher;

/// Parsed and validated GraphDefinition.
#[derive(Debug, Clone)]
pub struct GraphDefinitionModel {
    pub name: String,
    pub start: String,
    pub links: Vec<GraphLink>,
}

#[derive(Debug, Clone)]
pub struct GraphLink {
    /// Dot-notation path holding references; a missing path makes the
    /// link inert.
    pub path: Option<String>,
    pub targets: Vec<GraphTarget>,
}

#[derive(Debug, Clone)]
pub struct GraphTarget {
    pub resource_type: String,
    pub links: Vec<GraphLink>,
}

const COMPARTMENT_USES: [&str; 2] = ["condition", "requirement"];
const COMPARTMENT_RULES: [&str; 4] = ["identical", "matching", "different", "custom"];

/// Validate and parse a GraphDefinition resource.
pub fn parse_graph_definition(value: &Value) -> Result<GraphDefinitionModel> {
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::required("GraphDefinition.name"))?
        .to_string();
    let start = value
        .get("start")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::required("GraphDefinition.start"))?
        .to_string();

    let links = parse_links(value.get("link"))?;

    Ok(GraphDefinitionModel { name, start, links })
}

fn parse_links(value: Option<&Value>) -> Result<Vec<GraphLink>> {
    let Some(array) = value.and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    array.iter().map(parse_link).collect()
}

fn parse_link(value: &Value) -> Result<GraphLink> {
    let path = value.get("path").and_then(|v| v.as_str()).map(String::from);
    let targets = match value.get("target").and_then(|v| v.as_array()) {
        Some(array) => array.iter().map(parse_target).collect::<Result<_>>()?,
        None => Vec::new(),
    };
    Ok(GraphLink { path, targets })
}

fn parse_target(value: &Value) -> Result<GraphTarget> {
    let resource_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::required("GraphDefinition.link.target.type"))?
        .to_string();

    if let Some(compartments) = value.get("compartment").and_then(|v| v.as_array()) {
        for compartment in compartments {
            validate_compartment(compartment)?;
        }
    }

    let links = parse_links(value.get("link"))?;
    Ok(GraphTarget {
        resource_type,
        links,
    })
}

fn validate_compartment(value: &Value) -> Result<()> {
    let use_code = value.get("use").and_then(|v| v.as_str()).unwrap_or("");
    if !COMPARTMENT_USES.contains(&use_code) {
        return Err(CoreError::value(
            "compartment.use",
            format!("'{use_code}' is not one of condition|requirement"),
        ));
    }
    let rule = value.get("rule").and_then(|v| v.as_str()).unwrap_or("");
    if !COMPARTMENT_RULES.contains(&rule) {
        return Err(CoreError::value(
            "compartment.rule",
            format!("'{rule}' is not one of identical|matching|different|custom"),
        ));
    }
    Ok(())
}

/// Walks graph definitions using per-type fetchers.
#[derive(Default)]
pub struct GraphTraverser {
    fetchers: HashMap<String, Arc<dyn ResourceFetcher>>,
}

impl GraphTraverser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource_type: &str, fetcher: Arc<dyn ResourceFetcher>) {
        self.fetchers.insert(resource_type.to_string(), fetcher);
    }

    /// Traverse from `(start_type, start_id)`. Unknown types, missing
    /// fetchers, and fetch errors are skipped; the result is a
    /// collection Bundle of the visited resources.
    pub async fn traverse(
        &self,
        definition: &GraphDefinitionModel,
        start_type: &str,
        start_id: &str,
    ) -> Result<Bundle> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut collected: Vec<Value> = Vec::new();

        let Some(start) = self.fetch(start_type, start_id).await else {
            return Err(CoreError::not_found(format!("{start_type}/{start_id}")));
        };
        if let Some(key) = local_reference(&start) {
            visited.insert(key);
        }
        collected.push(start.clone());

        self.walk_links(&definition.links, &start, &mut visited, &mut collected)
            .await;

        Ok(Bundle::collection(collected))
    }

    async fn fetch(&self, resource_type: &str, id: &str) -> Option<Value> {
        let fetcher = self.fetchers.get(resource_type)?;
        match fetcher.fetch(resource_type, id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(resource = %format!("{resource_type}/{id}"), error = %e, "graph fetch skipped");
                None
            }
        }
    }

    async fn walk_links(
        &self,
        links: &[GraphLink],
        resource: &Value,
        visited: &mut HashSet<String>,
        collected: &mut Vec<Value>,
    ) {
        // Recursion over nested links is bounded by the visited set; the
        // per-request working set is small.
        let mut stack: Vec<(Vec<GraphLink>, Value)> = vec![(links.to_vec(), resource.clone())];

        while let Some((links, current)) = stack.pop() {
            for link in &links {
                let Some(path) = &link.path else {
                    continue;
                };
                let path = strip_type_prefix(path, &current);
                for reference in extract_references(&current, path) {
                    let Some((ref_type, ref_id)) = split_reference(&reference) else {
                        continue;
                    };
                    for target in &link.targets {
                        if target.resource_type != ref_type {
                            continue;
                        }
                        let key = format!("{ref_type}/{ref_id}");
                        if visited.contains(&key) {
                            continue;
                        }
                        let Some(fetched) = self.fetch(ref_type, ref_id).await else {
                            continue;
                        };
                        visited.insert(key);
                        collected.push(fetched.clone());
                        if !target.links.is_empty() {
                            stack.push((target.links.clone(), fetched));
                        }
                    }
                }
            }
        }
    }
}

/// Drop a leading `Type.` when it names the resource's own type.
fn strip_type_prefix<'a>(path: &'a str, resource: &Value) -> &'a str {
    if let Some(resource_type) = resource.get("resourceType").and_then(|v| v.as_str())
        && let Some(stripped) = path.strip_prefix(&format!("{resource_type}."))
    {
        return stripped;
    }
    path
}

/// Extract `reference` strings at a dotted path; handles both a single
/// reference object and arrays of them.
fn extract_references(resource: &Value, path: &str) -> Vec<String> {
    let mut references = Vec::new();
    for value in lookup_path(resource, path) {
        match value {
            Value::Object(map) => {
                if let Some(reference) = map.get("reference").and_then(|v| v.as_str()) {
                    references.push(reference.to_string());
                }
            }
            Value::String(s) => references.push(s.clone()),
            _ => {}
        }
    }
    references
}
