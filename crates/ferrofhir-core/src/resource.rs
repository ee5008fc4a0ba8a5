//! Helpers over the JSON-shaped resource model.
//!
//! Resources are opaque `serde_json::Value` objects carrying
//! `resourceType` and `id`. Identity is `(resourceType, id)`.

use serde_json::Value;

/// Extract the `resourceType` field from a resource.
pub fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(|v| v.as_str())
}

/// Extract the `id` field from a resource.
pub fn id_of(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(|v| v.as_str())
}

/// Build the local reference `Type/id` for a resource, if both parts exist.
pub fn local_reference(resource: &Value) -> Option<String> {
    let rt = resource_type_of(resource)?;
    let id = id_of(resource)?;
    Some(format!("{rt}/{id}"))
}

/// Split a local reference `Type/id` into its parts.
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    let (rt, id) = reference.rsplit_once('/')?;
    if rt.is_empty() || id.is_empty() {
        return None;
    }
    Some((rt, id))
}

/// Navigate a dot-separated path in a JSON value, flattening arrays at
/// each level. Returns all terminal values reached by following the path.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![value];

    for segment in path.split('.') {
        let mut next = Vec::new();
        for val in current {
            match val {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        match child {
                            Value::Array(arr) => next.extend(arr.iter()),
                            other => next.push(other),
                        }
                    }
                }
                Value::Array(arr) => {
                    for item in arr {
                        if let Some(child) = item.get(segment) {
                            match child {
                                Value::Array(inner) => next.extend(inner.iter()),
                                other => next.push(other),
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }

    current
}

/// Coerce a scalar JSON value to its string form. Objects and arrays
/// yield `None`; matching logic that needs structure should not coerce.
pub fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
