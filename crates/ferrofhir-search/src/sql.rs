//! SQL generation for dynamic parameters against JSONB-style backends.
//!
//! The parameter's FHIRPath expression is reduced to a plain path
//! (resource-type prefix stripped, function calls truncated) and turned
//! into a nested JSON extraction like `resource->'a'->'b'->>'c'`.

use serde_json::{Value, json};

use crate::params::{SearchParamExpression, SearchParamType};
use crate::primitives::{
    Fragment, date_clause, number_clause, quantity_clause, reference_clause, string_clause,
    uri_clause,
};

/// Reduce a FHIRPath expression to its leading plain path segments.
///
/// `Observation.component.where(x).valueQuantity` keeps `component`;
/// the call and everything after it are truncated. Index accessors are
/// dropped from their segment.
pub fn expression_to_json_path(expression: &str, resource_type: &str) -> Vec<String> {
    let expr = expression.trim();
    let expr = expr
        .strip_prefix(&format!("{resource_type}."))
        .or_else(|| expr.strip_prefix("Resource."))
        .unwrap_or(expr);

    let mut path = Vec::new();
    for segment in expr.split('.') {
        if segment.is_empty() {
            break;
        }
        // A parenthesis means a function call; the call and everything
        // after it cannot be expressed as a JSON path.
        if segment.contains('(') {
            break;
        }
        let segment = match segment.split_once('[') {
            Some((name, _)) => name,
            None => segment,
        };
        // A second resource-type-looking head would also not be a field.
        if path.is_empty() && segment.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            continue;
        }
        path.push(segment.to_string());
    }
    path
}

/// Build a JSONB accessor chain; the last segment extracts text when
/// `as_text` is set.
pub fn json_accessor(resource_column: &str, path: &[String], as_text: bool) -> String {
    if path.is_empty() {
        return resource_column.to_string();
    }
    let mut accessor = resource_column.to_string();
    for (i, segment) in path.iter().enumerate() {
        if i == path.len() - 1 && as_text {
            accessor = format!("{accessor}->>'{segment}'");
        } else {
            accessor = format!("{accessor}->'{segment}'");
        }
    }
    accessor
}

/// Nested containment document for a token query: the innermost object
/// is wrapped in an array, outer segments nest as objects.
fn token_containment(path: &[String], system: Option<&str>, code: &str) -> Value {
    let mut token = serde_json::Map::new();
    if let Some(system) = system {
        token.insert("system".to_string(), json!(system));
    }
    if !code.is_empty() {
        token.insert("code".to_string(), json!(code));
    }
    let mut value = Value::Array(vec![Value::Object(token)]);
    for segment in path.iter().rev() {
        let mut wrapper = serde_json::Map::new();
        wrapper.insert(segment.clone(), value);
        value = Value::Object(wrapper);
    }
    value
}

/// Generate the SQL fragment for one dynamic parameter value.
pub fn sql_for_param(
    param: &SearchParamExpression,
    resource_type: &str,
    resource_column: &str,
    value: &str,
    start: usize,
) -> Fragment {
    let path = expression_to_json_path(&param.expression, resource_type);
    let text_accessor = json_accessor(resource_column, &path, true);

    match param.param_type {
        SearchParamType::String => string_clause(&text_accessor, value, None, start),
        SearchParamType::Uri => uri_clause(&text_accessor, value, None, start),
        SearchParamType::Date => date_clause(&format!("({text_accessor})::timestamptz"), value, start),
        SearchParamType::Number | SearchParamType::Quantity => {
            let clause_value = if param.param_type == SearchParamType::Quantity {
                value.split('|').next().unwrap_or(value)
            } else {
                value
            };
            number_clause(&format!("({text_accessor})::numeric"), clause_value, start)
        }
        SearchParamType::Reference => reference_clause(&text_accessor, value, start),
        SearchParamType::Token => match value.split_once('|') {
            Some((system, code)) => {
                let system = (!system.is_empty()).then_some(system);
                let containment = token_containment(&path, system, code);
                Fragment {
                    sql: format!("{resource_column} @> ${start}::jsonb"),
                    args: vec![containment.to_string()],
                    next_index: start + 1,
                }
            }
            None => string_clause(&text_accessor, value, Some(crate::primitives::SearchModifier::Exact), start),
        },
        SearchParamType::Composite => Fragment::empty(start),
    }
}

/// Generate the quantity clause for a numeric leaf under the path (the
/// conventional `value` field of a Quantity element).
pub fn quantity_sql(
    param: &SearchParamExpression,
    resource_type: &str,
    resource_column: &str,
    value: &str,
    start: usize,
) -> Fragment {
    let mut path = expression_to_json_path(&param.expression, resource_type);
    path.push("value".to_string());
    let accessor = json_accessor(resource_column, &path, true);
    quantity_clause(&format!("({accessor})::numeric"), value, start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(param_type: SearchParamType, expression: &str) -> SearchParamExpression {
        SearchParamExpression {
            name: "test".to_string(),
            param_type,
            expression: expression.to_string(),
            resource_types: vec!["Observation".to_string()],
            multiple_or: false,
            target: Vec::new(),
        }
    }

    #[test]
    fn path_strips_prefix_and_truncates_calls() {
        assert_eq!(
            expression_to_json_path("Patient.name.family", "Patient"),
            vec!["name", "family"]
        );
        assert_eq!(
            expression_to_json_path("Observation.component.where(code = 'x').value", "Observation"),
            vec!["component"]
        );
        assert_eq!(
            expression_to_json_path("Patient.name[0].family", "Patient"),
            vec!["name", "family"]
        );
    }

    #[test]
    fn accessor_uses_text_extraction_on_last_segment() {
        let path = vec!["name".to_string(), "family".to_string()];
        assert_eq!(
            json_accessor("resource", &path, true),
            "resource->'name'->>'family'"
        );
        assert_eq!(
            json_accessor("resource", &path, false),
            "resource->'name'->'family'"
        );
        assert_eq!(json_accessor("resource", &[], true), "resource");
    }

    #[test]
    fn string_param_generates_ilike() {
        let frag = sql_for_param(
            &param(SearchParamType::String, "Patient.name.family"),
            "Patient",
            "resource",
            "smith",
            1,
        );
        assert_eq!(frag.sql, "resource->'name'->>'family' ILIKE $1");
        assert_eq!(frag.args, vec!["smith%"]);
    }

    #[test]
    fn token_system_code_generates_containment() {
        let frag = sql_for_param(
            &param(SearchParamType::Token, "Observation.code.coding"),
            "Observation",
            "resource",
            "http://loinc.org|8480-6",
            1,
        );
        assert_eq!(frag.sql, "resource @> $1::jsonb");
        let containment: Value = serde_json::from_str(&frag.args[0]).unwrap();
        assert_eq!(
            containment,
            serde_json::json!({
                "code": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}]}
            })
        );
    }

    #[test]
    fn bare_token_is_exact_text_match() {
        let frag = sql_for_param(
            &param(SearchParamType::Token, "Patient.gender"),
            "Patient",
            "resource",
            "female",
            1,
        );
        assert_eq!(frag.sql, "resource->>'gender' = $1");
    }

    #[test]
    fn number_param_casts_to_numeric() {
        let frag = sql_for_param(
            &param(SearchParamType::Number, "Observation.valueQuantity.value"),
            "Observation",
            "resource",
            "gt5.4",
            1,
        );
        assert_eq!(
            frag.sql,
            "(resource->'valueQuantity'->>'value')::numeric > $1"
        );
        assert_eq!(frag.args, vec!["5.4"]);
    }

    #[test]
    fn date_param_casts_to_timestamptz() {
        let frag = sql_for_param(
            &param(SearchParamType::Date, "Patient.birthDate"),
            "Patient",
            "resource",
            "ge1990-01-01",
            1,
        );
        assert!(frag.sql.starts_with("(resource->>'birthDate')::timestamptz >="));
    }
}
