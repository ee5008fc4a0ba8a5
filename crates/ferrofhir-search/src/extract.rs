//! Index value extraction: evaluate a parameter's FHIRPath expression
//! and coerce each result into its declared typed shape.

use serde_json::Value;

use ferrofhir_core::time::parse_fhir_datetime;
use ferrofhir_fhirpath::{FhirPath, FpValue};

use crate::error::SearchError;
use crate::params::{SearchIndexValue, SearchParamExpression, SearchParamType};

/// Evaluate the parameter's expression against a resource and coerce
/// every produced value. Values that cannot be coerced to the declared
/// type are dropped.
pub fn extract_index_values(
    param: &SearchParamExpression,
    resource: &Value,
) -> Result<Vec<SearchIndexValue>, SearchError> {
    let path = FhirPath::parse(&param.expression).map_err(|e| SearchError::Expression {
        name: param.name.clone(),
        message: e.to_string(),
    })?;
    let results = path
        .evaluate(Some(resource))
        .map_err(|e| SearchError::Expression {
            name: param.name.clone(),
            message: e.to_string(),
        })?;

    Ok(results
        .iter()
        .filter_map(|value| coerce(param.param_type, value))
        .collect())
}

fn coerce(param_type: SearchParamType, value: &FpValue) -> Option<SearchIndexValue> {
    match param_type {
        SearchParamType::String => Some(SearchIndexValue::String(value.string_form())),
        SearchParamType::Uri => Some(SearchIndexValue::Uri(value.string_form())),
        SearchParamType::Token => coerce_token(value),
        SearchParamType::Date => coerce_date(value),
        SearchParamType::Number => value.as_f64().map(SearchIndexValue::Number).or_else(|| {
            value.string_form().parse::<f64>().ok().map(SearchIndexValue::Number)
        }),
        SearchParamType::Quantity => coerce_quantity(value),
        SearchParamType::Reference => coerce_reference(value),
        // Composite parameters index through their components.
        SearchParamType::Composite => None,
    }
}

fn coerce_token(value: &FpValue) -> Option<SearchIndexValue> {
    if let Some(map) = value.as_object() {
        let code = map.get("code").and_then(|v| v.as_str())?.to_string();
        let system = map
            .get("system")
            .and_then(|v| v.as_str())
            .map(String::from);
        return Some(SearchIndexValue::Token { system, code });
    }
    match value {
        FpValue::String(s) => Some(SearchIndexValue::Token {
            system: None,
            code: s.clone(),
        }),
        FpValue::Boolean(b) => Some(SearchIndexValue::Token {
            system: None,
            code: b.to_string(),
        }),
        _ => None,
    }
}

fn coerce_date(value: &FpValue) -> Option<SearchIndexValue> {
    match value {
        FpValue::DateTime(dt) => Some(SearchIndexValue::Date(*dt)),
        FpValue::String(s) => parse_fhir_datetime(s)
            .ok()
            .map(|parsed| SearchIndexValue::Date(parsed.instant)),
        _ => None,
    }
}

fn coerce_quantity(value: &FpValue) -> Option<SearchIndexValue> {
    if let Some(map) = value.as_object() {
        let amount = map.get("value").and_then(|v| v.as_f64())?;
        let unit = map
            .get("unit")
            .or_else(|| map.get("code"))
            .and_then(|v| v.as_str())
            .map(String::from);
        return Some(SearchIndexValue::Quantity {
            value: amount,
            unit,
        });
    }
    value.as_f64().map(|amount| SearchIndexValue::Quantity {
        value: amount,
        unit: None,
    })
}

fn coerce_reference(value: &FpValue) -> Option<SearchIndexValue> {
    if let Some(map) = value.as_object() {
        return map
            .get("reference")
            .and_then(|v| v.as_str())
            .map(|s| SearchIndexValue::Reference(s.to_string()));
    }
    match value {
        FpValue::String(s) => Some(SearchIndexValue::Reference(s.clone())),
        _ => None,
    }
}
