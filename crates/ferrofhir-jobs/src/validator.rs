//! Pluggable validation for imported resources.

use serde_json::Value;

use ferrofhir_core::resource::{id_of, resource_type_of};

/// Validates one imported resource before it is counted a success.
pub trait BulkResourceValidator: Send + Sync {
    fn validate(&self, expected_type: &str, resource: &Value) -> Result<(), String>;
}

/// Default validation: a non-empty `resourceType` matching the job's
/// expected type and a non-empty `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResourceValidator;

impl BulkResourceValidator for DefaultResourceValidator {
    fn validate(&self, expected_type: &str, resource: &Value) -> Result<(), String> {
        match resource_type_of(resource) {
            None | Some("") => return Err("missing resourceType".to_string()),
            Some(rt) if rt != expected_type => {
                return Err(format!("resourceType '{rt}' does not match '{expected_type}'"));
            }
            Some(_) => {}
        }
        match id_of(resource) {
            None | Some("") => Err("missing id".to_string()),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_matching_resource_with_id() {
        let v = DefaultResourceValidator;
        assert!(v
            .validate("Patient", &json!({"resourceType": "Patient", "id": "p1"}))
            .is_ok());
    }

    #[test]
    fn rejects_missing_or_mismatched_fields() {
        let v = DefaultResourceValidator;
        assert!(v.validate("Patient", &json!({"id": "p1"})).is_err());
        assert!(v
            .validate("Patient", &json!({"resourceType": "Observation", "id": "o1"}))
            .is_err());
        assert!(v
            .validate("Patient", &json!({"resourceType": "Patient"}))
            .is_err());
        assert!(v
            .validate("Patient", &json!({"resourceType": "Patient", "id": ""}))
            .is_err());
    }
}
