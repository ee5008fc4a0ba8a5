use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Minimal FHIR OperationOutcome representation for API responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: &'static str, // always "OperationOutcome"
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcomeIssue {
    /// FHIR issue severity: fatal | error | warning | information
    pub severity: &'static str,
    /// FHIR issue type code: structure | required | value | not-found |
    /// conflict | too-many-requests | processing | informational
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl OperationOutcome {
    pub fn single(
        severity: &'static str,
        code: &'static str,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: "OperationOutcome",
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: Some(diagnostics.into()),
            }],
        }
    }

    pub fn error(code: &'static str, diagnostics: impl Into<String>) -> Self {
        Self::single("error", code, diagnostics)
    }

    /// Informational outcome used by the Prefer middleware for
    /// `return=OperationOutcome`.
    pub fn informational(diagnostics: impl Into<String>) -> Self {
        Self::single("information", "informational", diagnostics)
    }
}

impl From<&CoreError> for OperationOutcome {
    fn from(err: &CoreError) -> Self {
        OperationOutcome::error(err.issue_code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_outcome_serializes_with_resource_type() {
        let outcome = OperationOutcome::error("not-found", "Patient/1 does not exist");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["resourceType"], "OperationOutcome");
        assert_eq!(json["issue"][0]["severity"], "error");
        assert_eq!(json["issue"][0]["code"], "not-found");
        assert_eq!(json["issue"][0]["diagnostics"], "Patient/1 does not exist");
    }

    #[test]
    fn core_error_projects_its_issue_code() {
        let err = CoreError::conflict("cannot cancel a completed job");
        let outcome = OperationOutcome::from(&err);
        assert_eq!(outcome.issue[0].code, "conflict");
    }

    #[test]
    fn informational_outcome_for_prefer() {
        let outcome = OperationOutcome::informational("Operation completed successfully");
        assert_eq!(outcome.issue[0].severity, "information");
        assert_eq!(outcome.issue[0].code, "informational");
    }
}
