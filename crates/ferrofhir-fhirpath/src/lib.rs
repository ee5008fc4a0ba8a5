//! FHIRPath expression engine.
//!
//! A single-pass lexer, a Pratt-style recursive-descent parser, and a
//! tree-walking evaluator over the JSON resource model. Semantics
//! operate on collections: every expression maps an input collection to
//! an output collection.
//!
//! ```
//! use serde_json::json;
//!
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "name": [{"family": "Chalmers", "given": ["Peter", "James"]}]
//! });
//! let result = ferrofhir_fhirpath::evaluate(Some(&patient), "Patient.name.family").unwrap();
//! assert_eq!(result[0].string_form(), "Chalmers");
//! ```

mod ast;
mod error;
mod eval;
mod lexer;
mod parser;
mod value;

pub use ast::{CompareOp, Expr, Literal};
pub use error::FhirPathError;
pub use value::FpValue;

use serde_json::Value;

/// A parsed FHIRPath expression, reusable across resources.
#[derive(Debug, Clone)]
pub struct FhirPath {
    source: String,
    expr: Expr,
}

impl FhirPath {
    /// Parse an expression. Empty input is a parse error.
    pub fn parse(source: &str) -> Result<Self, FhirPathError> {
        let tokens = lexer::tokenize(source)?;
        let expr = parser::parse(&tokens)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against a resource. A `None` resource yields an empty
    /// collection, never an error.
    pub fn evaluate(&self, resource: Option<&Value>) -> Result<Vec<FpValue>, FhirPathError> {
        let Some(resource) = resource else {
            return Ok(Vec::new());
        };
        let input = vec![FpValue::from_json(resource)];
        eval::eval(&self.expr, &input, resource)
    }

    /// Evaluate and coerce the result collection to a boolean.
    pub fn evaluate_bool(&self, resource: Option<&Value>) -> Result<bool, FhirPathError> {
        Ok(value::collection_to_bool(&self.evaluate(resource)?))
    }

    /// Evaluate and return the string form of the first result, or `""`.
    pub fn evaluate_string(&self, resource: Option<&Value>) -> Result<String, FhirPathError> {
        Ok(self
            .evaluate(resource)?
            .first()
            .map(FpValue::string_form)
            .unwrap_or_default())
    }
}

/// One-shot parse and evaluate.
pub fn evaluate(resource: Option<&Value>, source: &str) -> Result<Vec<FpValue>, FhirPathError> {
    FhirPath::parse(source)?.evaluate(resource)
}

/// One-shot parse and boolean evaluation.
pub fn evaluate_bool(resource: Option<&Value>, source: &str) -> Result<bool, FhirPathError> {
    FhirPath::parse(source)?.evaluate_bool(resource)
}

/// One-shot parse and string evaluation.
pub fn evaluate_string(resource: Option<&Value>, source: &str) -> Result<String, FhirPathError> {
    FhirPath::parse(source)?.evaluate_string(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nil_resource_yields_empty_collection() {
        let path = FhirPath::parse("Patient.name").unwrap();
        assert!(path.evaluate(None).unwrap().is_empty());
    }

    #[test]
    fn empty_expression_is_a_parse_error() {
        assert!(FhirPath::parse("").is_err());
        assert!(FhirPath::parse("   ").is_err());
    }

    #[test]
    fn component_filter_extraction() {
        let observation = json!({
            "resourceType": "Observation",
            "component": [
                {
                    "code": {"coding": [{"code": "8480-6"}]},
                    "valueQuantity": {"value": 120}
                },
                {
                    "code": {"coding": [{"code": "8462-4"}]},
                    "valueQuantity": {"value": 80}
                }
            ]
        });

        let result = evaluate(
            Some(&observation),
            "Observation.component.where(code.coding.code = '8480-6').valueQuantity.value",
        )
        .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0], FpValue::Integer(120));
    }

    #[test]
    fn resource_type_filter_rejects_other_types() {
        let patient = json!({"resourceType": "Patient", "id": "p1"});
        assert!(evaluate(Some(&patient), "Observation.id").unwrap().is_empty());
        assert_eq!(
            evaluate_string(Some(&patient), "Patient.id").unwrap(),
            "p1"
        );
    }

    #[test]
    fn evaluate_string_defaults_to_empty() {
        let patient = json!({"resourceType": "Patient"});
        assert_eq!(evaluate_string(Some(&patient), "Patient.id").unwrap(), "");
    }
}
