//! Search parameter definitions and extracted index values.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::SearchError;

/// FHIR search parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
}

impl std::str::FromStr for SearchParamType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(Self::Number),
            "date" => Ok(Self::Date),
            "string" => Ok(Self::String),
            "token" => Ok(Self::Token),
            "reference" => Ok(Self::Reference),
            "composite" => Ok(Self::Composite),
            "quantity" => Ok(Self::Quantity),
            "uri" => Ok(Self::Uri),
            other => Err(SearchError::InvalidParameterType(other.to_string())),
        }
    }
}

/// A user-defined search parameter backed by a FHIRPath expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParamExpression {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
    pub expression: String,
    #[serde(rename = "resourceTypes")]
    pub resource_types: Vec<String>,
    #[serde(default, rename = "multipleOr")]
    pub multiple_or: bool,
    #[serde(default)]
    pub target: Vec<String>,
}

/// One typed value extracted from a resource for indexing. Exactly one
/// shape is populated per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchIndexValue {
    String(String),
    Token {
        system: Option<String>,
        code: String,
    },
    Date(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Number(f64),
    Quantity {
        value: f64,
        unit: Option<String>,
    },
    Reference(String),
    Uri(String),
}
