use thiserror::Error;

/// Errors from the dynamic search parameter registry and index.
///
/// Clause compilation itself never fails: malformed values degrade to
/// textual equality.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("Search parameter '{name}' already registered for {resource_type}")]
    DuplicateParameter { resource_type: String, name: String },

    #[error("Unknown search parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid parameter type: {0}")]
    InvalidParameterType(String),

    #[error("FHIRPath failure for '{name}': {message}")]
    Expression { name: String, message: String },
}
