use thiserror::Error;

/// Errors raised while lexing, parsing, or evaluating a FHIRPath
/// expression. All three surface to callers as evaluation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FhirPathError {
    #[error("lex error: {0}")]
    Lex(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("evaluation error: {0}")]
    Eval(String),
}

impl FhirPathError {
    pub fn lex(message: impl Into<String>) -> Self {
        Self::Lex(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}

impl From<regex::Error> for FhirPathError {
    fn from(err: regex::Error) -> Self {
        Self::Eval(format!("invalid regex: {err}"))
    }
}
