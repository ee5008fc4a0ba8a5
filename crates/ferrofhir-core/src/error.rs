use thiserror::Error;

/// Core error type shared across the Ferrofhir crates.
///
/// Every failure that can reach a client maps onto a FHIR issue kind so
/// the HTTP layer can project it into an OperationOutcome without
/// inspecting message text.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Malformed content: {0}")]
    Structure(String),

    #[error("Missing required parameter: {0}")]
    Required(String),

    #[error("Invalid value for {field}: {message}")]
    Value { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many concurrent requests: {0}")]
    TooManyRequests(String),

    #[error("Processing failure: {0}")]
    Processing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Datetime parse error: {0}")]
    Time(String),
}

/// FHIR issue kinds, mirroring the `issue.code` values we emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Structure,
    Required,
    Value,
    NotFound,
    Conflict,
    TooManyRequests,
    Processing,
}

impl CoreError {
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure(message.into())
    }

    pub fn required(parameter: impl Into<String>) -> Self {
        Self::Required(parameter.into())
    }

    pub fn value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Value {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::TooManyRequests(message.into())
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Structure(_) | Self::Json(_) | Self::Time(_) => ErrorKind::Structure,
            Self::Required(_) => ErrorKind::Required,
            Self::Value { .. } => ErrorKind::Value,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::TooManyRequests(_) => ErrorKind::TooManyRequests,
            Self::Processing(_) => ErrorKind::Processing,
        }
    }

    /// FHIR `issue.code` value for this error.
    pub fn issue_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Structure => "structure",
            ErrorKind::Required => "required",
            ErrorKind::Value => "value",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TooManyRequests => "too-many-requests",
            ErrorKind::Processing => "processing",
        }
    }

    /// Suggested HTTP status for this error.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Structure | ErrorKind::Required | ErrorKind::Value => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::Processing => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_codes_follow_the_taxonomy() {
        assert_eq!(CoreError::structure("bad json").issue_code(), "structure");
        assert_eq!(CoreError::required("start").issue_code(), "required");
        assert_eq!(CoreError::value("rule", "bogus").issue_code(), "value");
        assert_eq!(CoreError::not_found("Patient/1").issue_code(), "not-found");
        assert_eq!(CoreError::conflict("cancelled").issue_code(), "conflict");
        assert_eq!(
            CoreError::too_many_requests("job limit").issue_code(),
            "too-many-requests"
        );
        assert_eq!(CoreError::processing("boom").issue_code(), "processing");
    }

    #[test]
    fn http_statuses_match_kinds() {
        assert_eq!(CoreError::structure("x").http_status(), 400);
        assert_eq!(CoreError::not_found("x").http_status(), 404);
        assert_eq!(CoreError::conflict("x").http_status(), 409);
        assert_eq!(CoreError::too_many_requests("x").http_status(), 429);
        assert_eq!(CoreError::processing("x").http_status(), 500);
    }

    #[test]
    fn json_errors_are_structural() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{ nope")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Structure);
        assert!(err.is_client_error());
    }

    #[test]
    fn value_error_carries_field() {
        let err = CoreError::value("compartment.rule", "must be one of identical|matching");
        assert!(err.to_string().contains("compartment.rule"));
    }
}
