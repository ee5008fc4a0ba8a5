use thiserror::Error;

/// Errors from storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    #[error("Resource already exists: {resource_type}/{id}")]
    AlreadyExists { resource_type: String, id: String },

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Storage failure: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn already_exists(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
