use thiserror::Error;

/// Errors from the notification engine and its repositories.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Invalid subscription criteria: {0}")]
    InvalidCriteria(String),

    #[error("Repository failure: {0}")]
    Repository(String),

    #[error("Delivery failure: {0}")]
    Delivery(String),
}

impl SubscriptionError {
    pub fn invalid_criteria(message: impl Into<String>) -> Self {
        Self::InvalidCriteria(message.into())
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery(message.into())
    }
}
