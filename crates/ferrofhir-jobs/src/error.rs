use thiserror::Error;

/// Errors from the bulk job manager.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is {status} and cannot be cancelled")]
    CancelConflict { id: String, status: String },

    #[error("Concurrent {kind} job limit of {limit} reached")]
    TooManyJobs { kind: String, limit: usize },

    #[error("Import input is empty")]
    EmptyInput,

    #[error("Bulk edit requires non-empty criteria")]
    MissingCriteria,

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl JobError {
    /// Suggested HTTP status for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::CancelConflict { .. } => 409,
            Self::TooManyJobs { .. } => 429,
            Self::EmptyInput | Self::MissingCriteria => 400,
            Self::Storage(_) => 500,
        }
    }
}
