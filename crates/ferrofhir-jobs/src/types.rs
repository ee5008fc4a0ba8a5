use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Import,
    Edit,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Edit => write!(f, "edit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Active jobs count against the concurrency bound.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOperation {
    Update,
    Patch,
    Delete,
}

/// Row tallies for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub modified: u64,
    pub error: u64,
}

/// One bulk job: import or edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJob {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub resource_type: String,
    pub counters: JobCounters,
    pub errors: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub request_time: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_time: Option<OffsetDateTime>,
    /// Edit jobs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<EditOperation>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub criteria: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Value>,
}

impl BulkJob {
    pub fn new(kind: JobKind, resource_type: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Processing,
            resource_type: resource_type.to_string(),
            counters: JobCounters::default(),
            errors: Vec::new(),
            request_time: OffsetDateTime::now_utc(),
            completed_time: None,
            operation: None,
            criteria: HashMap::new(),
            patch: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_statuses() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Processing.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Error.is_active());
        assert!(!JobStatus::Cancelled.is_active());
    }

    #[test]
    fn job_serializes_without_empty_edit_fields() {
        let job = BulkJob::new(JobKind::Import, "Patient");
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("operation").is_none());
        assert!(json.get("criteria").is_none());
        assert!(json.get("patch").is_none());
        assert_eq!(json["status"], "processing");
    }
}
