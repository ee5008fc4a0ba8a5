//! Bulk operation jobs: NDJSON import and criteria-matched edits.
//!
//! Jobs are admitted under a per-kind concurrency bound, tracked by id,
//! and cancellable while non-terminal. Row-level failures are recorded
//! per job and never abort processing.

pub mod manager;
pub mod types;
pub mod validator;

mod error;

pub use error::JobError;
pub use manager::BulkJobManager;
pub use types::{BulkJob, EditOperation, JobCounters, JobKind, JobStatus};
pub use validator::{BulkResourceValidator, DefaultResourceValidator};
