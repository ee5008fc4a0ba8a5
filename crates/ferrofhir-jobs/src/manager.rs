//! The bulk job manager: admission, processing, cancellation, status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, warn};

use ferrofhir_storage::{ResourceMatcher, ResourceStore};

use crate::error::JobError;
use crate::types::{BulkJob, EditOperation, JobKind, JobStatus};
use crate::validator::{BulkResourceValidator, DefaultResourceValidator};

const DEFAULT_MAX_ACTIVE_PER_KIND: usize = 5;

/// Manages bulk import and edit jobs.
///
/// Job state lives behind one mutex so the active-count check and the
/// job insertion are atomic with respect to the concurrency limit.
pub struct BulkJobManager {
    jobs: Mutex<HashMap<String, BulkJob>>,
    matcher: Arc<dyn ResourceMatcher>,
    store: Option<Arc<dyn ResourceStore>>,
    validator: Arc<dyn BulkResourceValidator>,
    max_active_per_kind: usize,
}

impl BulkJobManager {
    pub fn new(matcher: Arc<dyn ResourceMatcher>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            matcher,
            store: None,
            validator: Arc::new(DefaultResourceValidator),
            max_active_per_kind: DEFAULT_MAX_ACTIVE_PER_KIND,
        }
    }

    /// Persist edit results through this store; without one, edits are
    /// match-and-count only.
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn BulkResourceValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_max_active(mut self, limit: usize) -> Self {
        self.max_active_per_kind = limit;
        self
    }

    /// Admit a job: the active-per-kind check and the insertion happen
    /// under one lock.
    fn admit(&self, job: BulkJob) -> Result<String, JobError> {
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        let active = jobs
            .values()
            .filter(|j| j.kind == job.kind && j.status.is_active())
            .count();
        if active >= self.max_active_per_kind {
            return Err(JobError::TooManyJobs {
                kind: job.kind.to_string(),
                limit: self.max_active_per_kind,
            });
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        Ok(id)
    }

    /// Store the finished state unless the job was cancelled meanwhile.
    fn finish(&self, mut job: BulkJob, status: JobStatus) -> BulkJob {
        job.status = status;
        job.completed_time = Some(OffsetDateTime::now_utc());

        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        match jobs.get(&job.id) {
            Some(current) if current.status == JobStatus::Cancelled => current.clone(),
            _ => {
                jobs.insert(job.id.clone(), job.clone());
                job
            }
        }
    }

    /// Import NDJSON content. Blank lines are tolerated; a line of
    /// invalid JSON counts as a processed error and processing
    /// continues.
    pub async fn start_import(
        &self,
        resource_type: &str,
        ndjson: &[u8],
    ) -> Result<BulkJob, JobError> {
        let content = String::from_utf8_lossy(ndjson);
        if content.trim().is_empty() {
            return Err(JobError::EmptyInput);
        }

        let mut job = BulkJob::new(JobKind::Import, resource_type);
        self.admit(job.clone())?;
        info!(job = %job.id, resource_type, "bulk import started");

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            job.counters.total += 1;
            job.counters.processed += 1;

            let resource: Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(e) => {
                    job.counters.error += 1;
                    job.errors.push(format!("line {}: invalid JSON: {e}", line_no + 1));
                    continue;
                }
            };

            match self.validator.validate(resource_type, &resource) {
                Ok(()) => {
                    if let Some(store) = &self.store
                        && let Err(e) = store.create(&resource).await
                    {
                        job.counters.error += 1;
                        job.errors.push(format!("line {}: {e}", line_no + 1));
                        continue;
                    }
                    job.counters.success += 1;
                }
                Err(reason) => {
                    job.counters.error += 1;
                    job.errors.push(format!("line {}: {reason}", line_no + 1));
                }
            }
        }

        Ok(self.finish(job, JobStatus::Completed))
    }

    /// Match resources by criteria and apply a shallow key-replacement
    /// patch to each.
    pub async fn start_bulk_update(
        &self,
        resource_type: &str,
        criteria: HashMap<String, String>,
        patch: Value,
        operation: EditOperation,
    ) -> Result<BulkJob, JobError> {
        if criteria.is_empty() {
            return Err(JobError::MissingCriteria);
        }

        let mut job = BulkJob::new(JobKind::Edit, resource_type);
        job.operation = Some(operation);
        job.criteria = criteria.clone();
        job.patch = Some(patch.clone());
        self.admit(job.clone())?;
        info!(job = %job.id, resource_type, ?operation, "bulk edit started");

        let matched = match self.matcher.match_resources(resource_type, &criteria).await {
            Ok(matched) => matched,
            Err(e) => {
                job.errors.push(e.to_string());
                return Ok(self.finish(job, JobStatus::Error));
            }
        };

        job.counters.total = matched.len() as u64;
        for mut resource in matched {
            job.counters.processed += 1;
            if let (Value::Object(target), Value::Object(changes)) = (&mut resource, &patch) {
                for (key, value) in changes {
                    target.insert(key.clone(), value.clone());
                }
            }
            if let Some(store) = &self.store {
                if let Err(e) = store.update(&resource).await {
                    job.counters.error += 1;
                    job.errors.push(e.to_string());
                    continue;
                }
            }
            job.counters.success += 1;
            job.counters.modified += 1;
        }

        Ok(self.finish(job, JobStatus::Completed))
    }

    /// Match resources by criteria and delete (or just count) them.
    pub async fn start_bulk_delete(
        &self,
        resource_type: &str,
        criteria: HashMap<String, String>,
    ) -> Result<BulkJob, JobError> {
        if criteria.is_empty() {
            return Err(JobError::MissingCriteria);
        }

        let mut job = BulkJob::new(JobKind::Edit, resource_type);
        job.operation = Some(EditOperation::Delete);
        job.criteria = criteria.clone();
        self.admit(job.clone())?;
        info!(job = %job.id, resource_type, "bulk delete started");

        let matched = match self.matcher.match_resources(resource_type, &criteria).await {
            Ok(matched) => matched,
            Err(e) => {
                job.errors.push(e.to_string());
                return Ok(self.finish(job, JobStatus::Error));
            }
        };

        job.counters.total = matched.len() as u64;
        for resource in matched {
            job.counters.processed += 1;
            if let Some(store) = &self.store {
                let id = resource.get("id").and_then(|v| v.as_str()).unwrap_or("");
                if let Err(e) = store.delete(resource_type, id).await {
                    job.counters.error += 1;
                    job.errors.push(e.to_string());
                    continue;
                }
            }
            job.counters.success += 1;
        }

        Ok(self.finish(job, JobStatus::Completed))
    }

    /// Cancel a job. Only pending or processing jobs can be cancelled;
    /// cancelling a finished job is a conflict, an unknown id is not
    /// found.
    pub fn cancel(&self, id: &str) -> Result<BulkJob, JobError> {
        let mut jobs = self.jobs.lock().expect("job lock poisoned");
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        if !job.status.is_active() {
            return Err(JobError::CancelConflict {
                id: id.to_string(),
                status: job.status.as_str().to_string(),
            });
        }

        job.status = JobStatus::Cancelled;
        job.completed_time = Some(OffsetDateTime::now_utc());
        warn!(job = %id, "bulk job cancelled");
        Ok(job.clone())
    }

    pub fn get_status(&self, id: &str) -> Result<BulkJob, JobError> {
        self.jobs
            .lock()
            .expect("job lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Most recent jobs first, at most `limit`.
    pub fn list(&self, limit: usize) -> Vec<BulkJob> {
        let jobs = self.jobs.lock().expect("job lock poisoned");
        let mut all: Vec<BulkJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.request_time.cmp(&a.request_time));
        all.truncate(limit);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrofhir_storage::InMemoryResourceStore;
    use serde_json::json;

    fn manager_with_store() -> (BulkJobManager, Arc<InMemoryResourceStore>) {
        let store = Arc::new(InMemoryResourceStore::new());
        let manager = BulkJobManager::new(store.clone()).with_store(store.clone());
        (manager, store)
    }

    #[tokio::test]
    async fn import_tallies_valid_and_malformed_lines() {
        let (manager, _) = manager_with_store();
        let ndjson = concat!(
            "{\"resourceType\":\"Patient\",\"id\":\"p1\"}\n",
            "\n",
            "{\"resourceType\":\"Patient\",\"id\":\"p2\"}\n",
            "{not json}\n",
        );

        let job = manager.start_import("Patient", ndjson.as_bytes()).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.counters.total, 3);
        assert_eq!(job.counters.processed, 3);
        assert_eq!(job.counters.success, 2);
        assert_eq!(job.counters.error, 1);
        assert_eq!(job.errors.len(), 1);
        assert!(job.completed_time.is_some());
    }

    #[tokio::test]
    async fn import_rejects_empty_input() {
        let (manager, _) = manager_with_store();
        assert!(matches!(
            manager.start_import("Patient", b"  \n ").await,
            Err(JobError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn import_validation_failures_count_as_errors() {
        let (manager, _) = manager_with_store();
        let ndjson = "{\"resourceType\":\"Observation\",\"id\":\"o1\"}\n";
        let job = manager.start_import("Patient", ndjson.as_bytes()).await.unwrap();
        assert_eq!(job.counters.success, 0);
        assert_eq!(job.counters.error, 1);
    }

    #[tokio::test]
    async fn bulk_update_patches_matched_resources() {
        let (manager, store) = manager_with_store();
        store
            .create(&json!({"resourceType": "Patient", "id": "p1", "status": "draft"}))
            .await
            .unwrap();
        store
            .create(&json!({"resourceType": "Patient", "id": "p2", "status": "active"}))
            .await
            .unwrap();

        let criteria = HashMap::from([("status".to_string(), "draft".to_string())]);
        let job = manager
            .start_bulk_update(
                "Patient",
                criteria,
                json!({"status": "active"}),
                EditOperation::Update,
            )
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.counters.total, 1);
        assert_eq!(job.counters.modified, 1);

        let patched = store.read("Patient", "p1").await.unwrap().unwrap();
        assert_eq!(patched.resource["status"], "active");
    }

    #[tokio::test]
    async fn bulk_update_requires_criteria() {
        let (manager, _) = manager_with_store();
        assert!(matches!(
            manager
                .start_bulk_update("Patient", HashMap::new(), json!({}), EditOperation::Update)
                .await,
            Err(JobError::MissingCriteria)
        ));
    }

    #[tokio::test]
    async fn bulk_delete_counts_and_removes() {
        let (manager, store) = manager_with_store();
        store
            .create(&json!({"resourceType": "Patient", "id": "p1", "status": "draft"}))
            .await
            .unwrap();

        let criteria = HashMap::from([("status".to_string(), "draft".to_string())]);
        let job = manager.start_bulk_delete("Patient", criteria).await.unwrap();
        assert_eq!(job.counters.total, 1);
        assert_eq!(job.counters.success, 1);
        assert!(store.read("Patient", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_transitions_and_conflicts() {
        let (manager, _) = manager_with_store();
        let job = manager
            .start_import("Patient", b"{\"resourceType\":\"Patient\",\"id\":\"p1\"}")
            .await
            .unwrap();

        // The job finished, so cancelling is a conflict.
        assert!(matches!(
            manager.cancel(&job.id),
            Err(JobError::CancelConflict { .. })
        ));
        assert!(matches!(
            manager.cancel("no-such-job"),
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancel_active_job_sets_terminal_state() {
        let (manager, _) = manager_with_store();
        // Insert an active job directly through admission.
        let job = BulkJob::new(JobKind::Edit, "Patient");
        let id = manager.admit(job).unwrap();

        let cancelled = manager.cancel(&id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.completed_time.is_some());
    }

    #[tokio::test]
    async fn admission_enforces_per_kind_limit() {
        let (manager, _) = manager_with_store();
        let manager = manager.with_max_active(2);

        for _ in 0..2 {
            manager.admit(BulkJob::new(JobKind::Import, "Patient")).unwrap();
        }
        assert!(matches!(
            manager.admit(BulkJob::new(JobKind::Import, "Patient")),
            Err(JobError::TooManyJobs { .. })
        ));
        // The other kind has its own limit.
        assert!(manager.admit(BulkJob::new(JobKind::Edit, "Patient")).is_ok());
    }

    #[tokio::test]
    async fn list_returns_newest_first_with_limit() {
        let (manager, _) = manager_with_store();
        for i in 0..3 {
            manager
                .start_import(
                    "Patient",
                    format!("{{\"resourceType\":\"Patient\",\"id\":\"p{i}\"}}").as_bytes(),
                )
                .await
                .unwrap();
        }
        assert_eq!(manager.list(2).len(), 2);
        assert_eq!(manager.list(10).len(), 3);
    }
}
