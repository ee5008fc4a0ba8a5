//! Persistence traits for subscriptions and notification records, plus
//! in-memory implementations.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::SubscriptionError;
use crate::types::{NotificationRecord, NotificationStatus, SubscriptionInfo, SubscriptionStatus};

/// Subscription persistence as the engine sees it.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// All subscriptions eligible for matching.
    async fn active_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, SubscriptionError>;

    /// Subscriptions whose end time has passed but are still active.
    async fn expired_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, SubscriptionError>;

    async fn set_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), SubscriptionError>;
}

/// Notification record persistence.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, record: NotificationRecord) -> Result<(), SubscriptionError>;

    /// Up to `limit` pending records due at or before `now`.
    async fn fetch_due(
        &self,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<Vec<NotificationRecord>, SubscriptionError>;

    /// Persist a mutated record (status, attempts, timestamps).
    async fn update(&self, record: &NotificationRecord) -> Result<(), SubscriptionError>;

    /// Delete delivered records older than `delivered_before` and
    /// abandoned records older than `abandoned_before`; returns the
    /// number removed.
    async fn cleanup(
        &self,
        delivered_before: OffsetDateTime,
        abandoned_before: OffsetDateTime,
    ) -> Result<u64, SubscriptionError>;
}

#[derive(Debug, Clone)]
struct SubscriptionRow {
    info: SubscriptionInfo,
    status: SubscriptionStatus,
    end: Option<OffsetDateTime>,
}

/// In-memory subscription repository.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    rows: RwLock<HashMap<String, SubscriptionRow>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, info: SubscriptionInfo, end: Option<OffsetDateTime>) {
        let mut rows = self.rows.write().expect("subscription lock poisoned");
        rows.insert(
            info.id.clone(),
            SubscriptionRow {
                info,
                status: SubscriptionStatus::Active,
                end,
            },
        );
    }

    pub fn status_of(&self, id: &str) -> Option<SubscriptionStatus> {
        self.rows
            .read()
            .expect("subscription lock poisoned")
            .get(id)
            .map(|row| row.status)
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn active_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, SubscriptionError> {
        let rows = self.rows.read().expect("subscription lock poisoned");
        let mut active: Vec<SubscriptionInfo> = rows
            .values()
            .filter(|row| row.status == SubscriptionStatus::Active)
            .map(|row| row.info.clone())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn expired_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, SubscriptionError> {
        let now = OffsetDateTime::now_utc();
        let rows = self.rows.read().expect("subscription lock poisoned");
        Ok(rows
            .values()
            .filter(|row| {
                row.status == SubscriptionStatus::Active
                    && row.end.is_some_and(|end| end <= now)
            })
            .map(|row| row.info.clone())
            .collect())
    }

    async fn set_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), SubscriptionError> {
        let mut rows = self.rows.write().expect("subscription lock poisoned");
        match rows.get_mut(id) {
            Some(row) => {
                row.status = status;
                Ok(())
            }
            None => Err(SubscriptionError::repository(format!(
                "unknown subscription '{id}'"
            ))),
        }
    }
}

/// In-memory notification repository.
#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    records: RwLock<HashMap<String, NotificationRecord>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.records
            .read()
            .expect("notification lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn all(&self) -> Vec<NotificationRecord> {
        let records = self.records.read().expect("notification lock poisoned");
        let mut all: Vec<NotificationRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(&self, record: NotificationRecord) -> Result<(), SubscriptionError> {
        self.records
            .write()
            .expect("notification lock poisoned")
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn fetch_due(
        &self,
        limit: usize,
        now: OffsetDateTime,
    ) -> Result<Vec<NotificationRecord>, SubscriptionError> {
        let records = self.records.read().expect("notification lock poisoned");
        let mut due: Vec<NotificationRecord> = records
            .values()
            .filter(|r| r.status == NotificationStatus::Pending && r.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn update(&self, record: &NotificationRecord) -> Result<(), SubscriptionError> {
        self.records
            .write()
            .expect("notification lock poisoned")
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn cleanup(
        &self,
        delivered_before: OffsetDateTime,
        abandoned_before: OffsetDateTime,
    ) -> Result<u64, SubscriptionError> {
        let mut records = self.records.write().expect("notification lock poisoned");
        let before = records.len();
        records.retain(|_, r| match r.status {
            NotificationStatus::Delivered => {
                r.delivered_at.is_none_or(|at| at > delivered_before)
            }
            NotificationStatus::Abandoned => r.next_attempt_at > abandoned_before,
            _ => true,
        });
        Ok((before - records.len()) as u64)
    }
}
