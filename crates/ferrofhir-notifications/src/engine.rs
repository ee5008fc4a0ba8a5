//! The notification engine: subscription cache, event fan-out, delivery
//! worker, expiry, and retention cleanup on one cooperative scheduler.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use ferrofhir_core::events::ResourceEvent;

use crate::criteria::ParsedCriteria;
use crate::delivery::DeliveryClient;
use crate::error::SubscriptionError;
use crate::repository::{NotificationRepository, SubscriptionRepository};
use crate::types::{
    NotificationRecord, NotificationStatus, SubscriptionInfo, SubscriptionStatus,
};

/// Retry schedule; the last delay repeats for every later attempt.
const BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(900),
    Duration::from_secs(3600),
];

/// Delay before the next attempt after `attempt` failures (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let index = (attempt.max(1) as usize - 1).min(BACKOFF_SCHEDULE.len() - 1);
    BACKOFF_SCHEDULE[index]
}

/// Apply one delivery failure to a record: bump the attempt count,
/// record the reason, and either schedule the next attempt or abandon.
/// Returns true when the record was abandoned.
pub fn apply_failure(record: &mut NotificationRecord, reason: &str, now: OffsetDateTime) -> bool {
    record.attempt_count += 1;
    record.last_error = Some(reason.to_string());
    if record.attempt_count >= record.max_attempts {
        record.status = NotificationStatus::Abandoned;
        true
    } else {
        record.status = NotificationStatus::Pending;
        record.next_attempt_at = now + backoff_delay(record.attempt_count);
        false
    }
}

/// Engine tunables; the defaults are the production values.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub refresh_interval: Duration,
    pub delivery_interval: Duration,
    pub expiry_interval: Duration,
    pub cleanup_interval: Duration,
    pub delivery_batch_size: usize,
    pub max_attempts: u32,
    pub delivered_retention: Duration,
    pub abandoned_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            delivery_interval: Duration::from_secs(5),
            expiry_interval: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(3600),
            delivery_batch_size: 50,
            max_attempts: 5,
            delivered_retention: Duration::from_secs(30 * 24 * 3600),
            abandoned_retention: Duration::from_secs(90 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSubscription {
    info: SubscriptionInfo,
    criteria: ParsedCriteria,
}

/// The long-running notification engine.
pub struct NotificationEngine {
    subscriptions: Arc<dyn SubscriptionRepository>,
    notifications: Arc<dyn NotificationRepository>,
    delivery: DeliveryClient,
    cache: ArcSwap<Vec<CachedSubscription>>,
    config: EngineConfig,
}

impl NotificationEngine {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        notifications: Arc<dyn NotificationRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            subscriptions,
            notifications,
            delivery: DeliveryClient::new(),
            cache: ArcSwap::from_pointee(Vec::new()),
            config,
        }
    }

    pub fn with_delivery_client(mut self, delivery: DeliveryClient) -> Self {
        self.delivery = delivery;
        self
    }

    /// Replace the cached subscription list from the repository.
    /// Entries with unparseable criteria are skipped.
    pub async fn refresh_cache(&self) -> Result<usize, SubscriptionError> {
        let subscriptions = self.subscriptions.active_subscriptions().await?;
        let mut cached = Vec::with_capacity(subscriptions.len());
        for info in subscriptions {
            match ParsedCriteria::parse(&info.criteria) {
                Ok(criteria) => cached.push(CachedSubscription { info, criteria }),
                Err(e) => {
                    warn!(subscription = %info.id, error = %e, "skipping subscription with bad criteria");
                }
            }
        }
        let count = cached.len();
        self.cache.store(Arc::new(cached));
        debug!(count, "subscription cache refreshed");
        Ok(count)
    }

    /// Match one resource event against the cached subscriptions and
    /// enqueue a pending notification per match.
    pub async fn on_event(&self, event: &ResourceEvent) -> Result<usize, SubscriptionError> {
        let cache = self.cache.load();
        let now = OffsetDateTime::now_utc();
        let mut created = 0;

        for cached in cache.iter() {
            if !cached.criteria.matches(&event.resource_type, &event.resource) {
                continue;
            }
            let record = NotificationRecord::pending(
                &cached.info,
                &event.resource_type,
                &event.resource_id,
                event.action,
                event.resource.clone(),
                self.config.max_attempts,
                now,
            );
            self.notifications.insert(record).await?;
            created += 1;
        }

        if created > 0 {
            debug!(
                resource = %format!("{}/{}", event.resource_type, event.resource_id),
                count = created,
                "notifications enqueued"
            );
        }
        Ok(created)
    }

    /// Deliver one batch of due notifications.
    pub async fn deliver_due(&self) -> Result<usize, SubscriptionError> {
        let now = OffsetDateTime::now_utc();
        let due = self
            .notifications
            .fetch_due(self.config.delivery_batch_size, now)
            .await?;
        let mut delivered = 0;

        for mut record in due {
            record.status = NotificationStatus::Processing;
            self.notifications.update(&record).await?;

            match self.delivery.deliver(&record).await {
                Ok(()) => {
                    record.status = NotificationStatus::Delivered;
                    record.attempt_count += 1;
                    record.delivered_at = Some(OffsetDateTime::now_utc());
                    self.notifications.update(&record).await?;
                    delivered += 1;
                }
                Err(e) => {
                    self.mark_failed(&mut record, &e.to_string()).await?;
                }
            }
        }

        Ok(delivered)
    }

    async fn mark_failed(
        &self,
        record: &mut NotificationRecord,
        reason: &str,
    ) -> Result<(), SubscriptionError> {
        let abandoned = apply_failure(record, reason, OffsetDateTime::now_utc());
        self.notifications.update(record).await?;

        if abandoned {
            warn!(
                notification = %record.id,
                subscription = %record.subscription_id,
                error = reason,
                "notification abandoned after max attempts"
            );
            self.subscriptions
                .set_status(&record.subscription_id, SubscriptionStatus::Error)
                .await?;
        } else {
            debug!(
                notification = %record.id,
                attempt = record.attempt_count,
                error = reason,
                "notification delivery failed; retry scheduled"
            );
        }
        Ok(())
    }

    /// Turn off expired subscriptions; refreshes the cache when any
    /// changed.
    pub async fn check_expiry(&self) -> Result<usize, SubscriptionError> {
        let expired = self.subscriptions.expired_subscriptions().await?;
        for subscription in &expired {
            self.subscriptions
                .set_status(&subscription.id, SubscriptionStatus::Off)
                .await?;
            info!(subscription = %subscription.id, "subscription expired");
        }
        if !expired.is_empty() {
            self.refresh_cache().await?;
        }
        Ok(expired.len())
    }

    /// Delete old terminal records per the retention policy.
    pub async fn cleanup(&self) -> Result<u64, SubscriptionError> {
        let now = OffsetDateTime::now_utc();
        self.notifications
            .cleanup(
                now - self.config.delivered_retention,
                now - self.config.abandoned_retention,
            )
            .await
    }

    /// One-off channel handshake.
    pub async fn handshake(&self, endpoint: &str, headers: &[String]) -> bool {
        self.delivery.handshake(endpoint, headers).await
    }

    /// Run the scheduler until `shutdown` flips. The four tickers are
    /// serialized on this task; a failing tick logs and continues.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut refresh = interval(self.config.refresh_interval);
        let mut delivery = interval(self.config.delivery_interval);
        let mut expiry = interval(self.config.expiry_interval);
        let mut cleanup = interval(self.config.cleanup_interval);

        info!("notification engine started");

        loop {
            tokio::select! {
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh_cache().await {
                        error!(error = %e, "subscription cache refresh failed");
                    }
                }
                _ = delivery.tick() => {
                    match self.deliver_due().await {
                        Ok(count) if count > 0 => info!(count, "notifications delivered"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "notification delivery tick failed"),
                    }
                }
                _ = expiry.tick() => {
                    if let Err(e) = self.check_expiry().await {
                        error!(error = %e, "subscription expiry check failed");
                    }
                }
                _ = cleanup.tick() => {
                    match self.cleanup().await {
                        Ok(removed) if removed > 0 => info!(removed, "old notifications cleaned up"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "notification cleanup failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("notification engine stopping");
                    return;
                }
            }
        }
    }
}
