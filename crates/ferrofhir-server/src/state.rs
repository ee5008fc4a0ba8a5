//! Shared application state: every engine and store is explicitly
//! constructed here; no module-level mutable state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::error;

use ferrofhir_core::error::CoreError;
use ferrofhir_core::events::EventBroadcaster;
use ferrofhir_jobs::BulkJobManager;
use ferrofhir_notifications::{
    EngineConfig, InMemoryNotificationRepository, InMemorySubscriptionRepository,
    NotificationEngine,
};
use ferrofhir_scheduling::ScheduleStore;
use ferrofhir_search::{DynamicParamRegistry, SearchIndex};
use ferrofhir_storage::{InMemoryResourceStore, ResourceStore};

use crate::config::ServerConfig;
use crate::idempotency::IdempotencyStore;
use crate::middleware::conditional::{ConditionalSearcher, MatchOutcome};
use crate::operations::availability::AvailabilityService;
use crate::operations::graph::GraphTraverser;
use crate::operations::terminology::TerminologyService;
use crate::provenance::ProvenanceStore;

/// Everything the handlers and middleware need, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<InMemoryResourceStore>,
    pub events: EventBroadcaster,
    pub registry: Arc<DynamicParamRegistry>,
    pub index: Arc<SearchIndex>,
    pub idempotency: Arc<IdempotencyStore>,
    pub provenance: Arc<ProvenanceStore>,
    pub jobs: Arc<BulkJobManager>,
    pub subscriptions: Arc<InMemorySubscriptionRepository>,
    pub notifications: Arc<InMemoryNotificationRepository>,
    pub engine: Arc<NotificationEngine>,
    pub availability: Arc<AvailabilityService>,
    pub terminology: Arc<TerminologyService>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(InMemoryResourceStore::new());
        let events = EventBroadcaster::default();
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let notifications = Arc::new(InMemoryNotificationRepository::new());

        let engine_config = EngineConfig {
            refresh_interval: Duration::from_secs(config.notifications.refresh_secs),
            delivery_interval: Duration::from_secs(config.notifications.delivery_secs),
            expiry_interval: Duration::from_secs(config.notifications.expiry_secs),
            cleanup_interval: Duration::from_secs(config.notifications.cleanup_secs),
            delivery_batch_size: config.notifications.batch_size,
            max_attempts: config.notifications.max_attempts,
            ..EngineConfig::default()
        };
        let engine = Arc::new(NotificationEngine::new(
            subscriptions.clone(),
            notifications.clone(),
            engine_config,
        ));

        let idempotency = Arc::new(IdempotencyStore::with_ttl(Duration::from_secs(
            config.idempotency.ttl_hours * 3600,
        )));
        let jobs = Arc::new(
            BulkJobManager::new(store.clone())
                .with_store(store.clone())
                .with_max_active(config.jobs.max_active_per_kind),
        );
        let (shutdown, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            store: store.clone(),
            events,
            registry: Arc::new(DynamicParamRegistry::new()),
            index: Arc::new(SearchIndex::new()),
            idempotency,
            provenance: Arc::new(ProvenanceStore::new()),
            jobs,
            subscriptions,
            notifications,
            engine,
            availability: Arc::new(AvailabilityService::new(Arc::new(ScheduleStore::new()))),
            terminology: Arc::new(TerminologyService::new(store)),
            shutdown: Arc::new(shutdown),
        }
    }

    /// A graph traverser wired to the resource store for every type it
    /// may encounter (the store is type-agnostic, so one fetcher fits
    /// all registered types).
    pub fn graph_traverser(&self, resource_types: &[&str]) -> GraphTraverser {
        let mut traverser = GraphTraverser::new();
        for resource_type in resource_types {
            traverser.register(resource_type, self.store.clone());
        }
        traverser
    }

    /// Spawn the notification scheduler, the idempotency cleanup loop,
    /// and the event pump feeding the engine and the search index.
    pub fn spawn_background(&self) {
        self.idempotency.start_cleanup(Duration::from_secs(
            self.config.idempotency.cleanup_minutes * 60,
        ));

        let engine = self.engine.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            engine.run(shutdown_rx).await;
        });

        let engine = self.engine.clone();
        let registry = self.registry.clone();
        let index = self.index.clone();
        let mut receiver = self.events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                index.index_resource(&registry, &event.resource);
                if let Err(e) = engine.on_event(&event).await {
                    error!(error = %e, "event fan-out failed");
                }
            }
        });
    }

    /// Signal every background task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.idempotency.stop();
    }
}

/// `If-None-Exist` searcher backed by the resource store.
pub struct StoreSearcher(pub Arc<InMemoryResourceStore>);

#[async_trait]
impl ConditionalSearcher for StoreSearcher {
    async fn count_matches(
        &self,
        resource_type: &str,
        params: &[(String, String)],
    ) -> Result<MatchOutcome, CoreError> {
        let criteria = params.iter().cloned().collect();
        let matched = self
            .0
            .search(resource_type, &criteria)
            .await
            .map_err(|e| CoreError::processing(e.to_string()))?;
        Ok(MatchOutcome {
            count: matched.len(),
            fhir_id: matched.first().map(|stored| stored.id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn store_searcher_counts_matches() {
        let store = Arc::new(InMemoryResourceStore::new());
        store
            .create(&json!({
                "resourceType": "Patient",
                "id": "p1",
                "identifier": [{"value": "12345"}]
            }))
            .await
            .unwrap();

        let searcher = StoreSearcher(store);
        let outcome = searcher
            .count_matches(
                "Patient",
                &[("identifier.value".to_string(), "12345".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.fhir_id.as_deref(), Some("p1"));

        let none = searcher
            .count_matches(
                "Patient",
                &[("identifier.value".to_string(), "99999".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(none.count, 0);
    }

    #[tokio::test]
    async fn state_constructs_and_shuts_down() {
        let state = AppState::new(ServerConfig::default());
        state.spawn_background();
        state.shutdown();
    }
}
