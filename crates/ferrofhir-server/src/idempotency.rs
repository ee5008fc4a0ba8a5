//! Idempotency key store with TTL eviction.
//!
//! Entries are evicted lazily on access and by an hourly cleanup task
//! stopped through a close-once signal. The clock is injectable so TTL
//! behavior is testable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Clock function used for created/expiry stamps.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// One cached response keyed by idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// In-memory idempotency store.
pub struct IdempotencyStore {
    entries: RwLock<HashMap<String, IdempotencyRecord>>,
    ttl: Duration,
    clock: Clock,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl IdempotencyStore {
    /// Default TTL is 24 hours.
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(24 * 3600))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock: Arc::new(OffsetDateTime::now_utc),
            stop: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache a response. `created_at` and `expires_at` are stamped here.
    pub fn set(
        &self,
        key: &str,
        method: &str,
        path: &str,
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) {
        let now = (self.clock)();
        let record = IdempotencyRecord {
            key: key.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            headers,
            body,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.entries
            .write()
            .expect("idempotency lock poisoned")
            .insert(key.to_string(), record);
    }

    /// Look up a key, evicting it first when expired. Returns a
    /// defensive copy.
    pub fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        let now = (self.clock)();
        {
            let entries = self.entries.read().expect("idempotency lock poisoned");
            match entries.get(key) {
                Some(record) if record.expires_at > now => return Some(record.clone()),
                None => return None,
                Some(_) => {} // expired; fall through to evict
            }
        }
        self.entries
            .write()
            .expect("idempotency lock poisoned")
            .remove(key);
        None
    }

    /// Remove every expired entry; returns the number evicted.
    pub fn purge_expired(&self) -> usize {
        let now = (self.clock)();
        let mut entries = self.entries.write().expect("idempotency lock poisoned");
        let before = entries.len();
        entries.retain(|_, record| record.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("idempotency lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the hourly cleanup loop. Calling more than once replaces
    /// the previous loop's stop signal.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) {
        let (tx, mut rx) = oneshot::channel();
        *self.stop.lock().expect("stop lock poisoned") = Some(tx);

        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.purge_expired();
                        if evicted > 0 {
                            debug!(evicted, "idempotency cleanup evicted expired entries");
                        }
                    }
                    _ = &mut rx => {
                        info!("idempotency cleanup stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Stop the cleanup loop. Safe to call repeatedly; only the first
    /// call closes the signal.
    pub fn stop(&self) {
        if let Some(tx) = self.stop.lock().expect("stop lock poisoned").take() {
            let _ = tx.send(());
        }
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn fixed_clock(epoch: Arc<AtomicI64>) -> Clock {
        Arc::new(move || {
            OffsetDateTime::from_unix_timestamp(epoch.load(Ordering::SeqCst)).unwrap()
        })
    }

    #[test]
    fn set_then_get_returns_copy() {
        let store = IdempotencyStore::new();
        store.set("k1", "POST", "/fhir/Patient", 201, vec![], b"body".to_vec());

        let mut fetched = store.get("k1").unwrap();
        fetched.body.clear();

        assert_eq!(store.get("k1").unwrap().body, b"body");
    }

    #[test]
    fn expired_entries_are_evicted_on_access() {
        let epoch = Arc::new(AtomicI64::new(1_000_000));
        let store =
            IdempotencyStore::with_ttl(Duration::from_secs(60)).with_clock(fixed_clock(epoch.clone()));
        store.set("k1", "POST", "/fhir/Patient", 201, vec![], vec![]);

        assert!(store.get("k1").is_some());

        epoch.store(1_000_061, Ordering::SeqCst);
        assert!(store.get("k1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn purge_expired_removes_only_stale_entries() {
        let epoch = Arc::new(AtomicI64::new(1_000_000));
        let store =
            IdempotencyStore::with_ttl(Duration::from_secs(60)).with_clock(fixed_clock(epoch.clone()));
        store.set("old", "POST", "/a", 201, vec![], vec![]);

        epoch.store(1_000_030, Ordering::SeqCst);
        store.set("fresh", "POST", "/b", 201, vec![], vec![]);

        epoch.store(1_000_070, Ordering::SeqCst);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.get("fresh").is_some());
    }

    #[tokio::test]
    async fn cleanup_loop_stops_on_signal() {
        let store = Arc::new(IdempotencyStore::new());
        store.start_cleanup(Duration::from_millis(10));
        store.stop();
        // A second stop is a no-op.
        store.stop();
    }

    #[tokio::test]
    async fn concurrent_sets_with_distinct_keys_all_land() {
        let store = Arc::new(IdempotencyStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(&format!("k{i}"), "POST", "/fhir/Patient", 201, vec![], vec![]);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len(), 32);
    }
}
