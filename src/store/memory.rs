//! In-memory store backed by mutex-guarded maps.
//!
//! Process-local only: contents are lost on restart and not shared between
//! instances.

use crate::clock::SharedClock;
use crate::store::{KeyValueStore, StoreResult, WindowState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

struct ValueEntry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl ValueEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if now_ms >= at)
    }
}

struct WindowEntry {
    window_start_ms: u64,
    count: u32,
    stale_after_ms: u64,
}

/// Thread-safe in-memory [`KeyValueStore`].
#[derive(Clone)]
pub struct MemoryStore {
    clock: SharedClock,
    values: Arc<Mutex<HashMap<String, ValueEntry>>>,
    windows: Arc<Mutex<HashMap<String, WindowEntry>>>,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            values: Arc::new(Mutex::new(HashMap::new())),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live values plus tracked windows.
    pub fn len(&self) -> usize {
        self.values.lock().len() + self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now_ms();
        let values = self.values.lock();

        match values.get(key) {
            Some(entry) if entry.is_expired(now) => Ok(None),
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at_ms = ttl.map(|ttl| self.clock.now_ms() + ttl.as_millis() as u64);
        self.values.lock().insert(
            key.to_string(),
            ValueEntry {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now_ms();
        Ok(self
            .values
            .lock()
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.values.lock().remove(key).map(|entry| entry.value))
    }

    async fn increment_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
    ) -> StoreResult<WindowState> {
        let window_ms = window.as_millis() as u64;
        let mut windows = self.windows.lock();

        let entry = windows.entry(key.to_string()).or_insert(WindowEntry {
            window_start_ms: now_ms,
            count: 0,
            stale_after_ms: now_ms + window_ms * 2,
        });

        if now_ms.saturating_sub(entry.window_start_ms) > window_ms {
            entry.window_start_ms = now_ms;
            entry.count = 0;
            entry.stale_after_ms = now_ms + window_ms * 2;
        }

        entry.count = entry.count.saturating_add(1);

        Ok(WindowState {
            window_start_ms: entry.window_start_ms,
            count: entry.count,
        })
    }

    async fn sweep(&self, now_ms: u64) -> StoreResult<usize> {
        let mut removed = 0;

        {
            let mut values = self.values.lock();
            let before = values.len();
            values.retain(|_, entry| !entry.is_expired(now_ms));
            removed += before - values.len();
        }

        {
            let mut windows = self.windows.lock();
            let before = windows.len();
            windows.retain(|_, entry| now_ms <= entry.stale_after_ms);
            removed += before - windows.len();
        }

        if removed > 0 {
            debug!(removed, "Swept expired store entries");
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn create_test_store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = MemoryStore::new(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let (store, _clock) = create_test_store();

        store.set("key1", "value1".to_string(), None).await.unwrap();
        assert_eq!(store.get("key1").await.unwrap().as_deref(), Some("value1"));

        assert!(store.delete("key1").await.unwrap());
        assert_eq!(store.get("key1").await.unwrap(), None);

        // Deleting again is a no-op
        assert!(!store.delete("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_returns_value_once() {
        let (store, _clock) = create_test_store();

        store.set("once", "v".to_string(), None).await.unwrap();
        assert_eq!(store.take("once").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.take("once").await.unwrap(), None);
        assert_eq!(store.get("once").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (store, clock) = create_test_store();

        store
            .set("temp", "value".to_string(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(store.get("temp").await.unwrap().is_some());

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.get("temp").await.unwrap(), None);

        // Expired but not yet swept: take still hands it out once
        assert_eq!(store.take("temp").await.unwrap().as_deref(), Some("value"));
        assert_eq!(store.take("temp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_after_sweep_finds_nothing() {
        let (store, clock) = create_test_store();

        store
            .set("temp", "value".to_string(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(store.sweep(clock.now_ms()).await.unwrap(), 1);
        assert_eq!(store.take("temp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_window_counts_and_resets() {
        let (store, clock) = create_test_store();
        let window = Duration::from_secs(60);
        let start = clock.now_ms();

        for expected in 1..=3 {
            let state = store.increment_window("w", clock.now_ms(), window).await.unwrap();
            assert_eq!(state.count, expected);
            assert_eq!(state.window_start_ms, start);
        }

        // Exactly one window later is still the same window
        clock.advance(window);
        let state = store.increment_window("w", clock.now_ms(), window).await.unwrap();
        assert_eq!(state.count, 4);

        clock.advance(Duration::from_millis(1));
        let state = store.increment_window("w", clock.now_ms(), window).await.unwrap();
        assert_eq!(state.count, 1);
        assert_eq!(state.window_start_ms, clock.now_ms());
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_windows_and_expired_values() {
        let (store, clock) = create_test_store();
        let window = Duration::from_secs(60);

        store.increment_window("stale", clock.now_ms(), window).await.unwrap();
        store
            .set("short", "x".to_string(), Some(Duration::from_secs(30)))
            .await
            .unwrap();
        store.set("forever", "y".to_string(), None).await.unwrap();

        // One window later nothing is more than 2x stale
        clock.advance(window);
        store.increment_window("fresh", clock.now_ms(), window).await.unwrap();
        assert_eq!(store.sweep(clock.now_ms()).await.unwrap(), 1); // "short"

        clock.advance(window + Duration::from_millis(1));
        assert_eq!(store.sweep(clock.now_ms()).await.unwrap(), 1); // "stale"
        assert_eq!(store.len(), 2); // "forever" + "fresh"
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_single_winner() {
        let (store, _clock) = create_test_store();
        store.set("race", "v".to_string(), None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.take("race").await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
