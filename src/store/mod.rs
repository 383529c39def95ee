//! Key-Value Store
//! Mission: Hold refresh-token records and rate-limit windows behind one swappable interface
//!
//! The ledger and the admission controller only ever touch a single key per
//! operation, so the trait exposes atomic single-key primitives: take-and-delete
//! for refresh token rotation and fixed-window increment for admission. A
//! networked backend must implement both as one atomic server-side operation.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fixed-window counter state after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub window_start_ms: u64,
    pub count: u32,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or overwrite. `ttl` bounds how long the value is retained;
    /// `None` keeps it until deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically read and remove a value. At most one caller observes it.
    ///
    /// Ignores the TTL: a value past its TTL is still returned until `sweep`
    /// has dropped it. Callers that care about expiry carry their own.
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    /// Atomically advance the fixed window stored under `key`.
    ///
    /// Resets to `{window_start: now, count: 0}` when no record exists or
    /// `now - window_start > window`, then increments the count. The record
    /// becomes sweepable once it is more than twice the window stale.
    async fn increment_window(&self, key: &str, now_ms: u64, window: Duration)
        -> StoreResult<WindowState>;

    /// Drop expired values and stale windows. Returns the number removed.
    async fn sweep(&self, now_ms: u64) -> StoreResult<usize>;
}
