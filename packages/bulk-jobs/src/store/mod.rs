//! Job/item persistence boundary.
//!
//! Every item transition is an atomic conditional update against the item's
//! status (and lease token, for write-backs). A `false` or empty return means
//! the expected state no longer held: a benign claim conflict, not an error.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage (always available)
//! - `PostgresStore` - PostgreSQL storage (requires `postgres` feature)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::item::{Item, ItemErrorKind};
use crate::types::job::Job;
use crate::types::page::PageMode;

/// Error recorded on pending items found with no attempts left.
pub const EXHAUSTED_ERROR: &str = "max attempts exceeded";

/// Storage for jobs and their items.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job and its items atomically.
    ///
    /// Items sharing a canonical key with an earlier item are dropped. Returns
    /// the items actually stored, ordered by `idx`.
    async fn insert_job_with_items(&self, job: &Job, items: &[Item]) -> Result<Vec<Item>>;

    /// Claim up to `limit` claimable items of one phase.
    ///
    /// Each item moves `pending -> processing` independently, gets a fresh
    /// lease and has `attempts` incremented. Items of a cancelled job, items
    /// still in retry backoff and items with no attempts left are skipped.
    /// Returned items are ordered by `idx`.
    async fn claim_items(
        &self,
        job_id: Uuid,
        phase: PageMode,
        limit: usize,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Vec<Item>>;

    /// `processing -> completed`, storing the result and clearing the lease.
    async fn complete_item(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        result: &serde_json::Value,
    ) -> Result<bool>;

    /// `processing -> failed`, recording the error. `attempts` is unchanged.
    async fn fail_item(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        error: &str,
        kind: ItemErrorKind,
    ) -> Result<bool>;

    /// `processing -> pending`, not claimable before `available_at`.
    async fn retry_item(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        available_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Extend the lease of an item still held under `lease_token`.
    async fn heartbeat(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        lease_duration: Duration,
    ) -> Result<bool>;

    /// `processing (lease expired) -> pending` for every job. `attempts` is
    /// unchanged. Returns the number of items reclaimed.
    async fn reclaim_expired(&self) -> Result<u64>;

    /// `pending -> failed` for every pending item of the given phases.
    async fn fail_pending(
        &self,
        job_id: Uuid,
        phases: &[PageMode],
        error: &str,
        kind: ItemErrorKind,
    ) -> Result<u64>;

    /// `pending -> failed (exhausted)` for pending items of a phase whose
    /// attempts have reached the maximum.
    async fn fail_exhausted(&self, job_id: Uuid, phase: PageMode) -> Result<u64>;

    /// Get a job record.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Get a job and all of its items, ordered by `idx`.
    async fn get_job_status(&self, job_id: Uuid) -> Result<(Job, Vec<Item>)>;

    /// Jobs that are not cancelled and still have non-terminal items, oldest
    /// first.
    async fn active_job_ids(&self, limit: usize) -> Result<Vec<Uuid>>;

    /// Set or clear the cancel mark. Returns false if the job does not exist.
    async fn set_cancelled(&self, job_id: Uuid, at: Option<DateTime<Utc>>) -> Result<bool>;

    /// Completed and failed items with `idx > after_idx`, ordered by `idx`.
    async fn list_terminal_items(
        &self,
        job_id: Uuid,
        after_idx: Option<i32>,
        limit: usize,
    ) -> Result<Vec<Item>>;

    /// Completed and failed items with `idx <= up_to_idx` that became
    /// terminal at or after `since`, ordered by `idx`.
    async fn list_late_items(
        &self,
        job_id: Uuid,
        up_to_idx: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<Item>>;
}
