//! In-memory storage implementation for testing and development.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{JobStore, EXHAUSTED_ERROR};
use crate::error::{EngineError, Result};
use crate::types::chrono_duration;
use crate::types::item::{Item, ItemErrorKind, ItemStatus, Lease};
use crate::types::job::Job;
use crate::types::page::PageMode;

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, Job>,
    items: HashMap<Uuid, Item>,
    /// Item ids per job, ordered by idx
    by_job: HashMap<Uuid, Vec<Uuid>>,
}

impl Tables {
    fn job_items(&self, job_id: Uuid) -> impl Iterator<Item = &Item> {
        self.by_job
            .get(&job_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.items.get(id))
    }

    fn job_item_ids(&self, job_id: Uuid) -> Vec<Uuid> {
        self.by_job.get(&job_id).cloned().unwrap_or_default()
    }

    /// Apply a write-back to an item still held under `token`.
    fn with_held_item(&mut self, item_id: Uuid, token: Uuid, apply: impl FnOnce(&mut Item)) -> bool {
        match self.items.get_mut(&item_id) {
            Some(item) if item.is_held_by(token) => {
                apply(item);
                item.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

/// In-memory storage for jobs and items.
///
/// All tables sit behind one lock, so every transition is a compare-and-set
/// under the write guard. Useful for testing and single-process deployments;
/// data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn job_count(&self) -> usize {
        self.read().jobs.len()
    }

    /// Number of stored items across all jobs.
    pub fn item_count(&self) -> usize {
        self.read().items.len()
    }

    /// Copy of one job's items, ordered by idx.
    pub fn items_snapshot(&self, job_id: Uuid) -> Vec<Item> {
        self.read().job_items(job_id).cloned().collect()
    }

    /// Force an item's lease to have already expired.
    ///
    /// Simulates a worker that crashed mid-generation. Returns false if the
    /// item is not processing.
    pub fn expire_lease(&self, item_id: Uuid) -> bool {
        let mut tables = self.write();
        match tables.items.get_mut(&item_id) {
            Some(item) if item.status == ItemStatus::Processing => {
                if let Some(lease) = item.lease.as_mut() {
                    lease.expires_at = Utc::now() - chrono::Duration::seconds(1);
                }
                true
            }
            _ => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job_with_items(&self, job: &Job, items: &[Item]) -> Result<Vec<Item>> {
        let mut tables = self.write();
        if tables.jobs.contains_key(&job.id) {
            return Err(EngineError::DuplicateJob { job_id: job.id });
        }

        let mut seen = HashSet::with_capacity(items.len());
        let mut stored: Vec<Item> = items
            .iter()
            .filter(|item| seen.insert(item.canonical_key.as_str()))
            .map(|item| Item {
                job_id: job.id,
                ..item.clone()
            })
            .collect();
        stored.sort_by_key(|item| item.idx);

        tables.jobs.insert(job.id, job.clone());
        tables
            .by_job
            .insert(job.id, stored.iter().map(|item| item.id).collect());
        for item in &stored {
            tables.items.insert(item.id, item.clone());
        }

        Ok(stored)
    }

    async fn claim_items(
        &self,
        job_id: Uuid,
        phase: PageMode,
        limit: usize,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<Vec<Item>> {
        let mut tables = self.write();
        match tables.jobs.get(&job_id) {
            Some(job) if !job.is_cancelled() => {}
            _ => return Ok(Vec::new()),
        }

        let now = Utc::now();
        let mut claimed = Vec::new();
        for id in tables.job_item_ids(job_id) {
            if claimed.len() >= limit {
                break;
            }
            let Some(item) = tables.items.get_mut(&id) else {
                continue;
            };
            if item.mode() != phase || !item.is_claimable_at(now) {
                continue;
            }

            item.status = ItemStatus::Processing;
            item.attempts += 1;
            item.lease = Some(Lease::new(worker_id, lease_duration));
            item.updated_at = now;
            claimed.push(item.clone());
        }

        Ok(claimed)
    }

    async fn complete_item(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        result: &serde_json::Value,
    ) -> Result<bool> {
        Ok(self.write().with_held_item(item_id, lease_token, |item| {
            item.status = ItemStatus::Completed;
            item.result = Some(result.clone());
            item.error = None;
            item.error_kind = None;
            item.lease = None;
        }))
    }

    async fn fail_item(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        error: &str,
        kind: ItemErrorKind,
    ) -> Result<bool> {
        Ok(self.write().with_held_item(item_id, lease_token, |item| {
            item.status = ItemStatus::Failed;
            item.error = Some(error.to_string());
            item.error_kind = Some(kind);
            item.lease = None;
        }))
    }

    async fn retry_item(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        available_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.write().with_held_item(item_id, lease_token, |item| {
            item.status = ItemStatus::Pending;
            item.available_at = available_at;
            item.error = None;
            item.error_kind = None;
            item.lease = None;
        }))
    }

    async fn heartbeat(
        &self,
        item_id: Uuid,
        lease_token: Uuid,
        lease_duration: Duration,
    ) -> Result<bool> {
        Ok(self.write().with_held_item(item_id, lease_token, |item| {
            if let Some(lease) = item.lease.as_mut() {
                lease.expires_at = Utc::now() + chrono_duration(lease_duration);
            }
        }))
    }

    async fn reclaim_expired(&self) -> Result<u64> {
        let mut tables = self.write();
        let now = Utc::now();
        let mut reclaimed = 0;

        for item in tables.items.values_mut() {
            if item.lease_expired_at(now) {
                item.status = ItemStatus::Pending;
                item.lease = None;
                item.updated_at = now;
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    async fn fail_pending(
        &self,
        job_id: Uuid,
        phases: &[PageMode],
        error: &str,
        kind: ItemErrorKind,
    ) -> Result<u64> {
        let mut tables = self.write();
        let now = Utc::now();
        let mut failed = 0;

        for id in tables.job_item_ids(job_id) {
            let Some(item) = tables.items.get_mut(&id) else {
                continue;
            };
            if item.status == ItemStatus::Pending && phases.contains(&item.mode()) {
                item.status = ItemStatus::Failed;
                item.error = Some(error.to_string());
                item.error_kind = Some(kind);
                item.updated_at = now;
                failed += 1;
            }
        }

        Ok(failed)
    }

    async fn fail_exhausted(&self, job_id: Uuid, phase: PageMode) -> Result<u64> {
        let mut tables = self.write();
        let now = Utc::now();
        let mut failed = 0;

        for id in tables.job_item_ids(job_id) {
            let Some(item) = tables.items.get_mut(&id) else {
                continue;
            };
            if item.status == ItemStatus::Pending
                && item.mode() == phase
                && !item.has_attempts_left()
            {
                item.status = ItemStatus::Failed;
                item.error = Some(EXHAUSTED_ERROR.to_string());
                item.error_kind = Some(ItemErrorKind::Exhausted);
                item.updated_at = now;
                failed += 1;
            }
        }

        Ok(failed)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.read().jobs.get(&job_id).cloned())
    }

    async fn get_job_status(&self, job_id: Uuid) -> Result<(Job, Vec<Item>)> {
        let tables = self.read();
        let job = tables
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(EngineError::JobNotFound { job_id })?;
        let items = tables.job_items(job_id).cloned().collect();
        Ok((job, items))
    }

    async fn active_job_ids(&self, limit: usize) -> Result<Vec<Uuid>> {
        let tables = self.read();
        let mut active: Vec<&Job> = tables
            .jobs
            .values()
            .filter(|job| !job.is_cancelled())
            .filter(|job| tables.job_items(job.id).any(|item| !item.status.is_terminal()))
            .collect();
        active.sort_by_key(|job| (job.created_at, job.id));

        Ok(active.into_iter().take(limit).map(|job| job.id).collect())
    }

    async fn set_cancelled(&self, job_id: Uuid, at: Option<DateTime<Utc>>) -> Result<bool> {
        let mut tables = self.write();
        match tables.jobs.get_mut(&job_id) {
            Some(job) => {
                job.cancelled_at = at;
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_terminal_items(
        &self,
        job_id: Uuid,
        after_idx: Option<i32>,
        limit: usize,
    ) -> Result<Vec<Item>> {
        let tables = self.read();
        Ok(tables
            .job_items(job_id)
            .filter(|item| item.status.is_terminal())
            .filter(|item| after_idx.map_or(true, |after| item.idx > after))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_late_items(
        &self,
        job_id: Uuid,
        up_to_idx: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<Item>> {
        let tables = self.read();
        Ok(tables
            .job_items(job_id)
            .filter(|item| item.status.is_terminal())
            .filter(|item| item.idx <= up_to_idx && item.updated_at >= since)
            .cloned()
            .collect())
    }
}
