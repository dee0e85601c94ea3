//! Upstream interface for the API layer.
//!
//! `BulkEngine` is the only surface the API layer needs: submit a batch, poll
//! its status or results, cancel and resume. Dispatch itself runs in the
//! worker pool, which the engine can construct.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::aggregator::{rollup, JobCounts, JobStatus};
use crate::canonical::dedupe;
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, Result};
use crate::generator::PageGenerator;
use crate::reclaimer::LeaseReclaimer;
use crate::store::JobStore;
use crate::types::chrono_duration;
use crate::types::item::{Item, ItemErrorKind, ItemStatus};
use crate::types::job::Job;
use crate::types::page::{PageMode, PageRequest};
use crate::worker::{WorkerConfig, WorkerPool};

/// Largest page `list_results` returns.
pub const MAX_RESULTS_PAGE: usize = 500;

/// Allowance for clock skew between this process and the store.
const RESULTS_CLOCK_SLACK: Duration = Duration::from_secs(5);

/// A batch of page requests from one caller.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobSubmission {
    pub owner: String,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub site_url: Option<String>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub name: Option<String>,
    /// Overrides the engine's configured attempt limit
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub max_attempts: Option<i32>,
    pub items: Vec<PageRequest>,
}

/// Returned from a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    /// Items stored after de-duplication
    pub total: usize,
    pub duplicates_dropped: usize,
}

/// Per-item view for pollers. Lease internals are not exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub idx: i32,
    pub canonical_key: String,
    pub mode: PageMode,
    pub status: ItemStatus,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ItemErrorKind>,
}

impl From<Item> for ItemReport {
    fn from(item: Item) -> Self {
        Self {
            idx: item.idx,
            mode: item.mode(),
            canonical_key: item.canonical_key,
            status: item.status,
            attempts: item.attempts,
            result: item.result,
            error: item.error,
            error_kind: item.error_kind,
        }
    }
}

/// Consistent snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job: Job,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub cancelled: bool,
    pub items: Vec<ItemReport>,
}

/// Position in a job's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsCursor {
    /// Highest idx delivered in order
    pub after_idx: i32,
    /// Items at or below `after_idx` finishing from here on are late
    pub as_of: DateTime<Utc>,
}

/// One page of finished items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsPage {
    /// Items after the cursor, ordered by idx
    pub items: Vec<ItemReport>,
    /// Items at or below the cursor that finished since the previous page
    pub late: Vec<ItemReport>,
    /// Pass to the next call
    pub next_cursor: Option<ResultsCursor>,
    /// No further results can appear unless the job is resumed
    pub complete: bool,
}

/// Bulk page-generation engine.
pub struct BulkEngine<S: JobStore, G: PageGenerator> {
    store: Arc<S>,
    generator: Arc<G>,
    config: EngineConfig,
}

impl<S, G> BulkEngine<S, G>
where
    S: JobStore + 'static,
    G: PageGenerator + 'static,
{
    pub fn new(store: Arc<S>, generator: Arc<G>, config: EngineConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate, de-duplicate and store a batch as a new pending job.
    ///
    /// Any invalid request rejects the whole batch. Duplicate canonical keys
    /// are dropped silently; the first submission wins.
    pub async fn submit_job(&self, submission: JobSubmission) -> Result<SubmitReceipt> {
        if submission.items.is_empty() {
            return Err(EngineError::EmptyBatch);
        }

        let submitted = submission.items.len();
        let resolved = dedupe(submission.items)?;

        let max_attempts = submission
            .max_attempts
            .unwrap_or(self.config.max_attempts)
            .max(1);
        let job = Job {
            site_url: submission.site_url,
            name: submission.name,
            max_attempts,
            ..Job::for_owner(&submission.owner)
        };

        let items: Vec<Item> = resolved
            .into_iter()
            .map(|r| Item::new(job.id, r.idx as i32, r.canonical_key, r.request, max_attempts))
            .collect();

        let stored = self.store.insert_job_with_items(&job, &items).await?;

        let receipt = SubmitReceipt {
            job_id: job.id,
            total: stored.len(),
            duplicates_dropped: submitted - stored.len(),
        };

        info!(
            job_id = %job.id,
            owner = %job.owner,
            total = receipt.total,
            duplicates_dropped = receipt.duplicates_dropped,
            "bulk job submitted"
        );

        Ok(receipt)
    }

    /// Current rollup and per-item details.
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobStatusReport> {
        let (job, items) = self.store.get_job_status(job_id).await?;
        let (counts, status) = rollup(&items);

        Ok(JobStatusReport {
            cancelled: job.is_cancelled(),
            job,
            status,
            counts,
            items: items.into_iter().map(ItemReport::from).collect(),
        })
    }

    /// Stop dispatching new items for a job.
    ///
    /// In-flight items finish their current attempt; pending items stay
    /// pending so the job can be resumed.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound { job_id })?;

        if !job.is_cancelled() {
            self.store.set_cancelled(job_id, Some(Utc::now())).await?;
            info!(job_id = %job_id, "bulk job cancelled");
        }
        Ok(())
    }

    /// Clear the cancel mark so pending items are dispatched again.
    pub async fn resume_job(&self, job_id: Uuid) -> Result<()> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound { job_id })?;

        if job.is_cancelled() {
            self.store.set_cancelled(job_id, None).await?;
            info!(job_id = %job_id, "bulk job resumed");
        }
        Ok(())
    }

    /// Finished items after a cursor, ordered by idx.
    ///
    /// Phases finish out of submission order, so a lower idx can finish after
    /// the cursor has passed it. Those items come back in `late` on a later
    /// page. An item can be delivered more than once but is never skipped;
    /// callers key results by idx.
    pub async fn list_results(
        &self,
        job_id: Uuid,
        cursor: Option<ResultsCursor>,
        limit: usize,
    ) -> Result<ResultsPage> {
        let limit = limit.clamp(1, MAX_RESULTS_PAGE);
        // Taken before any read so nothing finishing during this call is missed.
        let as_of = Utc::now() - chrono_duration(RESULTS_CLOCK_SLACK);

        let (job, all) = self.store.get_job_status(job_id).await?;
        let page = self
            .store
            .list_terminal_items(job_id, cursor.map(|c| c.after_idx), limit)
            .await?;
        let late = match cursor {
            Some(c) => self.store.list_late_items(job_id, c.after_idx, c.as_of).await?,
            None => Vec::new(),
        };

        let next_cursor = page
            .last()
            .map(|item| item.idx)
            .or(cursor.map(|c| c.after_idx))
            .map(|after_idx| ResultsCursor { after_idx, as_of });

        let cancelled = job.is_cancelled();
        let can_still_finish = all.iter().any(|item| match item.status {
            ItemStatus::Processing => true,
            ItemStatus::Pending => !cancelled,
            _ => false,
        });
        let complete = !can_still_finish && page.len() < limit;

        Ok(ResultsPage {
            items: page.into_iter().map(ItemReport::from).collect(),
            late: late.into_iter().map(ItemReport::from).collect(),
            next_cursor,
            complete,
        })
    }

    /// A dispatcher over this engine's store.
    pub fn dispatcher(&self) -> Dispatcher<S> {
        Dispatcher::new(self.store.clone()).with_lease_duration(self.config.lease_duration)
    }

    /// A worker pool over this engine's store and generator.
    pub fn worker_pool(&self, config: WorkerConfig) -> WorkerPool<S, G> {
        WorkerPool::new(self.store.clone(), self.generator.clone(), config)
    }

    /// A lease reclaimer over this engine's store.
    pub fn reclaimer(&self, interval: Duration) -> LeaseReclaimer<S> {
        LeaseReclaimer::new(self.store.clone(), interval)
    }
}
