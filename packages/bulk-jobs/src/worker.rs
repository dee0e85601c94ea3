//! Worker pool that generates leased items.
//!
//! The `WorkerPool` is a long-running service that:
//! - Scans active jobs and pulls phase-eligible batches via the `Dispatcher`
//! - Calls the page generator for each item, up to `concurrency` at once
//! - Keeps each lease alive with heartbeats while generation runs
//! - Writes back completed, retryable or failed outcomes
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//!     │
//!     ├─► Refill free executor slots as items finish
//!     ├─► Active jobs (JobStore.active_job_ids)
//!     ├─► Claim batch (Dispatcher.next_batch)
//!     ├─► Generate (PageGenerator.generate, with timeout + heartbeat)
//!     └─► complete_item / retry_item / fail_item
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{GenerationError, Result};
use crate::generator::PageGenerator;
use crate::service::Service;
use crate::store::JobStore;
use crate::types::chrono_duration;
use crate::types::item::{Item, ItemErrorKind};

/// Jobs scanned per tick.
const ACTIVE_JOB_SCAN: usize = 100;

/// Pause after a store error before the next tick.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Exponential backoff between attempts of a retried item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given attempt failed: `base * 2^(attempts-1)`, capped.
    pub fn backoff(&self, attempts: i32) -> Duration {
        let exponent = (attempts.max(1) - 1).min(30) as u32;
        self.base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID recorded on leases
    pub worker_id: String,
    /// Items generated at once
    pub concurrency: usize,
    /// Items claimed per job per dispatch
    pub batch_size: usize,
    pub lease_duration: Duration,
    /// How often to extend the lease of an in-flight item
    pub heartbeat_interval: Duration,
    /// Generation calls running longer count as transient failures
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
    /// Idle wait after a tick with no work (grows to max)
    pub min_poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

impl WorkerConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: config.concurrency,
            batch_size: config.batch_size,
            lease_duration: config.lease_duration,
            heartbeat_interval: config.heartbeat_interval,
            generation_timeout: config.generation_timeout,
            retry: RetryPolicy {
                base: config.retry_base,
                max: config.retry_max,
            },
            min_poll_interval: config.min_poll_interval,
            max_poll_interval: config.max_poll_interval,
        }
    }

    /// Create a default config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// What happened to one processed item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed,
    /// Back to pending, claimable from `available_at`
    Retried { available_at: DateTime<Utc> },
    Failed { kind: ItemErrorKind },
    /// The lease expired and the write-back was refused
    LeaseLost,
}

/// Bounded pool of generation executors.
pub struct WorkerPool<S: JobStore, G: PageGenerator> {
    store: Arc<S>,
    generator: Arc<G>,
    dispatcher: Dispatcher<S>,
    config: WorkerConfig,
}

impl<S, G> WorkerPool<S, G>
where
    S: JobStore + 'static,
    G: PageGenerator + 'static,
{
    pub fn new(store: Arc<S>, generator: Arc<G>, config: WorkerConfig) -> Self {
        let dispatcher = Dispatcher::new(store.clone())
            .with_worker_id(config.worker_id.clone())
            .with_lease_duration(config.lease_duration);

        Self {
            store,
            generator,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim eligible items across active jobs and process them concurrently.
    ///
    /// Returns the number of items processed. A store error before anything
    /// was claimed is returned; after that, claimed items are still processed.
    pub async fn tick(&self) -> Result<usize> {
        let batch = self.claim_batch(self.config.concurrency).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let results =
            futures::future::join_all(batch.into_iter().map(|item| self.process_item(item))).await;

        let mut processed = 0;
        for result in results {
            match result {
                Ok(_) => processed += 1,
                Err(e) => error!(error = %e, "failed to write back item outcome"),
            }
        }

        Ok(processed)
    }

    /// Claim up to `max` eligible items, scanning active jobs oldest first.
    async fn claim_batch(&self, max: usize) -> Result<Vec<Item>> {
        let job_ids = self.store.active_job_ids(ACTIVE_JOB_SCAN).await?;

        let mut batch = Vec::new();
        for job_id in job_ids {
            let remaining = max.saturating_sub(batch.len());
            if remaining == 0 {
                break;
            }

            match self
                .dispatcher
                .next_batch(job_id, remaining.min(self.config.batch_size))
                .await
            {
                Ok(items) => batch.extend(items),
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "failed to dispatch batch");
                    break;
                }
            }
        }

        if !batch.is_empty() {
            debug!(count = batch.len(), "claimed items");
        }

        Ok(batch)
    }

    /// Generate one leased item and write back the outcome.
    ///
    /// Store errors are returned; the item then stays processing until its
    /// lease expires and the reclaimer returns it to pending.
    pub async fn process_item(&self, item: Item) -> Result<ItemOutcome> {
        let Some(token) = item.lease.as_ref().map(|lease| lease.token) else {
            warn!(item_id = %item.id, "item has no lease, skipping");
            return Ok(ItemOutcome::LeaseLost);
        };

        let result = self.generate_with_heartbeat(&item, token).await;

        let outcome = match result {
            Ok(value) => {
                if self.store.complete_item(item.id, token, &value).await? {
                    info!(
                        job_id = %item.job_id,
                        item_id = %item.id,
                        idx = item.idx,
                        canonical_key = %item.canonical_key,
                        attempts = item.attempts,
                        phase = %item.mode(),
                        "item completed"
                    );
                    ItemOutcome::Completed
                } else {
                    ItemOutcome::LeaseLost
                }
            }

            Err(e) if e.is_retryable() && item.has_attempts_left() => {
                let available_at =
                    Utc::now() + chrono_duration(self.config.retry.backoff(item.attempts));
                if self.store.retry_item(item.id, token, available_at).await? {
                    warn!(
                        job_id = %item.job_id,
                        item_id = %item.id,
                        idx = item.idx,
                        canonical_key = %item.canonical_key,
                        attempts = item.attempts,
                        phase = %item.mode(),
                        error = %e,
                        retry_at = %available_at,
                        "item failed, will retry"
                    );
                    ItemOutcome::Retried { available_at }
                } else {
                    ItemOutcome::LeaseLost
                }
            }

            Err(e) => {
                let kind = if e.is_retryable() {
                    ItemErrorKind::Transient
                } else {
                    ItemErrorKind::Permanent
                };
                if self
                    .store
                    .fail_item(item.id, token, &e.to_string(), kind)
                    .await?
                {
                    warn!(
                        job_id = %item.job_id,
                        item_id = %item.id,
                        idx = item.idx,
                        canonical_key = %item.canonical_key,
                        attempts = item.attempts,
                        phase = %item.mode(),
                        error = %e,
                        kind = ?kind,
                        "item failed"
                    );
                    ItemOutcome::Failed { kind }
                } else {
                    ItemOutcome::LeaseLost
                }
            }
        };

        if outcome == ItemOutcome::LeaseLost {
            warn!(
                job_id = %item.job_id,
                item_id = %item.id,
                canonical_key = %item.canonical_key,
                "lease lost before write-back, outcome discarded"
            );
        }

        Ok(outcome)
    }

    /// Run the generator under a timeout while extending the lease.
    async fn generate_with_heartbeat(
        &self,
        item: &Item,
        token: Uuid,
    ) -> std::result::Result<serde_json::Value, GenerationError> {
        let store = self.store.clone();
        let item_id = item.id;
        let heartbeat_interval = self.config.heartbeat_interval;
        let lease_duration = self.config.lease_duration;

        // Spawn heartbeat task
        let cancel = CancellationToken::new();
        let heartbeat_cancel = cancel.child_token();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match store.heartbeat(item_id, token, lease_duration).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!(item_id = %item_id, "lease no longer held, heartbeat stopped");
                                break;
                            }
                            Err(e) => warn!(item_id = %item_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        });

        let timeout = self.config.generation_timeout;
        let result = match tokio::time::timeout(timeout, self.generator.generate(&item.request)).await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::transient(format!(
                "generation timed out after {}s",
                timeout.as_secs_f64()
            ))),
        };

        // Stop heartbeat
        cancel.cancel();
        let _ = heartbeat_handle.await;

        result
    }
}

#[async_trait::async_trait]
impl<S, G> Service for WorkerPool<S, G>
where
    S: JobStore + 'static,
    G: PageGenerator + 'static,
{
    fn name(&self) -> &'static str {
        "bulk-worker-pool"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> AnyResult<()> {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size,
            "worker pool starting"
        );

        // Each finished item frees its slot for the next claim.
        let mut in_flight = FuturesUnordered::new();
        let mut idle = self.config.min_poll_interval;

        loop {
            let free = self.config.concurrency.saturating_sub(in_flight.len());
            let mut pause = idle;

            if free > 0 && !shutdown.is_cancelled() {
                match self.claim_batch(free).await {
                    Ok(items) if !items.is_empty() => {
                        in_flight.extend(items.into_iter().map(|item| self.process_item(item)));
                        idle = self.config.min_poll_interval;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "failed to dispatch items");
                        pause = ERROR_BACKOFF;
                    }
                }
            }

            // In-flight items finish their current attempt before shutdown.
            if shutdown.is_cancelled() && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        error!(error = %e, "failed to write back item outcome");
                    }
                }
                _ = shutdown.cancelled(), if !shutdown.is_cancelled() => {}
                _ = tokio::time::sleep(pause), if free > 0 && !shutdown.is_cancelled() => {
                    idle = (idle * 2).min(self.config.max_poll_interval);
                }
                else => break,
            }
        }

        info!(worker_id = %self.config.worker_id, "worker pool stopped");
        Ok(())
    }
}
