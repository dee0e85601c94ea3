//! Phase-ordered dispatch of job items.
//!
//! Phases run in [`PageMode::ALL`] order and must complete, not merely be
//! dispatched, before the next phase becomes eligible:
//!
//! ```text
//! service_hub ──► service_city ──► city_hub
//! ```
//!
//! A phase whose items all failed blocks every later phase. Pending items of
//! blocked phases are failed with [`ItemErrorKind::Blocked`] so the job
//! reaches a terminal status instead of staying `running` forever.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::types::item::{Item, ItemErrorKind, ItemStatus};
use crate::types::page::PageMode;
use crate::store::JobStore;

/// Default lease for claimed items.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(300);

/// What the dispatcher should do next for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseDecision {
    /// Claim items of this phase
    Dispatch(PageMode),
    /// Every item of `blocked_by` failed; `downstream` phases still have
    /// unfinished items that can never run
    Blocked {
        blocked_by: PageMode,
        downstream: Vec<PageMode>,
    },
    /// Nothing left to dispatch
    Done,
}

/// Decide the current phase from a job's items.
///
/// The first phase with a non-terminal item is the current one. Empty phases
/// are skipped.
pub fn current_phase(items: &[Item]) -> PhaseDecision {
    for phase in PageMode::ALL {
        let mut phase_items = items.iter().filter(|item| item.mode() == phase).peekable();
        if phase_items.peek().is_none() {
            continue;
        }

        let mut all_failed = true;
        for item in phase_items {
            if !item.status.is_terminal() {
                return PhaseDecision::Dispatch(phase);
            }
            all_failed &= item.status == ItemStatus::Failed;
        }

        if all_failed {
            let downstream: Vec<PageMode> = phase
                .downstream()
                .iter()
                .copied()
                .filter(|mode| {
                    items
                        .iter()
                        .any(|item| item.mode() == *mode && !item.status.is_terminal())
                })
                .collect();

            if !downstream.is_empty() {
                return PhaseDecision::Blocked {
                    blocked_by: phase,
                    downstream,
                };
            }
        }
    }

    PhaseDecision::Done
}

/// Selects and leases the next eligible items of a job.
pub struct Dispatcher<S: JobStore> {
    store: Arc<S>,
    worker_id: String,
    lease_duration: Duration,
}

impl<S: JobStore> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            worker_id: self.worker_id.clone(),
            lease_duration: self.lease_duration,
        }
    }
}

impl<S: JobStore> Dispatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            worker_id: format!("dispatcher-{}", Uuid::new_v4()),
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    /// Record leases under this worker id.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Claim up to `max` eligible items of a job, ordered by idx.
    ///
    /// Returns an empty batch when the job is cancelled, finished, or waiting
    /// on in-flight items of the current phase. Store errors are returned to
    /// the caller to retry.
    pub async fn next_batch(&self, job_id: Uuid, max: usize) -> Result<Vec<Item>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let (job, mut items) = self.store.get_job_status(job_id).await?;
        if job.is_cancelled() {
            debug!(job_id = %job_id, "job cancelled, not dispatching");
            return Ok(Vec::new());
        }

        loop {
            match current_phase(&items) {
                PhaseDecision::Done => return Ok(Vec::new()),

                PhaseDecision::Blocked {
                    blocked_by,
                    downstream,
                } => {
                    let error = format!("blocked: every {} page failed", blocked_by);
                    let failed = self
                        .store
                        .fail_pending(job_id, &downstream, &error, ItemErrorKind::Blocked)
                        .await?;
                    warn!(
                        job_id = %job_id,
                        phase = %blocked_by,
                        failed,
                        "phase blocked, downstream items failed"
                    );
                    return Ok(Vec::new());
                }

                PhaseDecision::Dispatch(phase) => {
                    let exhausted = self.store.fail_exhausted(job_id, phase).await?;
                    if exhausted > 0 {
                        warn!(
                            job_id = %job_id,
                            phase = %phase,
                            count = exhausted,
                            "failed items with no attempts left"
                        );
                        items = self.store.get_job_status(job_id).await?.1;
                        continue;
                    }

                    let claimed = self
                        .store
                        .claim_items(job_id, phase, max, &self.worker_id, self.lease_duration)
                        .await?;

                    for item in &claimed {
                        debug!(
                            job_id = %job_id,
                            item_id = %item.id,
                            idx = item.idx,
                            canonical_key = %item.canonical_key,
                            attempts = item.attempts,
                            phase = %phase,
                            "item claimed"
                        );
                    }

                    return Ok(claimed);
                }
            }
        }
    }
}
