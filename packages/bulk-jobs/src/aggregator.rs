//! Job rollup computed from item states.
//!
//! Counters and overall status are never stored; they are recomputed from the
//! items on every read so they cannot drift.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::item::{Item, ItemStatus};

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::PartiallyFailed | JobStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyFailed => "partially_failed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item counts for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: usize,
    /// `completed + failed`
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub processing: usize,
    /// Items with at least one generation attempt, or already terminal
    pub attempted: usize,
}

impl JobCounts {
    /// Count items by status.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a Item>) -> Self {
        let mut counts = JobCounts::default();
        for item in items {
            counts.total += 1;
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
            if item.attempts > 0 || item.status.is_terminal() {
                counts.attempted += 1;
            }
        }
        counts.processed = counts.completed + counts.failed;
        counts
    }

    /// Status implied by these counts.
    pub fn status(&self) -> JobStatus {
        if self.total > 0 && self.processed == self.total {
            if self.failed == 0 {
                JobStatus::Completed
            } else if self.failed == self.total {
                JobStatus::Failed
            } else {
                JobStatus::PartiallyFailed
            }
        } else if self.attempted == 0 {
            JobStatus::Pending
        } else {
            JobStatus::Running
        }
    }
}

/// Counts and status for a job's items.
pub fn rollup(items: &[Item]) -> (JobCounts, JobStatus) {
    let counts = JobCounts::from_items(items);
    (counts, counts.status())
}
