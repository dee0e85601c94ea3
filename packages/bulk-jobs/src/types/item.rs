//! Item model: one page-generation unit within a job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::page::{PageMode, PageRequest};
use super::{chrono_duration, db_id};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "bulk_item_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    /// Completed and failed items never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

/// Why a failed item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "bulk_item_error_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// Transient errors on every attempt until attempts ran out
    Transient,
    /// The generation service rejected the request
    Permanent,
    /// An upstream phase had no successful page to reference
    Blocked,
    /// Found pending with no attempts left (last lease expired)
    Exhausted,
}

// ============================================================================
// Lease
// ============================================================================

/// Time-bounded claim of an item by a worker.
///
/// The token is fresh for every claim. Write-backs must present it, so a
/// worker whose lease expired and was re-claimed elsewhere cannot overwrite
/// the new holder's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: Uuid,
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(worker_id: &str, duration: Duration) -> Self {
        Self {
            token: Uuid::new_v4(),
            worker_id: worker_id.to_string(),
            expires_at: Utc::now() + chrono_duration(duration),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ============================================================================
// Item Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Position in the submitted batch
    pub idx: i32,
    pub canonical_key: String,
    pub request: PageRequest,

    pub status: ItemStatus,
    /// Generation attempts started; incremented on every claim
    pub attempts: i32,
    pub max_attempts: i32,

    pub lease: Option<Lease>,
    /// Retry backoff gate: not claimable before this instant
    pub available_at: DateTime<Utc>,

    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<ItemErrorKind>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Create a pending item for a resolved request.
    pub fn new(
        job_id: Uuid,
        idx: i32,
        canonical_key: String,
        request: PageRequest,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: db_id(),
            job_id,
            idx,
            canonical_key,
            request,
            status: ItemStatus::Pending,
            attempts: 0,
            max_attempts,
            lease: None,
            available_at: now,
            result: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The dispatch phase this item belongs to.
    pub fn mode(&self) -> PageMode {
        self.request.mode
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether a claim at `now` may move this item to processing.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Pending && self.available_at <= now && self.has_attempts_left()
    }

    /// Whether the item holds a lease that has run out.
    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Processing
            && self.lease.as_ref().is_some_and(|lease| lease.is_expired_at(now))
    }

    /// Whether the presented token matches the current lease.
    pub fn is_held_by(&self, token: Uuid) -> bool {
        self.status == ItemStatus::Processing
            && self.lease.as_ref().is_some_and(|lease| lease.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> Item {
        Item::new(
            Uuid::new_v4(),
            0,
            "service_city:roof repair|tulsa|ok".to_string(),
            PageRequest::service_city("Roof Repair", "Tulsa", "OK"),
            3,
        )
    }

    #[test]
    fn new_item_starts_pending_with_no_attempts() {
        let item = sample_item();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.lease.is_none());
        assert_eq!(item.mode(), PageMode::ServiceCity);
    }

    #[test]
    fn terminal_states() {
        assert!(ItemStatus::Completed.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::Processing.is_terminal());
    }

    #[test]
    fn pending_item_is_claimable_now() {
        let item = sample_item();
        assert!(item.is_claimable_at(Utc::now()));
    }

    #[test]
    fn backoff_gate_blocks_claim() {
        let mut item = sample_item();
        item.available_at = Utc::now() + chrono::Duration::seconds(60);
        assert!(!item.is_claimable_at(Utc::now()));
    }

    #[test]
    fn exhausted_item_is_not_claimable() {
        let mut item = sample_item();
        item.attempts = 3;
        assert!(!item.has_attempts_left());
        assert!(!item.is_claimable_at(Utc::now()));
    }

    #[test]
    fn lease_token_must_match() {
        let mut item = sample_item();
        let lease = Lease::new("worker-1", Duration::from_secs(60));
        let token = lease.token;
        item.status = ItemStatus::Processing;
        item.lease = Some(lease);

        assert!(item.is_held_by(token));
        assert!(!item.is_held_by(Uuid::new_v4()));
        assert!(!item.lease_expired_at(Utc::now()));
    }

    #[test]
    fn zero_lease_is_expired_immediately() {
        let lease = Lease::new("worker-1", Duration::ZERO);
        assert!(lease.is_expired_at(Utc::now()));
    }
}
