//! Job model for bulk page generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::db_id;

/// Default number of generation attempts per item.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// A batch of page-generation requests submitted together.
///
/// Counters and overall status are not stored here: they are always rolled up
/// from item states (see [`crate::aggregator`]), so they cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = db_id())]
    pub id: Uuid,

    /// Caller that owns the job (license key or API key id)
    pub owner: String,
    #[builder(default, setter(strip_option))]
    pub site_url: Option<String>,
    #[builder(default, setter(strip_option))]
    pub name: Option<String>,

    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i32,

    /// Set while the job is cancelled; cleared on resume
    #[builder(default, setter(strip_option))]
    pub cancelled_at: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job for an owner with default settings.
    pub fn for_owner(owner: &str) -> Self {
        Self::builder().owner(owner).build()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}
