//! Data model: jobs, items, leases and page requests.

pub mod item;
pub mod job;
pub mod page;

use uuid::Uuid;

/// Generate a new time-ordered database id.
pub fn db_id() -> Uuid {
    Uuid::now_v7()
}

/// Convert a std duration into a chrono duration, saturating on overflow.
pub(crate) fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
