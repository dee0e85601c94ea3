//! Lease reclaimer service.
//!
//! Returns items whose worker stopped heartbeating (crash, hang, network
//! partition) to pending. `attempts` is left as the claim recorded it, so a
//! crash costs one attempt but is not treated as a generation failure.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::service::Service;
use crate::store::JobStore;

/// Periodically sweeps expired leases.
pub struct LeaseReclaimer<S: JobStore> {
    store: Arc<S>,
    interval: Duration,
}

impl<S: JobStore + 'static> LeaseReclaimer<S> {
    pub fn new(store: Arc<S>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Reclaim every expired lease once. Safe to run concurrently with
    /// dispatch and with other reclaimers.
    pub async fn sweep(&self) -> Result<u64> {
        let reclaimed = self.store.reclaim_expired().await?;
        if reclaimed > 0 {
            info!(count = reclaimed, "reclaimed expired leases");
        } else {
            debug!("no expired leases");
        }
        Ok(reclaimed)
    }
}

#[async_trait::async_trait]
impl<S: JobStore + 'static> Service for LeaseReclaimer<S> {
    fn name(&self) -> &'static str {
        "bulk-lease-reclaimer"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> AnyResult<()> {
        info!(interval_secs = self.interval.as_secs(), "lease reclaimer starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "failed to reclaim expired leases");
                    }
                }
            }
        }

        info!("lease reclaimer stopped");
        Ok(())
    }
}
