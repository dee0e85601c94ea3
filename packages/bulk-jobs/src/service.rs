//! Long-running services and the host that supervises them.
//!
//! # Example
//!
//! ```ignore
//! use bulk_jobs::{ServiceHost, WorkerPool, LeaseReclaimer};
//!
//! ServiceHost::new()
//!     .with_service(pool)
//!     .with_service(reclaimer)
//!     .run_until_shutdown()
//!     .await?;
//! ```

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A background service that runs until its shutdown token is cancelled.
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Runs a set of services and shuts them down together.
#[derive(Default)]
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Service) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Run until Ctrl+C, then cancel every service and wait for them.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            signal.cancel();
        });

        self.run_with_token(shutdown).await
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// A service that exits early, with or without an error, cancels the
    /// token so the rest stop too. Returns the first service error.
    pub async fn run_with_token(self, shutdown: CancellationToken) -> Result<()> {
        let mut handles = Vec::with_capacity(self.services.len());

        for service in self.services {
            let name = service.name();
            let token = shutdown.clone();
            info!(service = name, "starting service");

            handles.push(tokio::spawn(async move {
                let result = service.run(token.clone()).await;
                if let Err(e) = &result {
                    error!(service = name, error = %e, "service failed");
                }
                token.cancel();
                info!(service = name, "service stopped");
                result
            }));
        }

        let mut first_error = None;
        for handle in futures::future::join_all(handles).await {
            let result = handle.map_err(anyhow::Error::from).and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Waiter {
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for Waiter {
        fn name(&self) -> &'static str {
            "waiter"
        }

        async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(self: Box<Self>, _shutdown: CancellationToken) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn cancelling_token_stops_all_services() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let host = ServiceHost::new()
            .with_service(Waiter {
                stopped: stopped.clone(),
            })
            .with_service(Waiter {
                stopped: stopped.clone(),
            });

        let token = CancellationToken::new();
        token.cancel();
        host.run_with_token(token).await.unwrap();

        assert_eq!(stopped.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_service_stops_the_rest() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let host = ServiceHost::new()
            .with_service(Waiter {
                stopped: stopped.clone(),
            })
            .with_service(Failing);

        let err = host.run_with_token(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
