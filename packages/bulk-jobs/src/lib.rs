//! Bulk Page Generation Job Engine
//!
//! Accepts a batch of page-generation requests and drives them through an
//! external generation service, with:
//!
//! - Hub pages generated before the leaf pages that reference them
//! - Each logical page generated at most once per job (canonical keys)
//! - Retries with backoff for transient failures, leases for crashed workers
//! - Job status always rolled up from item states
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bulk_jobs::{BulkEngine, EngineConfig, JobSubmission, MemoryStore, PageRequest};
//! use bulk_jobs::testing::MockGenerator;
//!
//! let engine = BulkEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockGenerator::new()),
//!     EngineConfig::default(),
//! );
//!
//! let receipt = engine
//!     .submit_job(
//!         JobSubmission::builder()
//!             .owner("lic_123")
//!             .items(vec![
//!                 PageRequest::service_hub("roofing", "Roofing"),
//!                 PageRequest::service_city("Roof Repair", "Tulsa", "OK"),
//!             ])
//!             .build(),
//!     )
//!     .await?;
//!
//! let status = engine.get_status(receipt.job_id).await?;
//! ```
//!
//! # Modules
//!
//! - [`canonical`] - Canonical page keys and batch de-duplication
//! - [`store`] - Storage trait and implementations (MemoryStore, PostgresStore)
//! - [`dispatcher`] - Phase-ordered claiming of eligible items
//! - [`worker`] - Worker pool with retry, timeout and heartbeats
//! - [`reclaimer`] - Returns expired leases to pending
//! - [`aggregator`] - Job counters and status from item states
//! - [`engine`] - Upstream interface for the API layer

pub mod aggregator;
pub mod canonical;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod generator;
pub mod reclaimer;
pub mod service;
pub mod store;
pub mod testing;
pub mod types;
pub mod worker;

// Re-export core types at crate root
pub use aggregator::{rollup, JobCounts, JobStatus};
pub use canonical::{canonical_key, dedupe, ResolvedRequest};
pub use config::EngineConfig;
pub use dispatcher::{current_phase, Dispatcher, PhaseDecision};
pub use engine::{
    BulkEngine, ItemReport, JobStatusReport, JobSubmission, ResultsCursor, ResultsPage, SubmitReceipt,
};
pub use error::{EngineError, GenerationError, Result};
pub use generator::{HttpGenerator, PageGenerator};
pub use reclaimer::LeaseReclaimer;
pub use service::{Service, ServiceHost};
pub use store::{JobStore, MemoryStore};
pub use types::{
    item::{Item, ItemErrorKind, ItemStatus, Lease},
    job::Job,
    page::{PageMode, PageRequest},
};
pub use worker::{ItemOutcome, RetryPolicy, WorkerConfig, WorkerPool};

#[cfg(feature = "postgres")]
pub use store::PostgresStore;
