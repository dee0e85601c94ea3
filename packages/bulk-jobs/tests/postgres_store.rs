//! PostgreSQL store integration tests.
//!
//! Uses one shared Postgres container for the whole file; each test works on
//! its own job. Requires Docker.
//!
//! Run with: cargo test --features postgres --test postgres_store
//!
//! Verifies:
//! 1. Duplicate canonical keys coalesce on insert
//! 2. Parallel claimers never receive the same row
//! 3. Write-backs with a stale lease token are refused after reclaim
//! 4. Retry backoff, blocked and exhausted transitions
//! 5. Result paging queries

#![cfg(feature = "postgres")]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bulk_jobs::{
    canonical_key, EngineError, Item, ItemErrorKind, ItemStatus, Job, JobStore, PageMode,
    PageRequest, PostgresStore,
};
use chrono::Utc;
use serde_json::json;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(60);

/// Shared container, started once and kept alive for the test run.
struct SharedDatabase {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_DB: OnceCell<SharedDatabase> = OnceCell::const_new();

impl SharedDatabase {
    async fn init() -> Result<Self> {
        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        // Create the schema once so later connections only see existing objects.
        PostgresStore::new(&db_url)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }
}

/// Helper to connect a store to the shared database.
async fn store() -> Arc<PostgresStore> {
    let shared = SHARED_DB
        .get_or_init(|| async {
            SharedDatabase::init()
                .await
                .expect("Failed to initialize shared database")
        })
        .await;

    Arc::new(PostgresStore::new(&shared.db_url).await.unwrap())
}

/// Helper to insert a job from requests, one item per request.
async fn insert_job(
    store: &PostgresStore,
    max_attempts: i32,
    requests: Vec<PageRequest>,
) -> (Job, Vec<Item>) {
    let job = Job {
        max_attempts,
        ..Job::for_owner("lic_postgres")
    };
    let items: Vec<Item> = requests
        .into_iter()
        .enumerate()
        .map(|(idx, request)| {
            let key = canonical_key(&request).unwrap();
            Item::new(job.id, idx as i32, key, request, max_attempts)
        })
        .collect();
    let stored = store.insert_job_with_items(&job, &items).await.unwrap();
    (job, stored)
}

async fn item_state(store: &PostgresStore, job_id: Uuid, idx: i32) -> Item {
    let (_, items) = store.get_job_status(job_id).await.unwrap();
    items.into_iter().find(|i| i.idx == idx).unwrap()
}

#[tokio::test]
async fn test_insert_coalesces_duplicate_keys() {
    let store = store().await;
    let (job, stored) = insert_job(
        &store,
        3,
        vec![
            PageRequest::service_city("Roof Repair", "Tulsa", "OK"),
            PageRequest::service_hub("roofing", "Roofing"),
            PageRequest::service_city("roof repair", "TULSA", "ok"),
        ],
    )
    .await;

    assert_eq!(stored.iter().map(|i| i.idx).collect::<Vec<_>>(), vec![0, 1]);
    let (loaded, items) = store.get_job_status(job.id).await.unwrap();
    assert_eq!(loaded.owner, "lic_postgres");
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.status == ItemStatus::Pending && i.attempts == 0));

    let again = store.insert_job_with_items(&job, &[]).await;
    assert!(matches!(again, Err(EngineError::DuplicateJob { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_claimers_never_share_a_row() {
    let store = store().await;
    let requests: Vec<PageRequest> = (0..40)
        .map(|n| PageRequest::service_city("Roof Repair", &format!("City {}", n), "OK"))
        .collect();
    let (job, _) = insert_job(&store, 3, requests).await;

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        let job_id = job.id;
        handles.push(tokio::spawn(async move {
            let worker_id = format!("claimer-{}", n);
            let mut claimed = Vec::new();
            loop {
                let batch = store
                    .claim_items(job_id, PageMode::ServiceCity, 3, &worker_id, LEASE)
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|item| item.id));
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<Uuid> = all.iter().copied().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);

    let (_, items) = store.get_job_status(job.id).await.unwrap();
    assert!(items
        .iter()
        .all(|i| i.status == ItemStatus::Processing && i.attempts == 1 && i.lease.is_some()));
}

#[tokio::test]
async fn test_claim_respects_phase_and_cancel() {
    let store = store().await;
    let (job, _) = insert_job(
        &store,
        3,
        vec![
            PageRequest::service_hub("roofing", "Roofing"),
            PageRequest::service_city("Roof Repair", "Tulsa", "OK"),
        ],
    )
    .await;

    store.set_cancelled(job.id, Some(Utc::now())).await.unwrap();
    let claimed = store
        .claim_items(job.id, PageMode::ServiceHub, 5, "w1", LEASE)
        .await
        .unwrap();
    assert!(claimed.is_empty());

    store.set_cancelled(job.id, None).await.unwrap();
    let claimed = store
        .claim_items(job.id, PageMode::ServiceHub, 5, "w1", LEASE)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].mode(), PageMode::ServiceHub);
    assert_eq!(claimed[0].lease.as_ref().unwrap().worker_id, "w1");
}

#[tokio::test]
async fn test_stale_token_refused_after_reclaim() {
    let store = store().await;
    let (job, _) = insert_job(
        &store,
        3,
        vec![PageRequest::service_hub("roofing", "Roofing")],
    )
    .await;

    let stale = store
        .claim_items(job.id, PageMode::ServiceHub, 1, "crashed", Duration::from_millis(1))
        .await
        .unwrap()
        .pop()
        .unwrap();
    let stale_token = stale.lease.as_ref().unwrap().token;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.reclaim_expired().await.unwrap() >= 1);
    let reclaimed = item_state(&store, job.id, 0).await;
    assert_eq!(reclaimed.status, ItemStatus::Pending);
    assert_eq!(reclaimed.attempts, 1);
    assert!(reclaimed.lease.is_none());

    let fresh = store
        .claim_items(job.id, PageMode::ServiceHub, 1, "w2", LEASE)
        .await
        .unwrap()
        .pop()
        .unwrap();
    let fresh_token = fresh.lease.as_ref().unwrap().token;
    assert_eq!(fresh.attempts, 2);
    assert_ne!(fresh_token, stale_token);

    assert!(!store.heartbeat(fresh.id, stale_token, LEASE).await.unwrap());
    assert!(!store
        .complete_item(fresh.id, stale_token, &json!({"title": "stale"}))
        .await
        .unwrap());
    assert!(!store
        .fail_item(fresh.id, stale_token, "stale", ItemErrorKind::Permanent)
        .await
        .unwrap());

    assert!(store.heartbeat(fresh.id, fresh_token, LEASE).await.unwrap());
    assert!(store
        .complete_item(fresh.id, fresh_token, &json!({"title": "fresh"}))
        .await
        .unwrap());

    let done = item_state(&store, job.id, 0).await;
    assert_eq!(done.status, ItemStatus::Completed);
    assert_eq!(done.result, Some(json!({"title": "fresh"})));
}

#[tokio::test]
async fn test_retry_waits_for_available_at() {
    let store = store().await;
    let (job, _) = insert_job(
        &store,
        3,
        vec![PageRequest::service_hub("roofing", "Roofing")],
    )
    .await;

    let item = store
        .claim_items(job.id, PageMode::ServiceHub, 1, "w1", LEASE)
        .await
        .unwrap()
        .pop()
        .unwrap();
    let token = item.lease.as_ref().unwrap().token;
    let later = Utc::now() + chrono::Duration::minutes(10);
    assert!(store.retry_item(item.id, token, later).await.unwrap());

    let pending = item_state(&store, job.id, 0).await;
    assert_eq!(pending.status, ItemStatus::Pending);
    assert!(pending.error.is_none());
    assert!(store
        .claim_items(job.id, PageMode::ServiceHub, 1, "w1", LEASE)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_blocked_and_exhausted_transitions() {
    let store = store().await;
    let (job, _) = insert_job(
        &store,
        1,
        vec![
            PageRequest::service_hub("roofing", "Roofing"),
            PageRequest::service_city("Roof Repair", "Tulsa", "OK"),
            PageRequest::city_hub("tulsa-ok"),
        ],
    )
    .await;

    // The only attempt is lost to a crash.
    store
        .claim_items(job.id, PageMode::ServiceHub, 1, "crashed", Duration::from_millis(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.reclaim_expired().await.unwrap();

    assert_eq!(store.fail_exhausted(job.id, PageMode::ServiceHub).await.unwrap(), 1);
    let hub = item_state(&store, job.id, 0).await;
    assert_eq!(hub.status, ItemStatus::Failed);
    assert_eq!(hub.error_kind, Some(ItemErrorKind::Exhausted));
    assert_eq!(hub.attempts, 1);

    let blocked = store
        .fail_pending(
            job.id,
            &[PageMode::ServiceCity, PageMode::CityHub],
            "blocked: every service_hub page failed",
            ItemErrorKind::Blocked,
        )
        .await
        .unwrap();
    assert_eq!(blocked, 2);

    let (_, items) = store.get_job_status(job.id).await.unwrap();
    assert!(items.iter().all(|i| i.status == ItemStatus::Failed));
    assert_eq!(items[1].error_kind, Some(ItemErrorKind::Blocked));
    assert_eq!(items[1].attempts, 0);
    assert!(store.active_job_ids(1000).await.unwrap().iter().all(|id| *id != job.id));
}

#[tokio::test]
async fn test_result_paging_queries() {
    let store = store().await;
    let (job, _) = insert_job(
        &store,
        3,
        vec![
            PageRequest::service_city("Roof Repair", "Tulsa", "OK"),
            PageRequest::service_hub("roofing", "Roofing"),
            PageRequest::service_hub("siding", "Siding"),
        ],
    )
    .await;

    for item in store
        .claim_items(job.id, PageMode::ServiceHub, 5, "w1", LEASE)
        .await
        .unwrap()
    {
        let token = item.lease.as_ref().unwrap().token;
        store
            .complete_item(item.id, token, &json!({"idx": item.idx}))
            .await
            .unwrap();
    }

    let page = store.list_terminal_items(job.id, None, 1).await.unwrap();
    assert_eq!(page.iter().map(|i| i.idx).collect::<Vec<_>>(), vec![1]);
    let page = store.list_terminal_items(job.id, Some(1), 10).await.unwrap();
    assert_eq!(page.iter().map(|i| i.idx).collect::<Vec<_>>(), vec![2]);

    let since = Utc::now() - chrono::Duration::minutes(1);
    let late = store.list_late_items(job.id, 1, since).await.unwrap();
    assert_eq!(late.iter().map(|i| i.idx).collect::<Vec<_>>(), vec![1]);

    let future = Utc::now() + chrono::Duration::minutes(1);
    assert!(store.list_late_items(job.id, 2, future).await.unwrap().is_empty());
}
