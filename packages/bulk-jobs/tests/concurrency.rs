//! Concurrent claiming against the in-memory store.
//!
//! Verifies that racing claimers and worker pools never receive the same
//! item twice and never generate a page more than once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bulk_jobs::testing::MockGenerator;
use bulk_jobs::{
    canonical_key, BulkEngine, Dispatcher, EngineConfig, Item, ItemStatus, Job, JobStatus,
    JobStore, JobSubmission, MemoryStore, PageMode, PageRequest, WorkerConfig,
};
use uuid::Uuid;

const CITIES: [&str; 10] = [
    "Tulsa", "Austin", "Boise", "Omaha", "Denver", "Fresno", "Mesa", "Reno", "Tampa", "Waco",
];

/// Helper to build `services x CITIES` distinct leaf requests.
fn leaf_requests(services: &[&str]) -> Vec<PageRequest> {
    services
        .iter()
        .flat_map(|service| {
            CITIES
                .iter()
                .map(move |city| PageRequest::service_city(service, city, "OK"))
        })
        .collect()
}

async fn insert_leaf_job(store: &MemoryStore, requests: Vec<PageRequest>) -> Uuid {
    let job = Job::for_owner("lic_concurrency");
    let items: Vec<Item> = requests
        .into_iter()
        .enumerate()
        .map(|(idx, request)| {
            let key = canonical_key(&request).unwrap();
            Item::new(job.id, idx as i32, key, request, job.max_attempts)
        })
        .collect();
    store.insert_job_with_items(&job, &items).await.unwrap();
    job.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_claimers_never_share_an_item() {
    let store = Arc::new(MemoryStore::new());
    let job_id = insert_leaf_job(&store, leaf_requests(&["Roof Repair", "Siding", "Gutters"])).await;

    let mut handles = Vec::new();
    for n in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("claimer-{}", n);
            let mut claimed = Vec::new();
            loop {
                let batch = store
                    .claim_items(
                        job_id,
                        PageMode::ServiceCity,
                        3,
                        &worker_id,
                        Duration::from_secs(60),
                    )
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|item| item.id));
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<Uuid> = all.iter().copied().collect();
    assert_eq!(all.len(), 30);
    assert_eq!(unique.len(), 30);
    assert!(store
        .items_snapshot(job_id)
        .iter()
        .all(|item| item.status == ItemStatus::Processing && item.attempts == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_dispatchers_respect_phase_order() {
    let store = Arc::new(MemoryStore::new());
    let mut requests = vec![
        PageRequest::service_hub("roofing", "Roofing"),
        PageRequest::service_hub("siding", "Siding"),
    ];
    requests.extend(leaf_requests(&["Roof Repair"]));
    let job_id = insert_leaf_job(&store, requests).await;

    let mut handles = Vec::new();
    for n in 0..4 {
        let dispatcher = Dispatcher::new(store.clone()).with_worker_id(format!("dispatcher-{}", n));
        handles.push(tokio::spawn(async move {
            dispatcher.next_batch(job_id, 5).await.unwrap()
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }

    // Hubs are still processing, so no leaf may be claimed yet.
    assert_eq!(claimed.len(), 2);
    assert!(claimed.iter().all(|item| item.mode() == PageMode::ServiceHub));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_worker_pools_generate_each_page_once() {
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(MockGenerator::new().with_delay(Duration::from_millis(5)));
    let engine = Arc::new(BulkEngine::new(
        store.clone(),
        generator.clone(),
        EngineConfig::default(),
    ));

    let mut requests = vec![
        PageRequest::service_hub("roofing", "Roofing"),
        PageRequest::service_hub("gutters", "Gutters"),
    ];
    requests.extend(leaf_requests(&["Roof Repair", "Gutter Cleaning"]));
    requests.push(PageRequest::city_hub("tulsa-ok"));
    let receipt = engine
        .submit_job(
            JobSubmission::builder()
                .owner("lic_concurrency")
                .items(requests)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(receipt.total, 23);

    let mut handles = Vec::new();
    for n in 0..4 {
        let pool = engine.worker_pool(WorkerConfig::with_worker_id(format!("pool-{}", n)));
        handles.push(tokio::spawn(async move {
            let mut idle_ticks = 0;
            while idle_ticks < 3 {
                if pool.tick().await.unwrap() == 0 {
                    idle_ticks += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                } else {
                    idle_ticks = 0;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let report = engine.get_status(receipt.job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.counts.completed, 23);
    assert_eq!(generator.call_count(), 23);
    assert!(report
        .items
        .iter()
        .all(|item| generator.calls_for(&item.canonical_key) == 1));
}
