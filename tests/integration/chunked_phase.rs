//! Chunked phases against an API that rejects oversized id batches

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use manga_harvester::fetcher::shared_resources::global_http_client;
use manga_harvester::fetcher::{AdaptiveDelay, DelayConfig, RateLimitedFetcher, UrlTemplate};
use manga_harvester::resume::{CheckpointStore, FileCheckpointStore};
use manga_harvester::runner::{ChunkPolicy, PhaseOutcome, ResumableBatchRunner, TemplateWork};
use manga_harvester::shutdown::{SharedShutdown, ShutdownCoordinator};
use manga_harvester::sink::JsonlStore;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, Respond, ResponseTemplate};

const ID_PARAM: &str = "ids[]";
const SERVER_LIMIT: usize = 50;

fn requested_ids(request: &Request) -> Vec<String> {
    request
        .url
        .query_pairs()
        .filter(|(key, _)| key == ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .collect()
}

/// Matches requests carrying more ids than the server accepts
struct TooManyIds;

impl Match for TooManyIds {
    fn matches(&self, request: &Request) -> bool {
        requested_ids(request).len() > SERVER_LIMIT
    }
}

/// Answers with statistics keyed by id, optionally requesting shutdown
struct StatisticsResponder {
    stop_after: Option<SharedShutdown>,
}

impl Respond for StatisticsResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let statistics: Map<String, Value> = requested_ids(request)
            .into_iter()
            .map(|id| (id, json!({"follows": 7, "rating": {"bayesian": 8.5}})))
            .collect();
        if let Some(shutdown) = &self.stop_after {
            shutdown.request_shutdown();
        }
        ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok",
            "statistics": statistics
        }))
    }
}

async fn mount_api(server: &MockServer, stop_after: Option<SharedShutdown>) {
    Mock::given(method("GET"))
        .and(path("/statistics/manga"))
        .and(TooManyIds)
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "result": "error",
            "errors": [{"status": 400, "title": "Too many ids"}]
        })))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/statistics/manga"))
        .respond_with(StatisticsResponder { stop_after })
        .mount(server)
        .await;
}

fn work_for(server: &MockServer) -> TemplateWork {
    let config = DelayConfig::default()
        .with_bounds(Duration::from_millis(1), Some(Duration::from_millis(20)))
        .with_max_retries(0);
    let limiter = Arc::new(AdaptiveDelay::new(server.address().to_string(), config));
    let fetcher = RateLimitedFetcher::new(global_http_client(), limiter);
    let template = UrlTemplate::new(Some(&server.uri()), "/statistics/manga").unwrap();
    TemplateWork::chunked(fetcher, template, "statistics", ID_PARAM).with_result_pointer("/statistics")
}

fn manga_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("m{i:03}")).collect()
}

async fn chunk_sizes(server: &MockServer) -> Vec<usize> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| requested_ids(request).len())
        .collect()
}

#[tokio::test]
async fn test_batch_halves_and_hint_is_persisted() {
    let server = MockServer::start().await;
    mount_api(&server, None).await;

    let dir = TempDir::new().unwrap();
    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));
    let mut runner = ResumableBatchRunner::open(store.clone(), sink.clone())
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());

    let ids = manga_ids(120);
    let report = runner
        .run_chunks("statistics", &ids, &work_for(&server), &ChunkPolicy::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert_eq!(report.batch_size, Some(50));
    assert_eq!(report.items_succeeded, 120);
    assert_eq!(report.items_failed, 0);
    assert_eq!(chunk_sizes(&server).await, vec![100, 50, 50, 20]);

    let documents = sink.documents("statistics").unwrap();
    assert_eq!(documents.len(), 120);
    assert!(documents.iter().all(|d| d["follows"] == 7));

    let checkpoint = store.load().unwrap().unwrap();
    assert_eq!(checkpoint.phase("statistics").unwrap().batch_size_hint(), Some(50));
}

#[tokio::test]
async fn test_smaller_batch_survives_restart() {
    let server = MockServer::start().await;
    let first_shutdown = ShutdownCoordinator::shared();
    mount_api(&server, Some(first_shutdown.clone())).await;

    let dir = TempDir::new().unwrap();
    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));
    let ids = manga_ids(100);

    // The first accepted chunk also stops the run
    let mut runner = ResumableBatchRunner::open(store.clone(), sink.clone())
        .unwrap()
        .with_shutdown(first_shutdown);
    let report = runner
        .run_chunks("statistics", &ids, &work_for(&server), &ChunkPolicy::default())
        .await
        .unwrap();
    assert_eq!(report.outcome, PhaseOutcome::Interrupted);
    assert_eq!(chunk_sizes(&server).await, vec![100, 50]);

    let restarted = MockServer::start().await;
    mount_api(&restarted, None).await;

    let mut runner = ResumableBatchRunner::open(store.clone(), sink.clone())
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());
    let report = runner
        .run_chunks("statistics", &ids, &work_for(&restarted), &ChunkPolicy::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert_eq!(report.resumed_from, 50);
    // No oversized probe after the restart
    assert_eq!(chunk_sizes(&restarted).await, vec![50]);
    assert_eq!(sink.documents("statistics").unwrap().len(), 100);
}

#[tokio::test]
async fn test_chunk_rejected_at_floor_is_skipped() {
    let server = MockServer::start().await;
    mount_api(&server, None).await;

    let dir = TempDir::new().unwrap();
    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));
    let mut runner = ResumableBatchRunner::open(store, sink.clone())
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());

    // Floor above the server limit: nothing can shrink below it
    let policy = ChunkPolicy {
        initial_batch_size: 80,
        min_batch_size: 80,
        ..ChunkPolicy::default()
    };
    let ids = manga_ids(80);
    let report = runner
        .run_chunks("statistics", &ids, &work_for(&server), &policy)
        .await
        .unwrap();

    assert_eq!(report.items_failed, 80);
    assert_eq!(chunk_sizes(&server).await, vec![80]);
    assert!(sink.documents("statistics").unwrap().is_empty());
}
