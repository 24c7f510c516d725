//! Integration tests for resuming interrupted phases from a checkpoint file

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use manga_harvester::fetcher::shared_resources::global_http_client;
use manga_harvester::fetcher::{AdaptiveDelay, DelayConfig, RateLimitedFetcher, UrlTemplate};
use manga_harvester::resume::{Checkpoint, CheckpointStore, FileCheckpointStore, PhaseStatus};
use manga_harvester::runner::{PhaseOutcome, ResumableBatchRunner, TemplateWork};
use manga_harvester::shutdown::{SharedShutdown, ShutdownCoordinator};
use manga_harvester::sink::{JsonlStore, Sink};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Echoes the requested id, requesting shutdown on one of them
struct MangaResponder {
    stop_on: Option<(String, SharedShutdown)>,
}

impl Respond for MangaResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        if let Some((stop_id, shutdown)) = &self.stop_on {
            if *stop_id == id {
                shutdown.request_shutdown();
            }
        }
        ResponseTemplate::new(200).set_body_json(json!({"data": {"id": id, "type": "manga"}}))
    }
}

fn work_for(server: &MockServer) -> TemplateWork {
    let config = DelayConfig::default()
        .with_bounds(Duration::from_millis(1), Some(Duration::from_millis(20)))
        .with_max_retries(1);
    let limiter = Arc::new(AdaptiveDelay::new(server.address().to_string(), config));
    let fetcher = RateLimitedFetcher::new(global_http_client(), limiter);
    let template = UrlTemplate::new(Some(&server.uri()), "/manga/{id}").unwrap();
    TemplateWork::per_item(fetcher, template, "manga").with_result_pointer("/data")
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.url.path().to_string())
        .collect()
}

#[tokio::test]
async fn test_resume_continues_after_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/manga/[a-z]+$"))
        .respond_with(MangaResponder { stop_on: None })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));

    let mut checkpoint = Checkpoint::new();
    let phase = checkpoint.phase_mut("manga");
    phase.start();
    phase.record_success(Some("c"), 3);
    store.save(&checkpoint).unwrap();

    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());
    let mut runner = ResumableBatchRunner::open(store.clone(), sink.clone())
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());

    let report = runner
        .run_items("manga", &ids(&["a", "b", "c", "d", "e"]), &work_for(&server))
        .await
        .unwrap();

    assert_eq!(report.resumed_from, 3);
    assert_eq!(report.items_succeeded, 2);
    assert_eq!(requested_paths(&server).await, vec!["/manga/d", "/manga/e"]);

    let saved = store.load().unwrap().unwrap();
    let phase = saved.phase("manga").unwrap();
    assert_eq!(phase.status(), PhaseStatus::Completed);
    assert_eq!(phase.items_succeeded(), 5);
}

#[tokio::test]
async fn test_interrupted_run_loses_no_stored_item() {
    let server = MockServer::start().await;
    let shutdown = ShutdownCoordinator::shared();
    Mock::given(method("GET"))
        .and(path_regex(r"^/manga/[a-z]+$"))
        .respond_with(MangaResponder {
            stop_on: Some(("c".to_string(), shutdown.clone())),
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));
    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());
    let items = ids(&["a", "b", "c", "d", "e"]);

    let mut runner = ResumableBatchRunner::open(store.clone(), sink.clone())
        .unwrap()
        .with_shutdown(shutdown);
    let report = runner
        .run_items("manga", &items, &work_for(&server))
        .await
        .unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Interrupted);
    let saved = store.load().unwrap().unwrap();
    let phase = saved.phase("manga").unwrap();
    assert_eq!(phase.status(), PhaseStatus::InProgress);
    assert_eq!(phase.last_completed_item(), Some("c"));

    // Everything up to the cursor is in the store
    let stored = JsonlStore::open(dir.path().join("store")).unwrap();
    assert_eq!(stored.ids("manga", "_id").unwrap(), vec!["a", "b", "c"]);

    let resumed_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/manga/[a-z]+$"))
        .respond_with(MangaResponder { stop_on: None })
        .mount(&resumed_server)
        .await;

    let mut runner = ResumableBatchRunner::open(store.clone(), Arc::new(stored))
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());
    let report = runner
        .run_items("manga", &items, &work_for(&resumed_server))
        .await
        .unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert_eq!(
        requested_paths(&resumed_server).await,
        vec!["/manga/d", "/manga/e"]
    );
}

#[tokio::test]
async fn test_redone_item_replaces_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga/a"))
        .respond_with(MangaResponder { stop_on: None })
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));
    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());

    // Stored before a crash that lost the checkpoint update
    sink.write("manga", json!({"_id": "a", "id": "a", "type": "stale"}))
        .await
        .unwrap();

    let mut runner = ResumableBatchRunner::open(store, sink)
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());
    runner
        .run_items("manga", &ids(&["a"]), &work_for(&server))
        .await
        .unwrap();

    let reopened = JsonlStore::open(dir.path().join("store")).unwrap();
    let documents = reopened.documents("manga").unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["type"], "manga");
}

#[tokio::test]
async fn test_completed_phase_with_missing_data_is_rerun() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/manga/[a-z]+$"))
        .respond_with(MangaResponder { stop_on: None })
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));
    let mut checkpoint = Checkpoint::new();
    checkpoint.phase_mut("manga").mark_completed();
    store.save(&checkpoint).unwrap();

    // Fresh store directory: the data the checkpoint vouches for is gone
    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());
    let mut runner = ResumableBatchRunner::open(store.clone(), sink.clone())
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());
    let report = runner
        .run_items("manga", &ids(&["a", "b"]), &work_for(&server))
        .await
        .unwrap();

    assert!(report.healed);
    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert_eq!(sink.documents("manga").unwrap().len(), 2);
    assert!(store.load().unwrap().unwrap().is_completed("manga"));
}
