//! End-to-end item and page phases: mock API → runner → JSONL store

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use manga_harvester::fetcher::shared_resources::global_http_client;
use manga_harvester::fetcher::{AdaptiveDelay, DelayConfig, RateLimitedFetcher, UrlTemplate};
use manga_harvester::resume::{CheckpointStore, FileCheckpointStore, PhaseStatus};
use manga_harvester::runner::{PhaseOutcome, ResumableBatchRunner, TemplatePagedWork, TemplateWork};
use manga_harvester::shutdown::ShutdownCoordinator;
use manga_harvester::sink::JsonlStore;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_for(server: &MockServer) -> RateLimitedFetcher {
    let config = DelayConfig::default()
        .with_bounds(Duration::from_millis(1), Some(Duration::from_millis(20)))
        .with_max_retries(1);
    let limiter = Arc::new(AdaptiveDelay::new(server.address().to_string(), config));
    RateLimitedFetcher::new(global_http_client(), limiter)
}

fn open_runner(dir: &TempDir) -> (ResumableBatchRunner, Arc<JsonlStore>, Arc<FileCheckpointStore>) {
    let sink = Arc::new(JsonlStore::open(dir.path().join("store")).unwrap());
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("progress.json")));
    let runner = ResumableBatchRunner::open(store.clone(), sink.clone())
        .unwrap()
        .with_shutdown(ShutdownCoordinator::shared());
    (runner, sink, store)
}

#[tokio::test]
async fn test_item_phase_stores_selected_node() {
    let server = MockServer::start().await;
    for id in ["m1", "m2"] {
        Mock::given(method("GET"))
            .and(path(format!("/manga/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "ok",
                "data": {"id": id, "attributes": {"title": {"en": format!("Title {id}")}}}
            })))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/manga/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (mut runner, sink, store) = open_runner(&dir);
    let template = UrlTemplate::new(Some(&server.uri()), "/manga/{id}").unwrap();
    let work = TemplateWork::per_item(fetcher_for(&server), template, "manga")
        .with_result_pointer("/data");

    let ids = vec!["m1".to_string(), "gone".to_string(), "m2".to_string()];
    let report = runner.run_items("manga", &ids, &work).await.unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert_eq!(report.items_succeeded, 2);
    assert_eq!(report.items_failed, 1);

    let documents = sink.documents("manga").unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents
        .iter()
        .any(|d| d["_id"] == "m2" && d["attributes"]["title"]["en"] == "Title m2"));

    let checkpoint = store.load().unwrap().unwrap();
    let phase = checkpoint.phase("manga").unwrap();
    assert_eq!(phase.status(), PhaseStatus::Completed);
    assert_eq!(phase.items_succeeded(), 2);
    assert_eq!(phase.items_failed(), 1);
}

#[tokio::test]
async fn test_item_phase_rerun_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "m1"}})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let template = UrlTemplate::new(Some(&server.uri()), "/manga/{id}").unwrap();
    let work = TemplateWork::per_item(fetcher_for(&server), template, "manga")
        .with_result_pointer("/data");
    let ids = vec!["m1".to_string()];

    let (mut first, _, _) = open_runner(&dir);
    first.run_items("manga", &ids, &work).await.unwrap();

    let (mut second, sink, _) = open_runner(&dir);
    let report = second.run_items("manga", &ids, &work).await.unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Skipped);
    assert_eq!(sink.documents("manga").unwrap().len(), 1);
}

#[tokio::test]
async fn test_paginated_item_collects_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga/m1/feed"))
        .and(query_param("offset", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": [{"id": "c1"}, {"id": "c2"}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/manga/m1/feed"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (mut runner, sink, _) = open_runner(&dir);
    let template = UrlTemplate::new(Some(&server.uri()), "/manga/{id}/feed").unwrap();
    let work = TemplateWork::per_item(fetcher_for(&server), template, "chapters")
        .with_result_pointer("/data")
        .with_pagination(2);

    let ids = vec!["m1".to_string()];
    runner.run_items("chapters", &ids, &work).await.unwrap();

    let documents = sink.documents("chapters").unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["_id"], "m1");
    assert_eq!(documents[0]["items"], json!([{"id": "c1"}, {"id": "c2"}]));
}

#[tokio::test]
async fn test_page_phase_walks_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/top/manga"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"mal_id": 2, "title": "Berserk"}, {"mal_id": 13, "title": "One Piece"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/top/manga"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"mal_id": 1706, "title": "JoJo"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (mut runner, sink, store) = open_runner(&dir);
    let work = TemplatePagedWork::new(
        fetcher_for(&server),
        format!("{}/top/manga", server.uri()),
        "top_manga",
        2,
    )
    .with_result_pointer("/data")
    .with_id_field("mal_id");

    let report = runner.run_pages("top_manga", &work).await.unwrap();

    assert_eq!(report.outcome, PhaseOutcome::Completed);
    assert_eq!(report.documents_written, 3);
    let mut ids = sink.ids("top_manga", "_id").unwrap();
    ids.sort();
    assert_eq!(ids, vec!["13", "1706", "2"]);

    let checkpoint = store.load().unwrap().unwrap();
    assert!(checkpoint.is_completed("top_manga"));
}
