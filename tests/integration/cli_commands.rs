//! Binary-level tests for the CLI subcommands

use assert_cmd::Command;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn harvester(store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("manga-harvester").unwrap();
    cmd.env_remove("HARVEST_CHECKPOINT")
        .env("RUST_LOG", "manga_harvester=warn")
        .arg("--store-dir")
        .arg(store);
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

#[test]
fn test_sources_lists_profiles() {
    let dir = TempDir::new().unwrap();
    let stdout = stdout_of(harvester(dir.path()).arg("sources"));

    assert!(stdout.contains("mangadex"));
    assert!(stdout.contains("jikan"));
    assert!(stdout.contains("https://api.mangadex.org"));
}

#[test]
fn test_sources_json_output() {
    let dir = TempDir::new().unwrap();
    let stdout = stdout_of(
        harvester(dir.path())
            .args(["--output-format", "json", "sources", "jikan"]),
    );

    let listing: Value = serde_json::from_str(&stdout).unwrap();
    let profiles = listing.as_array().unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["name"], "jikan");
    assert_eq!(profiles[0]["burst_threshold"], 0);
}

#[test]
fn test_unknown_source_fails() {
    let dir = TempDir::new().unwrap();
    harvester(dir.path())
        .args(["sources", "no-such-site"])
        .assert()
        .failure();
}

#[test]
fn test_status_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    let stdout = stdout_of(harvester(dir.path()).args(["--output-format", "json", "status"]));

    let status: Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(status["phases"], json!({}));
}

#[test]
fn test_export_of_missing_collection_fails() {
    let dir = TempDir::new().unwrap();
    harvester(dir.path())
        .args(["export", "--collection", "manga", "--output"])
        .arg(dir.path().join("manga.csv"))
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_status_export_round() {
    let server = MockServer::start().await;
    for (id, title) in [("m1", "Berserk"), ("m2", "Vagabond")] {
        Mock::given(method("GET"))
            .and(path(format!("/manga/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": id, "attributes": {"title": title, "year": 1989}}
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let store_dir = dir.path().join("store");
    let ids_file = dir.path().join("ids.txt");
    std::fs::write(&ids_file, "# manga ids\nm1\nm2\nm1\n").unwrap();
    let csv_path = dir.path().join("manga.csv");
    let url = format!("{}/manga/{{id}}", server.uri());

    let run_store = store_dir.clone();
    let run_output = tokio::task::spawn_blocking(move || {
        stdout_of(
            harvester(&run_store)
                .args(["--output-format", "json", "--min-delay-ms", "0", "--max-delay-ms", "50"])
                .args(["run", "--phase", "manga", "--collection", "manga"])
                .args(["--result-pointer", "/data", "--url"])
                .arg(&url)
                .arg("--ids")
                .arg(&ids_file),
        )
    })
    .await
    .unwrap();

    let report: Value = serde_json::from_str(run_output.trim()).unwrap();
    assert_eq!(report["outcome"], "completed");
    assert_eq!(report["items_succeeded"], 2);

    let status_store = store_dir.clone();
    let status_output = tokio::task::spawn_blocking(move || {
        stdout_of(harvester(&status_store).args(["--output-format", "json", "status"]))
    })
    .await
    .unwrap();
    let status: Value = serde_json::from_str(status_output.trim()).unwrap();
    assert_eq!(status["phases"]["manga"]["status"], "completed");

    let export_store = store_dir.clone();
    let export_csv = csv_path.clone();
    tokio::task::spawn_blocking(move || {
        harvester(&export_store)
            .args(["export", "--collection", "manga", "--output"])
            .arg(&export_csv)
            .assert()
            .success();
    })
    .await
    .unwrap();

    let mut reader = csv::Reader::from_path(&csv_path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "_id");
    assert!(headers.iter().any(|h| h == "attributes.title"));
    assert_eq!(reader.records().count(), 2);
}
