//! Loading checkpoint files written by older and newer harvester versions

use std::fs;
use tempfile::TempDir;
use manga_harvester::resume::{
    CheckpointStore, FileCheckpointStore, PhaseStatus, ResumeError, SCHEMA_VERSION,
};

#[test]
fn test_legacy_progress_file_is_migrated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("progress.json");
    fs::write(
        &path,
        r#"{
            "manga_list": {"completed": true, "last_processed": null},
            "statistics": {"completed": false, "last_processed": "f0a1", "batch_size": 25},
            "covers": {"completed": false, "last_processed": null}
        }"#,
    )
    .unwrap();

    let store = FileCheckpointStore::new(&path);
    let checkpoint = store.load().unwrap().unwrap();

    assert_eq!(checkpoint.schema_version(), SCHEMA_VERSION);
    assert!(checkpoint.is_completed("manga_list"));

    let statistics = checkpoint.phase("statistics").unwrap();
    assert_eq!(statistics.status(), PhaseStatus::InProgress);
    assert_eq!(statistics.last_completed_item(), Some("f0a1"));
    assert_eq!(statistics.batch_size_hint(), Some(25));

    assert_eq!(
        checkpoint.phase("covers").unwrap().status(),
        PhaseStatus::NotStarted
    );

    // Saving rewrites the file in the current format
    store.save(&checkpoint).unwrap();
    let rewritten: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(rewritten["schema_version"], SCHEMA_VERSION);
    assert_eq!(store.load().unwrap().unwrap(), checkpoint);
}

#[test]
fn test_unknown_schema_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("progress.json");
    fs::write(&path, r#"{"schema_version": "9.0.0", "phases": {}}"#).unwrap();

    let result = FileCheckpointStore::new(&path).load();
    match result {
        Err(ResumeError::SchemaVersionMismatch { expected, found }) => {
            assert_eq!(expected, SCHEMA_VERSION);
            assert_eq!(found, "9.0.0");
        }
        other => panic!("expected schema mismatch, got {other:?}"),
    }
}

#[test]
fn test_corrupt_checkpoint_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("progress.json");
    fs::write(&path, "{\"schema_version\": \"2.0.0\", \"phases\": ").unwrap();

    assert!(matches!(
        FileCheckpointStore::new(&path).load(),
        Err(ResumeError::DeserializationError(_))
    ));
}
