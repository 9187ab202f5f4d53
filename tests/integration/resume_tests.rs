//! Integration tests for interrupting and resuming runs
//!
//! A run is interrupted by cancelling it from inside the sink, then resumed
//! from the same database file.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tidemark::config::{parse_config, Config};
use tidemark::crawler::{AdapterRegistry, Coordinator, Fixture, RecordingSleeper, ReplayDriver};
use tidemark::output::{FailureRecord, MemorySink, OutputPipeline, Sink, SinkError};
use tidemark::queue::WorkStatus;
use tidemark::state::StopReason;
use tidemark::storage::{RunStatus, SqliteStorage, Storage};
use tokio_util::sync::CancellationToken;

/// Cancels the run once it has received `after` records
struct CancellingSink {
    inner: MemorySink,
    cancel: CancellationToken,
    after: usize,
}

#[async_trait]
impl Sink for CancellingSink {
    async fn emit(&self, record: Value) -> Result<(), SinkError> {
        self.inner.emit(record).await?;
        if self.inner.records().len() >= self.after {
            self.cancel.cancel();
        }
        Ok(())
    }

    async fn emit_failure(&self, failure: &FailureRecord) -> Result<(), SinkError> {
        self.inner.emit_failure(failure).await
    }
}

fn create_test_config(dir: &Path) -> Config {
    let toml = format!(
        r#"
[crawler]
max-concurrency = 1

[scroll]
pacing = false

[output]
database-path = "{db}"
results-path = "{results}"

[[seed]]
url = "https://site.example/nasa/"

[[adapter]]
page-type = "profile"
detect-pointer = "/user"
entity-pointer = "/user/name"
items-pointer = "/items"
has-next-pointer = "/more"
"#,
        db = dir.join("run.db").display(),
        results = dir.join("results.jsonl").display(),
    );
    parse_config(&toml).expect("Failed to parse test config")
}

fn create_test_credentials(dir: &Path, config: &mut Config) {
    let path = dir.join("logins.json");
    std::fs::write(&path, r#"[{"name": "sessionid", "value": "abc"}]"#).unwrap();
    config.credentials.file = Some(path.display().to_string());
}

fn driver() -> ReplayDriver {
    ReplayDriver::new()
        .with_fixture(Fixture::new(
            "https://site.example/nasa/",
            json!({"user": {"name": "nasa"}}),
            vec![
                json!({"items": [{"id": "1"}, {"id": "2"}, {"id": "3"}], "more": true}),
                json!({"items": [{"id": "4"}, {"id": "5"}, {"id": "6"}], "more": false}),
            ],
        ))
        .unwrap()
}

fn ids(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn open(config: &Config, fresh: bool) -> Coordinator {
    let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
    Coordinator::with_storage(config.clone(), "hash", fresh, storage).unwrap()
}

/// Runs the first batch of the seed, then cancels
async fn interrupted_run(config: &Config) -> (i64, Vec<Value>) {
    let coordinator = open(config, true);
    let sink = Arc::new(CancellingSink {
        inner: MemorySink::new(),
        cancel: coordinator.cancel_token(),
        after: 3,
    });

    let summary = coordinator
        .run(
            Arc::new(driver()),
            AdapterRegistry::from_config(&config.adapters),
            OutputPipeline::new(sink.clone()),
            Arc::new(RecordingSleeper::new()),
        )
        .await
        .unwrap();
    assert_eq!(summary.interrupted, 1);

    (coordinator.run_id(), sink.inner.records())
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    create_test_credentials(dir.path(), &mut config);

    let (run_id, first) = interrupted_run(&config).await;
    assert_eq!(ids(&first), vec!["1", "2", "3"]);

    {
        let storage = SqliteStorage::new(Path::new(&config.output.database_path)).unwrap();
        assert_eq!(storage.get_run(run_id).unwrap().status, RunStatus::Interrupted);
        assert_eq!(
            storage.count_work_items(run_id, WorkStatus::InProgress).unwrap(),
            1
        );
        let states = storage.load_scroll_states(run_id).unwrap();
        assert_eq!(states["nasa"].stop_reason, Some(StopReason::Cancelled));
        assert_eq!(states["nasa"].seen_count(), 3);
    }

    let coordinator = open(&config, false);
    assert!(coordinator.is_resumed());
    assert_eq!(coordinator.run_id(), run_id);
    assert_eq!(coordinator.checkpoints().get("nasa").seen_count(), 3);
    assert_eq!(coordinator.credentials().snapshot()[0].uses, 1);

    let sink = Arc::new(MemorySink::new());
    let summary = coordinator
        .run(
            Arc::new(driver()),
            AdapterRegistry::from_config(&config.adapters),
            OutputPipeline::new(sink.clone()),
            Arc::new(RecordingSleeper::new()),
        )
        .await
        .unwrap();

    assert_eq!(summary.handled, 1);
    assert_eq!(ids(&sink.records()), vec!["4", "5", "6"]);

    let storage = coordinator.storage().lock();
    assert_eq!(storage.get_run(run_id).unwrap().status, RunStatus::Completed);
    let states = storage.load_scroll_states(run_id).unwrap();
    assert_eq!(states["nasa"].stop_reason, Some(StopReason::Exhausted));
    assert_eq!(states["nasa"].seen_count(), 6);
    assert_eq!(storage.load_credentials(run_id).unwrap()[0].uses, 2);
}

#[tokio::test]
async fn test_fresh_ignores_unfinished_run() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());

    let (run_id, _) = interrupted_run(&config).await;

    let coordinator = open(&config, true);
    assert!(!coordinator.is_resumed());
    assert_ne!(coordinator.run_id(), run_id);
    assert!(coordinator.checkpoints().is_empty());
}

#[tokio::test]
async fn test_completed_run_is_not_resumed() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());

    let first = open(&config, false);
    first
        .run(
            Arc::new(driver()),
            AdapterRegistry::from_config(&config.adapters),
            OutputPipeline::new(Arc::new(MemorySink::new())),
            Arc::new(RecordingSleeper::new()),
        )
        .await
        .unwrap();
    let first_id = first.run_id();
    drop(first);

    let second = open(&config, false);
    assert!(!second.is_resumed());
    assert_ne!(second.run_id(), first_id);

    // The new run starts from scratch and sees every item again
    let sink = Arc::new(MemorySink::new());
    second
        .run(
            Arc::new(driver()),
            AdapterRegistry::from_config(&config.adapters),
            OutputPipeline::new(sink.clone()),
            Arc::new(RecordingSleeper::new()),
        )
        .await
        .unwrap();
    assert_eq!(sink.records().len(), 6);
}
