//! Integration tests for the crawler
//!
//! These tests replay recorded pages through the full engine: coordinator,
//! scheduler, pagination loop, filter and output pipeline.

use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tidemark::config::{parse_config, Config};
use tidemark::crawler::{AdapterRegistry, Coordinator, Fixture, RecordingSleeper, ReplayDriver};
use tidemark::output::{HookContext, HookError, MemorySink, OutputPipeline};
use tidemark::queue::WorkStatus;
use tidemark::state::StopReason;
use tidemark::storage::{RunStatus, SqliteStorage, Storage};
use tidemark::TidemarkError;

const ADAPTERS: &str = r#"
[[adapter]]
page-type = "profile"
detect-pointer = "/user"
entity-pointer = "/user/name"
items-pointer = "/items"
has-next-pointer = "/more"
timestamp-field = "taken_at"

[[adapter]]
page-type = "place"
detect-pointer = "/place"
entity-pointer = "/place/id"
label-pointer = "/place/name"
items-pointer = "/items"
has-next-pointer = "/more"
detail-url-template = "https://site.example/p/{id}/"

[[adapter]]
page-type = "post"
detect-pointer = "/post"
entity-pointer = "/post/id"
items-pointer = "/post"
"#;

/// Builds a config around the given sections, with pacing off
fn create_test_config(dir: &Path, sections: &str) -> Config {
    let toml = format!(
        r#"
[crawler]
max-concurrency = 2
max-request-retries = 2

[scroll]
pacing = false
stall-attempts = 2

[output]
database-path = "{db}"
results-path = "{results}"

[replay]
fixtures-dir = "{fixtures}"

{sections}
{adapters}
"#,
        db = dir.join("run.db").display(),
        results = dir.join("results.jsonl").display(),
        fixtures = dir.join("fixtures").display(),
        sections = sections,
        adapters = ADAPTERS,
    );
    parse_config(&toml).expect("Failed to parse test config")
}

fn profile(url: &str, name: &str, responses: Vec<Value>) -> Fixture {
    Fixture::new(url, json!({"user": {"name": name}}), responses)
}

/// One page of items `{"id", "taken_at"}` with day-of-March timestamps
fn page(items: &[(&str, u32)], more: bool) -> Value {
    let items: Vec<Value> = items
        .iter()
        .map(|(id, day)| json!({"id": id, "taken_at": format!("2024-03-{:02}T12:00:00Z", day)}))
        .collect();
    json!({"items": items, "more": more})
}

fn ids(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

async fn run_with(
    coordinator: &Coordinator,
    config: &Config,
    driver: ReplayDriver,
    pipeline: OutputPipeline,
    sleeper: Arc<RecordingSleeper>,
) -> Result<tidemark::crawler::RunSummary, TidemarkError> {
    coordinator
        .run(
            Arc::new(driver),
            AdapterRegistry::from_config(&config.adapters),
            pipeline,
            sleeper,
        )
        .await
}

#[tokio::test]
async fn test_profile_stops_at_results_limit() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(
        dir.path(),
        r#"
[[seed]]
url = "https://site.example/nasa/"
"#,
    );
    config.crawler.results_limit = Some(5);

    let driver = ReplayDriver::new()
        .with_fixture(profile(
            "https://site.example/nasa/",
            "nasa",
            vec![
                page(&[("1", 20), ("2", 19), ("3", 18)], true),
                page(&[("4", 17), ("5", 16), ("6", 15)], true),
                page(&[("7", 14), ("8", 13), ("9", 12)], true),
            ],
        ))
        .unwrap();

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let sink = Arc::new(MemorySink::new());
    let summary = run_with(
        &coordinator,
        &config,
        driver,
        OutputPipeline::new(sink.clone()),
        Arc::new(RecordingSleeper::new()),
    )
    .await
    .unwrap();

    assert_eq!(summary.handled, 1);
    assert_eq!(ids(&sink.records()), vec!["1", "2", "3", "4", "5"]);

    let storage = coordinator.storage().lock();
    let states = storage.load_scroll_states(coordinator.run_id()).unwrap();
    assert_eq!(states["nasa"].stop_reason, Some(StopReason::Limit));
    assert_eq!(states["nasa"].seen_count(), 5);
    assert_eq!(
        storage.get_run(coordinator.run_id()).unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_time_range_boundary_ends_pagination() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        r#"
[time-range]
min = "2024-03-10"

[[seed]]
url = "https://site.example/nasa/"
"#,
    );

    let driver = ReplayDriver::new()
        .with_fixture(profile(
            "https://site.example/nasa/",
            "nasa",
            vec![
                page(&[("new", 15), ("edge", 9)], true),
                page(&[("old", 8), ("older", 7)], true),
                page(&[("never", 6)], false),
            ],
        ))
        .unwrap();

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let sink = Arc::new(MemorySink::new());
    run_with(
        &coordinator,
        &config,
        driver,
        OutputPipeline::new(sink.clone()),
        Arc::new(RecordingSleeper::new()),
    )
    .await
    .unwrap();

    assert_eq!(ids(&sink.records()), vec!["new"]);

    let states = coordinator
        .storage()
        .lock()
        .load_scroll_states(coordinator.run_id())
        .unwrap();
    assert_eq!(states["nasa"].stop_reason, Some(StopReason::Boundary));
    assert!(!states["nasa"].is_seen("never"));
}

#[tokio::test]
async fn test_place_items_followed_to_detail_pages() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        r#"
[[seed]]
url = "https://site.example/explore/locations/42/harbor/"
"#,
    );

    let driver = ReplayDriver::new()
        .with_fixture(Fixture::new(
            "https://site.example/explore/locations/42/harbor/",
            json!({"place": {"id": "42", "name": "Harbor"}}),
            vec![json!({"items": [{"id": "A"}, {"id": "B"}], "more": false})],
        ))
        .unwrap()
        .with_fixture(Fixture::new(
            "https://site.example/p/A/",
            json!({"post": {"id": "A", "caption": "first"}}),
            Vec::new(),
        ))
        .unwrap()
        .with_fixture(Fixture::new(
            "https://site.example/p/B/",
            json!({"post": {"id": "B", "caption": "second"}}),
            Vec::new(),
        ))
        .unwrap();

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let sink = Arc::new(MemorySink::new());
    let summary = run_with(
        &coordinator,
        &config,
        driver,
        OutputPipeline::new(sink.clone()),
        Arc::new(RecordingSleeper::new()),
    )
    .await
    .unwrap();

    assert_eq!(summary.handled, 3);
    let mut captions: Vec<String> = sink
        .records()
        .iter()
        .map(|r| r["caption"].as_str().unwrap_or_default().to_string())
        .collect();
    captions.sort();
    assert_eq!(captions, vec!["first", "second"]);

    let storage = coordinator.storage().lock();
    assert_eq!(
        storage
            .count_work_items(coordinator.run_id(), WorkStatus::Handled)
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_search_resolves_to_profiles() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        r#"
[search]
query = "space agency"
search-type = "user"
limit = 2
url-template = "https://site.example/web/search/?context={type}&query={query}"
results-pointer = "/users"
result-url-template = "https://site.example/{/user/username}/"
"#,
    );

    let driver = ReplayDriver::new()
        .with_fixture(Fixture::new(
            "https://site.example/web/search/?context=user&query=space+agency",
            json!({}),
            vec![json!({"users": [
                {"user": {"username": "nasa"}},
                {"user": {}},
                {"user": {"username": "esa"}},
                {"user": {"username": "jaxa"}}
            ]})],
        ))
        .unwrap()
        .with_fixture(profile(
            "https://site.example/nasa/",
            "nasa",
            vec![page(&[("n1", 20), ("n2", 19)], false)],
        ))
        .unwrap()
        .with_fixture(profile(
            "https://site.example/esa/",
            "esa",
            vec![page(&[("e1", 18)], false)],
        ))
        .unwrap();

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let sink = Arc::new(MemorySink::new());
    let summary = run_with(
        &coordinator,
        &config,
        driver,
        OutputPipeline::new(sink.clone()),
        Arc::new(RecordingSleeper::new()),
    )
    .await
    .unwrap();

    // The search page plus the first two usable results
    assert_eq!(summary.handled, 3);
    assert_eq!(summary.failed, 0);
    let mut found = ids(&sink.records());
    found.sort();
    assert_eq!(found, vec!["e1", "n1", "n2"]);
}

#[tokio::test]
async fn test_details_results_type_emits_page_record() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(
        dir.path(),
        r#"
[[seed]]
url = "https://site.example/nasa/"

[[seed]]
url = "https://site.example/nasa/?tab=posts"
"#,
    );
    config.crawler.results_type = tidemark::state::ResultsType::Details;

    let driver = ReplayDriver::new()
        .with_fixture(Fixture::new(
            "https://site.example/nasa/",
            json!({"user": {"name": "nasa", "followers": 10}}),
            vec![page(&[("1", 20)], false)],
        ))
        .unwrap()
        .with_fixture(Fixture::new(
            "https://site.example/nasa/?tab=posts",
            json!({"user": {"name": "nasa", "followers": 10}}),
            Vec::new(),
        ))
        .unwrap();

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let sink = Arc::new(MemorySink::new());
    let summary = run_with(
        &coordinator,
        &config,
        driver,
        OutputPipeline::new(sink.clone()),
        Arc::new(RecordingSleeper::new()),
    )
    .await
    .unwrap();

    // Both pages resolve to the same entity, which is emitted once
    assert_eq!(summary.handled, 2);
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], "nasa");
    assert_eq!(records[0]["followers"], 10);
}

#[tokio::test]
async fn test_rate_limited_entity_backs_off_then_gives_up() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        r#"
[backoff]
base-delay-ms = 1000
max-retries = 2

[[seed]]
url = "https://site.example/nasa/"
"#,
    );

    let limited = json!({"rate_limited": true});
    let driver = ReplayDriver::new()
        .with_fixture(profile(
            "https://site.example/nasa/",
            "nasa",
            vec![
                limited.clone(),
                page(&[("1", 20)], true),
                limited.clone(),
                limited.clone(),
                limited,
            ],
        ))
        .unwrap();

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let sink = Arc::new(MemorySink::new());
    let sleeper = Arc::new(RecordingSleeper::new());
    let summary = run_with(
        &coordinator,
        &config,
        driver,
        OutputPipeline::new(sink.clone()),
        sleeper.clone(),
    )
    .await
    .unwrap();

    assert_eq!(summary.handled, 1);
    assert_eq!(ids(&sink.records()), vec!["1"]);
    assert_eq!(
        sleeper.sleeps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(2)
        ]
    );

    let states = coordinator
        .storage()
        .lock()
        .load_scroll_states(coordinator.run_id())
        .unwrap();
    assert_eq!(states["nasa"].stop_reason, Some(StopReason::RateLimited));
    assert!(!states["nasa"].is_finished());
}

#[tokio::test]
async fn test_output_hooks_and_field_projection() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        r#"
[[seed]]
url = "https://site.example/nasa/"
"#,
    );

    let driver = ReplayDriver::new()
        .with_fixture(profile(
            "https://site.example/nasa/",
            "nasa",
            vec![page(&[("keep", 20), ("drop", 19)], false)],
        ))
        .unwrap();

    let sink = Arc::new(MemorySink::new());
    let pipeline = OutputPipeline::new(sink.clone())
        .with_map(Arc::new(
            |item: &Value, ctx: &HookContext| -> Result<Value, HookError> {
                let mut item = item.clone();
                item["source"] = json!(ctx.entity_id);
                Ok(item)
            },
        ))
        .with_filter(Arc::new(
            |_raw: &Value, mapped: &Value, _ctx: &HookContext| -> Result<bool, HookError> {
                Ok(mapped["id"] != "drop")
            },
        ))
        .with_pick_fields(vec!["id".to_string(), "source".to_string()]);

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    run_with(
        &coordinator,
        &config,
        driver,
        pipeline,
        Arc::new(RecordingSleeper::new()),
    )
    .await
    .unwrap();

    assert_eq!(sink.records(), vec![json!({"id": "keep", "source": "nasa"})]);
}

#[tokio::test]
async fn test_exhausted_logins_abort_run() {
    let dir = TempDir::new().unwrap();
    let credentials = dir.path().join("logins.json");
    std::fs::write(&credentials, r#"[[{"name": "a"}], [{"name": "b"}]]"#).unwrap();

    let mut config = create_test_config(
        dir.path(),
        r#"
[[seed]]
url = "https://site.example/nasa/"
"#,
    );
    config.crawler.require_credentials = true;
    config.crawler.max_request_retries = 5;
    config.credentials.file = Some(credentials.display().to_string());
    config.credentials.max_error_count = 1;

    let driver = ReplayDriver::new()
        .with_fixture(profile(
            "https://site.example/nasa/",
            "nasa",
            vec![json!({"session_invalid": true})],
        ))
        .unwrap();

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let result = run_with(
        &coordinator,
        &config,
        driver,
        OutputPipeline::new(Arc::new(MemorySink::new())),
        Arc::new(RecordingSleeper::new()),
    )
    .await;

    assert!(matches!(result, Err(TidemarkError::NoCredentials)));
    assert_eq!(coordinator.credentials().usable_count(), 0);

    let storage = coordinator.storage().lock();
    assert_eq!(
        storage.get_run(coordinator.run_id()).unwrap().status,
        RunStatus::Failed
    );
    let saved = storage.load_credentials(coordinator.run_id()).unwrap();
    assert!(saved.iter().all(|c| c.errors == 1));
}

#[tokio::test]
async fn test_replay_writes_results_and_failures() {
    let dir = TempDir::new().unwrap();
    let fixtures = dir.path().join("fixtures");
    std::fs::create_dir(&fixtures).unwrap();
    std::fs::write(
        fixtures.join("nasa.json"),
        serde_json::to_string(&json!({
            "url": "https://site.example/nasa/",
            "state": {"user": {"name": "nasa"}},
            "responses": [page(&[("1", 20), ("2", 19)], false)]
        }))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        fixtures.join("gone.json"),
        serde_json::to_string(&json!({
            "url": "https://site.example/gone/",
            "state": {"not_found": true},
            "responses": []
        }))
        .unwrap(),
    )
    .unwrap();

    let config = create_test_config(
        dir.path(),
        r#"
[[seed]]
url = "https://site.example/nasa/"

[[seed]]
url = "https://site.example/gone/"
label = "gone"
"#,
    );

    let coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let summary = coordinator.run_replay().await.unwrap();
    assert_eq!(summary.handled, 1);
    assert_eq!(summary.failed, 1);

    let content = std::fs::read_to_string(dir.path().join("results.jsonl")).unwrap();
    let lines: Vec<Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);

    let failure = lines
        .iter()
        .find(|line| line.get("#error").is_some())
        .expect("failure record missing");
    assert_eq!(failure["#url"], "https://site.example/gone/");
    assert_eq!(failure["#label"], "gone");
    assert_eq!(failure["#attempts"], 1);

    let storage = SqliteStorage::new(&dir.path().join("run.db")).unwrap();
    let failed = storage.get_failed_work_items(coordinator.run_id()).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "https://site.example/gone/");
}
