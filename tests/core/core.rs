use evidence_store::core::config::{CONFIG_FILE_NAME, StoreConfig, load_store_config};
use evidence_store::core::containers::{CONTAINER_TYPE_EVENT, EventData, EventObject};
use evidence_store::core::error::StorageError;
use evidence_store::core::session::Task;
use evidence_store::storage::kv::{KvStore, SqliteKvClient, mark_task_as_merging};
use evidence_store::storage::sqlite::SqliteStorageReader;
use evidence_store::storage::{AttributeContainerStore, StorageReader, StorageType};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn run_cli(root: &Path, args: &[&str]) -> Output {
    let database = root.join("kv.db");
    Command::new(env!("CARGO_BIN_EXE_evidence-store"))
        .arg("--config")
        .arg(root)
        .arg("--database")
        .arg(&database)
        .args(args)
        .env("EVIDENCE_STORE_LOG", "error")
        .output()
        .expect("run evidence-store")
}

fn run_cli_json(root: &Path, args: &[&str]) -> Value {
    let mut full = vec!["--format", "json"];
    full.extend_from_slice(args);
    let output = run_cli(root, &full);
    assert!(
        output.status.success(),
        "evidence-store {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

fn finalized_task(root: &Path, session: &str, timestamps: &[i64]) -> Task {
    let client = SqliteKvClient::connect_path(&root.join("kv.db"), TIMEOUT).unwrap();
    let task = Task::new(session).unwrap();
    let mut store = KvStore::for_task(&task).unwrap();
    store.open(client).unwrap();
    for &timestamp in timestamps {
        let data_identifier = store
            .add_event_data(&mut EventData::new("fs:stat").with_attribute("size", timestamp))
            .unwrap();
        let mut event = EventObject::new(timestamp, "Modification Time");
        event.set_event_data_identifier(data_identifier);
        store.add_event(&mut event).unwrap();
    }
    store.finalize().unwrap();
    store.close().unwrap();
    task
}

#[test]
fn config_loads_from_directory_file_or_defaults() {
    let tmp = tempdir().unwrap();
    assert_eq!(load_store_config(tmp.path()).unwrap(), StoreConfig::default());

    fs::write(
        tmp.path().join(CONFIG_FILE_NAME),
        "[storage]\npage_size = 25\n\n[coordinator]\nstale_task_age_secs = 60\n",
    )
    .unwrap();
    let from_directory = load_store_config(tmp.path()).unwrap();
    assert_eq!(from_directory.storage.page_size, 25);
    assert_eq!(from_directory.coordinator.stale_task_age(), Duration::from_secs(60));

    let from_file = load_store_config(&tmp.path().join(CONFIG_FILE_NAME)).unwrap();
    assert_eq!(from_file, from_directory);

    let broken = tmp.path().join("broken.toml");
    fs::write(&broken, "[connection]\ntimeout_secs = 0\n").unwrap();
    assert!(matches!(
        load_store_config(&broken),
        Err(StorageError::Config(_))
    ));
}

#[test]
fn cli_scan_of_empty_session_prints_empty_list() {
    let tmp = tempdir().unwrap();
    let scanned = run_cli_json(tmp.path(), &["scan", "--session", "empty_session"]);
    assert_eq!(
        scanned,
        serde_json::json!({ "session": "empty_session", "finalized": [] })
    );

    let status = run_cli_json(tmp.path(), &["status", "--session", "empty_session"]);
    assert_eq!(status["tasks"], serde_json::json!([]));
}

#[test]
fn cli_rejects_invalid_session_identifier() {
    let tmp = tempdir().unwrap();
    let output = run_cli(tmp.path(), &["scan", "--session", "not-valid"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid identifier"));
}

#[test]
fn cli_scans_and_merges_finalized_tasks() {
    let tmp = tempdir().unwrap();
    let first = finalized_task(tmp.path(), "cli_session", &[300, 100]);
    let second = finalized_task(tmp.path(), "cli_session", &[200]);

    let scanned = run_cli_json(tmp.path(), &["scan", "--session", "cli_session"]);
    let mut finalized: Vec<&str> = scanned["finalized"]
        .as_array()
        .unwrap()
        .iter()
        .map(|value| value.as_str().unwrap())
        .collect();
    finalized.sort();
    let mut expected = vec![first.identifier.as_str(), second.identifier.as_str()];
    expected.sort();
    assert_eq!(finalized, expected);

    let status = run_cli_json(
        tmp.path(),
        &["status", "--session", "cli_session", "--task", first.identifier.as_str()],
    );
    assert_eq!(status["tasks"][0]["state"], "finalized");

    let output = tmp.path().join("session.sqlite");
    let merged = run_cli_json(
        tmp.path(),
        &[
            "merge",
            "--session",
            "cli_session",
            "--output",
            output.to_str().unwrap(),
        ],
    );
    let merged_tasks = merged["merged"].as_array().unwrap();
    assert_eq!(merged_tasks.len(), 2);
    let merged_events: u64 = merged_tasks
        .iter()
        .map(|task| task["summary"]["events"].as_u64().unwrap())
        .sum();
    assert_eq!(merged_events, 3);

    let status = run_cli_json(
        tmp.path(),
        &["status", "--session", "cli_session", "--task", first.identifier.as_str()],
    );
    assert_eq!(status["tasks"][0]["state"], "removed");

    let mut reader = SqliteStorageReader::new(StorageType::Session, &output, TIMEOUT);
    reader.open().unwrap();
    assert_eq!(reader.count_containers(CONTAINER_TYPE_EVENT).unwrap(), 3);
    let timestamps: Vec<i64> = reader
        .get_sorted_events(None)
        .unwrap()
        .map(|event| event.unwrap().timestamp)
        .collect();
    assert_eq!(timestamps, vec![100, 200, 300]);
    reader.close().unwrap();
}

#[test]
fn cli_recover_lists_and_resets_stuck_claims() {
    let tmp = tempdir().unwrap();
    let listed = run_cli_json(tmp.path(), &["recover", "--session", "stuck_session"]);
    assert_eq!(listed["merging"], serde_json::json!([]));

    let task = finalized_task(tmp.path(), "stuck_session", &[1]);
    let client = SqliteKvClient::connect_path(&tmp.path().join("kv.db"), TIMEOUT).unwrap();
    mark_task_as_merging(&client, &task.identifier, "stuck_session").unwrap();
    drop(client);

    let listed = run_cli_json(tmp.path(), &["recover", "--session", "stuck_session"]);
    assert_eq!(listed["merging"], serde_json::json!([task.identifier]));

    let reset = run_cli_json(
        tmp.path(),
        &["recover", "--session", "stuck_session", "--task", task.identifier.as_str()],
    );
    assert_eq!(reset["reset"], task.identifier.as_str());

    let scanned = run_cli_json(tmp.path(), &["scan", "--session", "stuck_session"]);
    assert_eq!(scanned["finalized"], serde_json::json!([task.identifier]));
}

#[test]
fn cli_sweep_leaves_fresh_tasks_alone() {
    let tmp = tempdir().unwrap();
    let client = SqliteKvClient::connect_path(&tmp.path().join("kv.db"), TIMEOUT).unwrap();
    let task = Task::new("sweep_session").unwrap();
    let mut store = KvStore::for_task(&task).unwrap();
    store.open(client).unwrap();
    store
        .write_task_start(&mut task.create_task_start())
        .unwrap();
    store.close().unwrap();

    let swept = run_cli_json(tmp.path(), &["sweep", "--session", "sweep_session"]);
    assert_eq!(swept["swept"], serde_json::json!([]));

    let status = run_cli_json(
        tmp.path(),
        &["status", "--session", "sweep_session", "--task", task.identifier.as_str()],
    );
    assert_eq!(status["tasks"][0]["state"], "unfinalized");
}
