use evidence_store::core::containers::{
    AnalysisReport, CONTAINER_TYPE_EVENT, CONTAINER_TYPE_EXTRACTION_WARNING,
    CONTAINER_TYPE_SESSION_COMPLETION, EventData, EventObject, EventSource, EventTag,
    ExtractionWarning, SessionCompletion, SessionStart,
};
use evidence_store::core::error::{StorageError, StorageResult};
use evidence_store::core::identifiers::Identifier;
use evidence_store::core::session::{Session, Task};
use evidence_store::core::time::TimeRange;
use evidence_store::storage::sqlite::{SqliteStorageReader, SqliteStorageWriter, SqliteStore};
use evidence_store::storage::{AttributeContainerStore, StorageReader, StorageType, StorageWriter};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::tempdir;

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn session_file_round_trips_every_container_kind() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("session.sqlite");
    let mut session = Session::with_identifier("case_001").unwrap();

    let mut writer = SqliteStorageWriter::for_session(&path, TIMEOUT);
    writer.open().unwrap();
    writer.write_session_start(&session).unwrap();

    let mut data = EventData::new("windows:registry:key_value")
        .with_attribute("key_path", "HKEY_LOCAL_MACHINE\\Software")
        .with_attribute("values", serde_json::json!(["a", "b"]));
    data.parser = Some("winreg".to_string());
    let data_identifier = writer.add_event_data(&mut data).unwrap();

    let mut event = EventObject::new(1_700_000_000_000_000, "Last Written Time");
    event.set_event_data_identifier(data_identifier.clone());
    let event_identifier = writer.add_event(&mut event).unwrap();

    let mut tag = EventTag {
        event_identifier: Some(event_identifier.clone()),
        comment: Some("persistence".to_string()),
        ..Default::default()
    };
    tag.add_label("autorun");
    writer.add_event_tag(&mut tag).unwrap();

    let mut source = EventSource {
        data_type: "os:file".to_string(),
        path_spec: "/Windows/System32/config/SOFTWARE".to_string(),
        ..Default::default()
    };
    writer.add_event_source(&mut source).unwrap();

    let mut report = AnalysisReport {
        plugin_name: "tagging".to_string(),
        text: Some("1 event tagged".to_string()),
        analysis_counter: BTreeMap::from([("autorun".to_string(), 1)]),
        ..Default::default()
    };
    writer.add_analysis_report(&mut report).unwrap();

    let mut warning = ExtractionWarning {
        parser_chain: Some("winreg".to_string()),
        ..ExtractionWarning::new("unable to parse value")
    };
    writer.add_warning(&mut warning).unwrap();
    writer.write_session_completion(&mut session, false).unwrap();
    writer.close().unwrap();

    let mut reader = SqliteStorageReader::new(StorageType::Session, &path, TIMEOUT);
    reader.open().unwrap();

    let stored_data: EventData = reader
        .get_container_by_identifier(&data_identifier)
        .unwrap()
        .unwrap();
    assert_eq!(stored_data, data);
    let stored_event: EventObject = reader
        .get_container_by_identifier(&event_identifier)
        .unwrap()
        .unwrap();
    assert_eq!(stored_event, event);

    let tags: Vec<EventTag> = reader
        .get_containers::<EventTag>()
        .unwrap()
        .collect::<StorageResult<_>>()
        .unwrap();
    assert_eq!(tags, vec![tag]);
    let sources: Vec<EventSource> = reader
        .get_containers::<EventSource>()
        .unwrap()
        .collect::<StorageResult<_>>()
        .unwrap();
    assert_eq!(sources, vec![source]);
    let reports: Vec<AnalysisReport> = reader
        .get_containers::<AnalysisReport>()
        .unwrap()
        .collect::<StorageResult<_>>()
        .unwrap();
    assert_eq!(reports, vec![report]);
    assert_eq!(reader.get_number_of_analysis_reports().unwrap(), 1);
    assert_eq!(
        reader
            .count_containers(CONTAINER_TYPE_EXTRACTION_WARNING)
            .unwrap(),
        1
    );

    let starts: Vec<SessionStart> = reader
        .get_containers::<SessionStart>()
        .unwrap()
        .collect::<StorageResult<_>>()
        .unwrap();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].session_identifier, "case_001");
    let completions: Vec<SessionCompletion> = reader
        .get_containers::<SessionCompletion>()
        .unwrap()
        .collect::<StorageResult<_>>()
        .unwrap();
    assert_eq!(completions[0].timestamp, session.completion_time.unwrap());
    assert!(reader.has_containers(CONTAINER_TYPE_SESSION_COMPLETION).unwrap());
    reader.close().unwrap();
}

#[test]
fn sorted_events_respect_time_range() {
    let tmp = tempdir().unwrap();
    let mut store = SqliteStore::new(StorageType::Session).with_page_size(3);
    store
        .open_path(&tmp.path().join("range.sqlite"), TIMEOUT)
        .unwrap();
    for timestamp in [90, 10, 70, 30, 50, 30, 80, 20, 60, 40] {
        store
            .add_event(&mut EventObject::new(timestamp, "Creation Time"))
            .unwrap();
    }

    let timestamps = |range: Option<&TimeRange>| -> Vec<i64> {
        store
            .get_sorted_events(range)
            .unwrap()
            .map(|event| event.map(|event| event.timestamp))
            .collect::<StorageResult<_>>()
            .unwrap()
    };
    assert_eq!(
        timestamps(None),
        vec![10, 20, 30, 30, 40, 50, 60, 70, 80, 90]
    );
    assert_eq!(
        timestamps(Some(&TimeRange::new(30, 60).unwrap())),
        vec![30, 30, 40, 50]
    );
    assert!(timestamps(Some(&TimeRange::new(55, 55).unwrap())).is_empty());
    assert!(TimeRange::new(60, 30).is_err());
}

#[test]
fn count_invariant_holds_across_removals() {
    let tmp = tempdir().unwrap();
    let mut store = SqliteStore::new(StorageType::Task);
    store
        .open_path(&tmp.path().join("count.sqlite"), TIMEOUT)
        .unwrap();

    let identifiers: Vec<Identifier> = (0..10)
        .map(|timestamp| {
            store
                .add_event(&mut EventObject::new(timestamp, "Creation Time"))
                .unwrap()
        })
        .collect();
    for identifier in &identifiers[..4] {
        store
            .remove_container(CONTAINER_TYPE_EVENT, identifier)
            .unwrap();
    }
    store
        .remove_container(CONTAINER_TYPE_EVENT, &Identifier::new())
        .unwrap();

    assert_eq!(store.count_containers(CONTAINER_TYPE_EVENT).unwrap(), 6);
    let remaining: Vec<i64> = store
        .get_sorted_events(None)
        .unwrap()
        .map(|event| event.map(|event| event.timestamp))
        .collect::<StorageResult<_>>()
        .unwrap();
    assert_eq!(remaining, vec![4, 5, 6, 7, 8, 9]);
}

#[test]
fn task_writer_close_finalizes_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("task.sqlite");
    let task = Task::new("session_file").unwrap();

    let mut writer = SqliteStorageWriter::for_task(&task, &path, TIMEOUT);
    writer.open().unwrap();
    writer.write_task_start().unwrap();
    writer.write_task_completion(false).unwrap();
    assert!(matches!(
        writer.write_session_start(&Session::new()),
        Err(StorageError::UnsupportedStorageType(_))
    ));
    writer.close().unwrap();

    let mut reader = SqliteStorageReader::new(StorageType::Task, &path, TIMEOUT);
    reader.open().unwrap();
    assert!(reader.store().unwrap().is_finalized().unwrap());
    reader.close().unwrap();
}

#[test]
fn facade_enforces_open_close_discipline() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("discipline.sqlite");
    let mut writer = SqliteStorageWriter::for_session(&path, TIMEOUT);

    assert!(matches!(
        writer.add_warning(&mut ExtractionWarning::new("early")),
        Err(StorageError::NotOpen(_))
    ));
    writer.open().unwrap();
    assert!(matches!(writer.open(), Err(StorageError::AlreadyOpen(_))));
    writer.close().unwrap();
    assert!(matches!(
        writer.count_containers(CONTAINER_TYPE_EVENT),
        Err(StorageError::NotOpen(_))
    ));
    assert!(matches!(writer.close(), Err(StorageError::NotOpen(_))));
    assert!(writer.open().is_err());
}

#[test]
fn reader_refuses_missing_file() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("absent.sqlite");
    let mut reader = SqliteStorageReader::new(StorageType::Session, &path, TIMEOUT);
    assert!(matches!(reader.open(), Err(StorageError::NotReadable(_))));
    assert!(!path.exists());
}

#[test]
fn store_open_twice_is_already_connected() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("twice.sqlite");
    let mut store = SqliteStore::new(StorageType::Session);
    store.open_path(&path, TIMEOUT).unwrap();
    assert!(matches!(
        store.open_path(&path, TIMEOUT),
        Err(StorageError::AlreadyConnected(_))
    ));
    assert!(store.is_open());
    store.close().unwrap();
    assert!(!store.is_open());
}
