use evidence_store::core::containers::{
    AnalysisReport, CONTAINER_TYPE_EVENT, CONTAINER_TYPE_EVENT_DATA, CONTAINER_TYPES, EventData,
    EventObject, ExtractionWarning,
};
use evidence_store::core::error::{StorageError, StorageResult};
use evidence_store::core::identifiers::Identifier;
use evidence_store::core::session::{Session, Task};
use evidence_store::core::time::TimeRange;
use evidence_store::storage::kv::{
    InjectedFault, KeyValueClient, KvOperation, KvStore, MemoryClient, SqliteKvClient,
    mark_task_as_merging, reset_merging_task, scan_for_merging_tasks, scan_for_processed_tasks,
};
use evidence_store::storage::{AttributeContainerStore, StorageType};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn open_task_store<C: KeyValueClient>(task: &Task, client: C) -> KvStore<C> {
    let mut store = KvStore::for_task(task).unwrap();
    store.open(client).unwrap();
    store
}

fn sorted_timestamps<C: KeyValueClient>(store: &KvStore<C>) -> Vec<i64> {
    store
        .get_sorted_events(None)
        .unwrap()
        .map(|event| event.map(|event| event.timestamp))
        .collect::<StorageResult<_>>()
        .unwrap()
}

#[test]
fn task_store_scenario_sorts_counts_and_finalizes() {
    let client = MemoryClient::new();
    let session = Session::new();
    let task = Task::new(&session.identifier).unwrap();
    let mut store = open_task_store(&task, client.clone());

    // 1. Events arrive out of order
    for timestamp in [100, 300, 200, 400] {
        let mut event = EventObject::new(timestamp, "Content Modification Time");
        let identifier = store.add_event(&mut event).unwrap();
        assert_eq!(event.identifier, Some(identifier));
    }
    assert_eq!(sorted_timestamps(&store), vec![100, 200, 300, 400]);
    assert_eq!(store.count_containers(CONTAINER_TYPE_EVENT).unwrap(), 4);

    // 2. Finalize closes the store for writes
    assert!(!store.is_finalized().unwrap());
    store.finalize().unwrap();
    assert!(store.is_finalized().unwrap());
    let err = store
        .add_event(&mut EventObject::new(500, "Content Modification Time"))
        .unwrap_err();
    assert!(matches!(err, StorageError::NotWritable(_)));
    assert_eq!(store.count_containers(CONTAINER_TYPE_EVENT).unwrap(), 4);

    // 3. The coordinator sees it
    let processed = scan_for_processed_tasks(&client, &session.identifier).unwrap();
    assert!(processed.contains(&task.identifier));
}

#[test]
fn events_with_equal_timestamps_all_come_back() {
    let client = MemoryClient::new();
    let task = Task::new("session_ties").unwrap();
    let mut store = open_task_store(&task, client).with_page_size(2);
    for timestamp in [30, 10, 20, 10, 30, 10] {
        store
            .add_event(&mut EventObject::new(timestamp, "Last Access Time"))
            .unwrap();
    }
    assert_eq!(sorted_timestamps(&store), vec![10, 10, 10, 20, 30, 30]);
}

#[test]
fn count_tracks_adds_and_removes() {
    let client = MemoryClient::new();
    let task = Task::new("session_count").unwrap();
    let mut store = open_task_store(&task, client);

    let mut identifiers = Vec::new();
    for index in 0..7 {
        let mut data = EventData::new("fs:stat").with_attribute("inode", index);
        identifiers.push(store.add_event_data(&mut data).unwrap());
    }
    for identifier in identifiers.iter().take(3) {
        store
            .remove_container(CONTAINER_TYPE_EVENT_DATA, identifier)
            .unwrap();
    }
    // Unknown identifiers are not an error
    store
        .remove_container(CONTAINER_TYPE_EVENT_DATA, &Identifier::new())
        .unwrap();

    assert_eq!(store.count_containers(CONTAINER_TYPE_EVENT_DATA).unwrap(), 4);
    assert!(store.has_containers(CONTAINER_TYPE_EVENT_DATA).unwrap());
    assert!(
        store
            .get_container_by_identifier::<EventData>(&identifiers[0])
            .unwrap()
            .is_none()
    );
    let kept: EventData = store
        .get_container_by_identifier(&identifiers[6])
        .unwrap()
        .unwrap();
    assert_eq!(kept.attributes["inode"], 6);
    assert_eq!(kept.identifier.as_ref(), Some(&identifiers[6]));
}

#[test]
fn removing_event_drops_index_entry() {
    let client = MemoryClient::new();
    let task = Task::new("session_idx").unwrap();
    let mut store = open_task_store(&task, client);
    let first = store.add_event(&mut EventObject::new(5, "Creation Time")).unwrap();
    store.add_event(&mut EventObject::new(7, "Creation Time")).unwrap();

    store.remove_container(CONTAINER_TYPE_EVENT, &first).unwrap();
    assert_eq!(sorted_timestamps(&store), vec![7]);
    assert!(store.verify_event_index().unwrap().is_consistent());
}

#[test]
fn finalize_is_idempotent() {
    let client = MemoryClient::new();
    let task = Task::new("session_idem").unwrap();
    let mut store = open_task_store(&task, client.clone());

    store.finalize().unwrap();
    assert!(store.is_finalized().unwrap());
    store.finalize().unwrap();
    assert!(store.is_finalized().unwrap());
    assert_eq!(client.hlen("session_idem-finalized").unwrap(), 1);
}

#[test]
fn finalize_is_refused_once_merging() {
    let client = MemoryClient::new();
    let task = Task::new("session_guard").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store.finalize().unwrap();
    mark_task_as_merging(&client, &task.identifier, &task.session_identifier).unwrap();

    let err = store.finalize().unwrap_err();
    assert!(matches!(err, StorageError::InvalidState(_)));
    assert!(!store.is_finalized().unwrap());
    let merging = scan_for_merging_tasks(&client, &task.session_identifier).unwrap();
    assert!(merging.contains(&task.identifier));
}

#[test]
fn reopened_finalized_store_stays_read_only() {
    let client = MemoryClient::new();
    let task = Task::new("session_reopen").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store.add_warning(&mut ExtractionWarning::new("bad header")).unwrap();
    store.finalize().unwrap();
    store.close().unwrap();

    let mut reopened = open_task_store(&task, client);
    let err = reopened
        .add_warning(&mut ExtractionWarning::new("late"))
        .unwrap_err();
    assert!(matches!(err, StorageError::NotWritable(_)));
}

#[test]
fn reopened_claimed_store_stays_read_only() {
    let client = MemoryClient::new();
    let task = Task::new("session_claimed").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store
        .add_event(&mut EventObject::new(1, "Creation Time"))
        .unwrap();
    store.finalize().unwrap();
    store.close().unwrap();
    mark_task_as_merging(&client, &task.identifier, &task.session_identifier).unwrap();

    let mut reopened = open_task_store(&task, client);
    let err = reopened
        .add_event(&mut EventObject::new(2, "Creation Time"))
        .unwrap_err();
    assert!(matches!(err, StorageError::NotWritable(_)));
    assert_eq!(reopened.count_containers(CONTAINER_TYPE_EVENT).unwrap(), 1);
}

#[test]
fn operations_need_a_client() {
    let task = Task::new("session_closed").unwrap();
    let mut store: KvStore<MemoryClient> = KvStore::for_task(&task).unwrap();
    assert!(matches!(
        store.add_event(&mut EventObject::new(1, "Creation Time")),
        Err(StorageError::NotWritable(_))
    ));
    assert!(matches!(store.is_finalized(), Err(StorageError::NotReadable(_))));
    assert!(matches!(store.finalize(), Err(StorageError::NotWritable(_))));
}

#[test]
fn time_range_filter_is_unsupported() {
    let client = MemoryClient::new();
    let task = Task::new("session_range").unwrap();
    let store = open_task_store(&task, client);
    let range = TimeRange::new(0, 10).unwrap();
    assert!(matches!(
        store.get_sorted_events(Some(&range)).err(),
        Some(StorageError::UnsupportedOperation(_))
    ));
}

#[test]
fn mark_task_as_merging_requires_finalized() {
    let client = MemoryClient::new();
    let err = mark_task_as_merging(&client, "task_never", "session_m").unwrap_err();
    assert!(matches!(err, StorageError::InvalidState(_)));
    assert!(scan_for_merging_tasks(&client, "session_m").unwrap().is_empty());
}

fn race_two_claims<C>(first: C, second: C, task_identifier: &str, session_identifier: &str)
where
    C: KeyValueClient + Send + 'static,
{
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [first, second]
        .into_iter()
        .map(|client| {
            let barrier = Arc::clone(&barrier);
            let task_identifier = task_identifier.to_string();
            let session_identifier = session_identifier.to_string();
            thread::spawn(move || {
                barrier.wait();
                mark_task_as_merging(&client, &task_identifier, &session_identifier)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let won = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(StorageError::InvalidState(_))))
        .count();
    assert_eq!((won, lost), (1, 1));
}

#[test]
fn concurrent_claims_on_memory_client_are_exclusive() {
    let client = MemoryClient::new();
    let task = Task::new("session_race").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store.finalize().unwrap();

    race_two_claims(
        client.clone(),
        client.clone(),
        &task.identifier,
        &task.session_identifier,
    );

    assert!(scan_for_processed_tasks(&client, "session_race").unwrap().is_empty());
    let merging = scan_for_merging_tasks(&client, "session_race").unwrap();
    assert_eq!(merging.into_iter().collect::<Vec<_>>(), vec![task.identifier]);
}

#[test]
fn concurrent_claims_across_database_connections_are_exclusive() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("shared.kv.db");
    let connect = || SqliteKvClient::connect_path(&path, Duration::from_secs(10)).unwrap();

    let task = Task::new("session_db_race").unwrap();
    let mut store = open_task_store(&task, connect());
    store.add_event(&mut EventObject::new(42, "Creation Time")).unwrap();
    store.finalize().unwrap();
    store.close().unwrap();

    race_two_claims(connect(), connect(), &task.identifier, &task.session_identifier);

    let observer = connect();
    assert!(
        scan_for_processed_tasks(&observer, "session_db_race")
            .unwrap()
            .is_empty()
    );
    assert!(
        scan_for_merging_tasks(&observer, "session_db_race")
            .unwrap()
            .contains(&task.identifier)
    );
}

#[test]
fn remove_leaves_no_keys_behind() {
    let client = MemoryClient::new();
    let task = Task::new("session_rm").unwrap();
    let other = Task::new("session_rm").unwrap();

    let mut store = open_task_store(&task, client.clone());
    let mut neighbour = open_task_store(&other, client.clone());
    neighbour
        .add_event(&mut EventObject::new(1, "Creation Time"))
        .unwrap();

    let mut data = EventData::new("browser:history");
    let data_identifier = store.add_event_data(&mut data).unwrap();
    let mut event = EventObject::new(10, "Last Visited Time");
    event.set_event_data_identifier(data_identifier);
    store.add_event(&mut event).unwrap();
    store
        .add_analysis_report(&mut AnalysisReport {
            plugin_name: "tagging".to_string(),
            ..Default::default()
        })
        .unwrap();
    store.finalize().unwrap();
    mark_task_as_merging(&client, &task.identifier, &task.session_identifier).unwrap();

    store.remove().unwrap();

    assert!(scan_for_processed_tasks(&client, "session_rm").unwrap().is_empty());
    assert!(scan_for_merging_tasks(&client, "session_rm").unwrap().is_empty());
    let prefix = format!("session_rm-{}-", task.identifier);
    assert!(client.keys_with_prefix(&prefix).unwrap().is_empty());
    assert_eq!(neighbour.count_containers(CONTAINER_TYPE_EVENT).unwrap(), 1);

    // Re-opening the namespace starts from nothing
    store.close().unwrap();
    let reopened = open_task_store(&task, client);
    for container_type in CONTAINER_TYPES {
        assert_eq!(reopened.count_containers(container_type).unwrap(), 0);
    }
    assert!(!reopened.is_finalized().unwrap());
}

#[test]
fn scan_timeout_degrades_to_empty() {
    let client = MemoryClient::new();
    let task = Task::new("session_timeout").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store.finalize().unwrap();

    client.fail_next(KvOperation::HKeys, InjectedFault::Timeout);
    assert!(
        scan_for_processed_tasks(&client, "session_timeout")
            .unwrap()
            .is_empty()
    );
    client.fail_next(KvOperation::HKeys, InjectedFault::Disconnected);
    assert!(
        scan_for_processed_tasks(&client, "session_timeout")
            .unwrap()
            .is_empty()
    );

    // The next scan recovers
    let processed = scan_for_processed_tasks(&client, "session_timeout").unwrap();
    assert!(processed.contains(&task.identifier));
}

#[test]
fn scan_of_empty_session_is_empty() {
    let client = MemoryClient::new();
    assert!(scan_for_processed_tasks(&client, "session_none").unwrap().is_empty());
}

#[test]
fn write_and_finalize_timeouts_propagate() {
    let client = MemoryClient::new();
    let task = Task::new("session_write_timeout").unwrap();
    let mut store = open_task_store(&task, client.clone());

    client.fail_next(KvOperation::HSet, InjectedFault::Timeout);
    let err = store
        .add_warning(&mut ExtractionWarning::new("lost"))
        .unwrap_err();
    assert!(err.is_transient());

    client.fail_next(KvOperation::HSetUnless, InjectedFault::Timeout);
    assert!(matches!(store.finalize(), Err(StorageError::Timeout(_))));
    assert!(!store.is_finalized().unwrap());
}

#[test]
fn failed_index_insert_is_detectable() {
    let client = MemoryClient::new();
    let task = Task::new("session_partial").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store.add_event(&mut EventObject::new(1, "Creation Time")).unwrap();

    client.fail_next(KvOperation::ZAdd, InjectedFault::Disconnected);
    let mut event = EventObject::new(2, "Creation Time");
    let err = store.add_event(&mut event).unwrap_err();
    assert!(matches!(err, StorageError::Disconnected(_)));

    // The container landed, its index entry did not
    assert_eq!(store.count_containers(CONTAINER_TYPE_EVENT).unwrap(), 2);
    assert_eq!(sorted_timestamps(&store), vec![1]);
    let report = store.verify_event_index().unwrap();
    assert!(!report.is_consistent());
    assert_eq!(report.number_of_events, 2);
    assert_eq!(report.number_of_index_entries, 1);
    assert_eq!(report.unindexed, vec![event.identifier.unwrap()]);
    assert!(report.dangling.is_empty());
}

#[test]
fn dangling_index_entry_is_skipped() {
    let client = MemoryClient::new();
    let task = Task::new("session_dangling").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store.add_event(&mut EventObject::new(3, "Creation Time")).unwrap();
    let key = format!("session_dangling-{}-sorted_event_identifier", task.identifier);
    client.zadd(&key, "01ARZ3NDEKTSV4RRFFQ69G5FAV", 1).unwrap();

    assert_eq!(sorted_timestamps(&store), vec![3]);
    let report = store.verify_event_index().unwrap();
    assert_eq!(report.dangling, vec!["01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string()]);
}

#[test]
fn reset_returns_claim_to_finalized() {
    let client = MemoryClient::new();
    let task = Task::new("session_reset").unwrap();
    let mut store = open_task_store(&task, client.clone());
    store.finalize().unwrap();
    mark_task_as_merging(&client, &task.identifier, "session_reset").unwrap();

    reset_merging_task(&client, &task.identifier, "session_reset").unwrap();
    assert!(store.is_finalized().unwrap());
    assert!(matches!(
        reset_merging_task(&client, &task.identifier, "session_reset"),
        Err(StorageError::InvalidState(_))
    ));
}

#[test]
fn session_storage_is_unsupported() {
    let result = KvStore::<MemoryClient>::new(StorageType::Session, Some("s"), Some("t"));
    assert!(matches!(
        result.err(),
        Some(StorageError::UnsupportedStorageType(_))
    ));
}

#[test]
fn namespace_components_are_validated() {
    let result = KvStore::<MemoryClient>::new(StorageType::Task, Some("a-b"), None);
    assert!(matches!(
        result.err(),
        Some(StorageError::InvalidIdentifier(_))
    ));
}

#[test]
fn lazy_iteration_pages_through_large_namespaces() {
    let client = MemoryClient::new();
    let task = Task::new("session_pages").unwrap();
    let mut store = open_task_store(&task, client).with_page_size(7);
    for timestamp in (0..50).rev() {
        store
            .add_event(&mut EventObject::new(timestamp, "Creation Time"))
            .unwrap();
    }
    assert_eq!(sorted_timestamps(&store), (0..50).collect::<Vec<_>>());
    assert_eq!(store.get_containers::<EventObject>().unwrap().count(), 50);
}
