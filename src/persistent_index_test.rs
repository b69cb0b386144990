use std::sync::Arc;

use super::*;
use crate::key::{test_key::TestKey, DefaultKeyFactory};
use crate::log::InMemoryLog;
use crate::metrics::NoopMetrics;
use crate::persistor::ManualScheduler;
use crate::recovery::MessageInfo;

struct NoRecovery;

impl MessageStoreRecovery<TestKey> for NoRecovery {
    fn recover(
        &self,
        _log: &dyn Log,
        _start_offset: u64,
        _end_offset: u64,
        _key_factory: &dyn StoreKeyFactory<TestKey>,
    ) -> Result<Vec<MessageInfo<TestKey>>> {
        Ok(Vec::new())
    }
}

struct ScriptedRecovery(Vec<MessageInfo<TestKey>>);

impl MessageStoreRecovery<TestKey> for ScriptedRecovery {
    fn recover(
        &self,
        _log: &dyn Log,
        _start_offset: u64,
        _end_offset: u64,
        _key_factory: &dyn StoreKeyFactory<TestKey>,
    ) -> Result<Vec<MessageInfo<TestKey>>> {
        Ok(self.0.clone())
    }
}

fn open(dir: &std::path::Path) -> PersistentIndex<TestKey> {
    let config = IndexConfig::new(dir.as_os_str(), "blobstore");
    let log: Arc<dyn Log> = Arc::new(InMemoryLog::new());
    PersistentIndex::new(
        config,
        log,
        &NoRecovery,
        Arc::new(DefaultKeyFactory),
        Arc::new(NoopMetrics),
        Arc::new(ManualScheduler::new()),
    )
    .unwrap()
}

#[test]
fn add_then_find_key_returns_value() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .add_to_index(
            IndexEntry::new(TestKey(1), IndexValue::new(0, 10, -1)),
            FileSpan::new(0, 10),
        )
        .unwrap();

    let value = index.find_key(&TestKey(1)).unwrap();
    assert_eq!(value.offset, 0);
    assert_eq!(value.size, 10);
    assert!(index.exists(&TestKey(1)));
    assert!(!index.exists(&TestKey(2)));
}

#[test]
fn mark_as_deleted_reflects_in_find_key() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .add_to_index(
            IndexEntry::new(TestKey(1), IndexValue::new(0, 10, -1)),
            FileSpan::new(0, 10),
        )
        .unwrap();
    index.mark_as_deleted(&TestKey(1), FileSpan::new(10, 20)).unwrap();

    let value = index.find_key(&TestKey(1)).unwrap();
    assert!(value.is_deleted());
    assert_eq!(value.offset, 10);

    let err = index.get_blob_read_info(&TestKey(1)).unwrap_err();
    assert!(matches!(err, StoreError::IdDeleted));
}

#[test]
fn mark_as_deleted_missing_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());
    let err = index.mark_as_deleted(&TestKey(1), FileSpan::new(0, 10)).unwrap_err();
    assert!(matches!(err, StoreError::IdNotFound));
}

#[test]
fn repeated_key_is_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .add_to_index(IndexEntry::new(TestKey(1), IndexValue::new(0, 5, -1)), FileSpan::new(0, 5))
        .unwrap();
    index
        .add_to_index(
            IndexEntry::new(TestKey(1), IndexValue::new(5, 8, -1)),
            FileSpan::new(5, 13),
        )
        .unwrap();

    let value = index.find_key(&TestKey(1)).unwrap();
    assert_eq!(value.offset, 5);
    assert_eq!(value.size, 8);
}

#[test]
fn file_span_violating_current_end_offset_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .add_to_index(IndexEntry::new(TestKey(1), IndexValue::new(0, 10, -1)), FileSpan::new(0, 10))
        .unwrap();

    let err = index
        .add_to_index(IndexEntry::new(TestKey(2), IndexValue::new(5, 10, -1)), FileSpan::new(5, 15))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));
}

#[test]
fn find_missing_keys_excludes_present_deleted_and_expired() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .add_to_index(IndexEntry::new(TestKey(1), IndexValue::new(0, 10, -1)), FileSpan::new(0, 10))
        .unwrap();
    index.mark_as_deleted(&TestKey(1), FileSpan::new(10, 20)).unwrap();
    index
        .add_to_index(IndexEntry::new(TestKey(2), IndexValue::new(20, 5, -1)), FileSpan::new(20, 25))
        .unwrap();

    let missing = index.find_missing_keys(&[TestKey(1), TestKey(2), TestKey(3)]);
    assert_eq!(missing, [TestKey(3)].into_iter().collect());
}

#[test]
fn find_entries_since_empty_token_returns_journal_inserts_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .add_to_index(IndexEntry::new(TestKey(1), IndexValue::new(0, 10, -1)), FileSpan::new(0, 10))
        .unwrap();
    index
        .add_to_index(IndexEntry::new(TestKey(2), IndexValue::new(10, 15, -1)), FileSpan::new(10, 25))
        .unwrap();
    index
        .add_to_index(IndexEntry::new(TestKey(3), IndexValue::new(25, 5, -1)), FileSpan::new(25, 30))
        .unwrap();

    let (entries, new_token) = index.find_entries_since(StoreFindToken::empty(), u64::MAX).unwrap();

    assert_eq!(entries.iter().map(|e| e.store_key.0).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(new_token.is_journal_shape());
    assert_eq!(new_token.offset, 25);
    assert_eq!(new_token.bytes_read, 30);
}

#[test]
fn find_entries_since_eliminates_duplicate_keys_keeping_latest() {
    let dir = tempfile::tempdir().unwrap();
    let index = open(dir.path());

    index
        .add_to_index(IndexEntry::new(TestKey(1), IndexValue::new(0, 10, -1)), FileSpan::new(0, 10))
        .unwrap();
    index.mark_as_deleted(&TestKey(1), FileSpan::new(10, 20)).unwrap();

    let (entries, _) = index.find_entries_since(StoreFindToken::empty(), u64::MAX).unwrap();

    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_deleted);
}

#[test]
fn clean_shutdown_marker_is_written_on_close_and_cleared_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let index = open(dir.path());
        index
            .add_to_index(IndexEntry::new(TestKey(1), IndexValue::new(0, 10, -1)), FileSpan::new(0, 10))
            .unwrap();
        index.close().unwrap();
    }
    assert!(crate::files::clean_shutdown_marker_path(dir.path().as_os_str()).exists());

    let reopened = open(dir.path());
    assert!(reopened.clean_shutdown);
    assert!(!crate::files::clean_shutdown_marker_path(dir.path().as_os_str()).exists());
}

#[test]
fn recovery_replays_messages_from_fresh_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig::new(dir.path().as_os_str(), "blobstore");
    let log: Arc<dyn Log> = Arc::new(InMemoryLog::new());
    log.append(&[0u8; 15]).unwrap();

    let recovery = ScriptedRecovery(vec![
        MessageInfo {
            store_key: TestKey(1),
            size: 10,
            is_deleted: false,
            expiration_time_ms: -1,
        },
        MessageInfo {
            store_key: TestKey(2),
            size: 5,
            is_deleted: false,
            expiration_time_ms: -1,
        },
    ]);

    let index = PersistentIndex::new(
        config,
        log,
        &recovery,
        Arc::new(DefaultKeyFactory),
        Arc::new(NoopMetrics),
        Arc::new(ManualScheduler::new()),
    )
    .unwrap();

    assert_eq!(index.find_key(&TestKey(1)).unwrap().offset, 0);
    assert_eq!(index.find_key(&TestKey(2)).unwrap().offset, 10);
}
