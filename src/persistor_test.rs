use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::*;
use crate::config::IndexConfig;
use crate::error::StoreError;
use crate::key::test_key::TestKey;
use crate::log::InMemoryLog;
use crate::metrics::NoopMetrics;
use crate::persistent_index::PersistentIndexShared;
use crate::segment::IndexSegment;
use crate::value::IndexValue;

fn shared_with_one_segment(dir: &std::path::Path) -> Arc<PersistentIndexShared<TestKey>> {
    let config = IndexConfig::new(dir.as_os_str(), "blobstore");
    let log: Arc<dyn Log> = Arc::new(InMemoryLog::new());
    log.append(&[0u8; 30]).unwrap();

    let mut segment: IndexSegment<TestKey> = IndexSegment::create(&config.dir, &config.name, 0, 8);
    segment
        .add_entries(vec![(TestKey(1), IndexValue::new(0, 30, -1))], 30)
        .unwrap();

    let mut segments = BTreeMap::new();
    segments.insert(0, segment);

    Arc::new(PersistentIndexShared {
        segments: RwLock::new(segments),
        log,
        data_dir: config.dir.clone(),
        config,
        metrics: Arc::new(NoopMetrics),
    })
}

#[test]
fn write_once_flushes_active_segment_up_to_log_end() {
    let dir = tempfile::tempdir().unwrap();
    let shared = shared_with_one_segment(dir.path());

    write_once(&shared).unwrap();

    let segments = shared.segments.read();
    let active = segments.get(&0).unwrap();
    assert!(!active.is_mapped());
    assert_eq!(active.number_of_items(), 1);
}

#[test]
fn write_once_maps_earlier_unmapped_segments_but_not_the_active_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig::new(dir.path().as_os_str(), "blobstore");
    let log: Arc<dyn Log> = Arc::new(InMemoryLog::new());
    log.append(&[0u8; 60]).unwrap();

    let mut sealed: IndexSegment<TestKey> = IndexSegment::create(&config.dir, &config.name, 0, 8);
    sealed.add_entries(vec![(TestKey(1), IndexValue::new(0, 30, -1))], 30).unwrap();
    let mut active: IndexSegment<TestKey> = IndexSegment::create(&config.dir, &config.name, 30, 8);
    active.add_entries(vec![(TestKey(2), IndexValue::new(30, 30, -1))], 60).unwrap();

    let mut segments = BTreeMap::new();
    segments.insert(0, sealed);
    segments.insert(30, active);

    let shared = Arc::new(PersistentIndexShared {
        segments: RwLock::new(segments),
        log,
        data_dir: config.dir.clone(),
        config,
        metrics: Arc::new(NoopMetrics),
    });

    write_once(&shared).unwrap();

    let segments = shared.segments.read();
    assert!(segments.get(&0).unwrap().is_mapped());
    assert!(!segments.get(&30).unwrap().is_mapped());
}

#[test]
fn write_once_rejects_segment_claiming_bytes_past_flushed_log_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = IndexConfig::new(dir.path().as_os_str(), "blobstore");
    let log: Arc<dyn Log> = Arc::new(InMemoryLog::new());
    log.append(&[0u8; 10]).unwrap();
    log.set_log_end_offset(10).unwrap();

    let mut sealed: IndexSegment<TestKey> = IndexSegment::create(&config.dir, &config.name, 0, 8);
    sealed.add_entries(vec![(TestKey(1), IndexValue::new(0, 50, -1))], 50).unwrap();
    let mut active: IndexSegment<TestKey> = IndexSegment::create(&config.dir, &config.name, 50, 8);
    active.add_entries(vec![(TestKey(2), IndexValue::new(50, 1, -1))], 51).unwrap();

    let mut segments = BTreeMap::new();
    segments.insert(0, sealed);
    segments.insert(50, active);

    let shared = Arc::new(PersistentIndexShared {
        segments: RwLock::new(segments),
        log,
        data_dir: config.dir.clone(),
        config,
        metrics: Arc::new(NoopMetrics),
    });

    let err = write_once(&shared).unwrap_err();
    assert!(matches!(err, StoreError::IoError(_, _)));
}

#[test]
fn manual_scheduler_runs_registered_tasks_on_demand() {
    let scheduler = ManualScheduler::new();
    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = ran.clone();
    scheduler.schedule(
        "probe",
        Box::new(move || flag.store(true, std::sync::atomic::Ordering::SeqCst)),
        std::time::Duration::from_secs(0),
        std::time::Duration::from_secs(60),
    );

    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    scheduler.run_pending();
    assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn close_writes_cleanshutdown_marker() {
    let dir = tempfile::tempdir().unwrap();
    let shared = shared_with_one_segment(dir.path());
    let persistor = IndexPersistor::new(shared.clone(), Arc::new(ManualScheduler::new()));

    persistor.close().unwrap();

    assert!(crate::files::clean_shutdown_marker_path(&shared.data_dir).exists());
}
