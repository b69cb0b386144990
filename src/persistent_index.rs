//! `PersistentIndex`: the aggregate that owns the segment map, the log
//! collaborator, the journal, and session/recovery bookkeeping, and
//! implements every read/write/scan operation in §4.3–§4.5.

use std::{
    collections::{BTreeMap, BTreeSet},
    ffi, fs,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    config::{IndexConfig, Stats},
    error::{Result, StoreError},
    files,
    journal::Journal,
    key::{StoreKey, StoreKeyFactory},
    log::Log,
    metrics::IndexMetrics,
    persistor::{IndexPersistor, Scheduler},
    recovery::{MessageInfo, MessageStoreRecovery},
    segment::IndexSegment,
    token::{StoreFindToken, UNINITIALIZED_OFFSET},
    value::{FileSpan, IndexEntry, IndexValue, DELETE_INDEX_FLAG},
};

/// State shared, via `Arc`, between a [PersistentIndex] and its background
/// [IndexPersistor] — the non-owning back reference called for in §9.
pub struct PersistentIndexShared<K> {
    pub segments: RwLock<BTreeMap<u64, IndexSegment<K>>>,
    pub log: Arc<dyn Log>,
    pub data_dir: ffi::OsString,
    pub config: IndexConfig,
    pub metrics: Arc<dyn IndexMetrics>,
}

/// Orchestrates the ordered map of segments: routes lookups, inserts,
/// deletes; performs recovery; implements `findEntriesSince`.
pub struct PersistentIndex<K> {
    shared: Arc<PersistentIndexShared<K>>,
    journal: Mutex<Journal<K>>,
    session_id: Uuid,
    clean_shutdown: bool,
    log_end_offset_on_startup: u64,
    persistor: IndexPersistor<K>,
    closed: AtomicBool,
}

impl<K: StoreKey> PersistentIndex<K> {
    /// Construction per §4.3: load segments, run recovery, snapshot the
    /// session, reconcile the clean-shutdown marker, schedule the persistor.
    pub fn new(
        config: IndexConfig,
        log: Arc<dyn Log>,
        recovery: &dyn MessageStoreRecovery<K>,
        key_factory: Arc<dyn StoreKeyFactory<K>>,
        metrics: Arc<dyn IndexMetrics>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<PersistentIndex<K>> {
        crate::err_at!(IOError, fs::create_dir_all(&config.dir))?;

        let file_names = files::list_segment_files(&config.dir)?;
        let n = file_names.len();
        let mut segments = BTreeMap::new();
        for (i, file_name) in file_names.into_iter().enumerate() {
            let start_offset = file_name.start_offset;
            let segment = if i + 2 < n {
                IndexSegment::open_mapped(&config.dir, file_name, start_offset)?
            } else {
                IndexSegment::open_mutable(&config.dir, file_name, start_offset)?
            };
            segments.insert(start_offset, segment);
        }

        let mut journal = Journal::new(config.journal_max_elements, config.journal_max_return);
        let recovery_start = Instant::now();
        let messages_replayed = run_recovery(
            &mut segments,
            &config.dir,
            &config.name,
            log.as_ref(),
            recovery,
            key_factory.as_ref(),
            &mut journal,
            metrics.as_ref(),
        )?;
        metrics.recovery_completed(recovery_start.elapsed(), messages_replayed);

        let current_end_offset = segments
            .values()
            .next_back()
            .map(|s| s.end_offset().max(0) as u64)
            .unwrap_or(0);
        log.set_log_end_offset(current_end_offset)?;
        let log_end_offset_on_startup = log.get_log_end_offset();

        let session_id = Uuid::new_v4();

        let marker_path = files::clean_shutdown_marker_path(&config.dir);
        let clean_shutdown = marker_path.exists();
        if clean_shutdown {
            crate::err_at!(IOError, fs::remove_file(&marker_path))?;
        }
        info!(
            "index opened at {:?}, clean_shutdown={}, log_end_offset_on_startup={}",
            config.dir, clean_shutdown, log_end_offset_on_startup
        );

        let shared = Arc::new(PersistentIndexShared {
            segments: RwLock::new(segments),
            log,
            data_dir: config.dir.clone(),
            config,
            metrics,
        });

        let persistor = IndexPersistor::new(shared.clone(), scheduler);
        persistor.start();

        Ok(PersistentIndex {
            shared,
            journal: Mutex::new(journal),
            session_id,
            clean_shutdown,
            log_end_offset_on_startup,
            persistor,
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Whether the on-disk `cleanshutdown` marker was present (and
    /// consumed) when this instance was opened (§4.3, §4.6).
    pub fn is_clean_shutdown(&self) -> bool {
        self.clean_shutdown
    }

    /// Best-effort snapshot: `n_entries` counts every record ever written
    /// to a segment (not de-duplicated across segments, mirroring
    /// `numberOfItems`); `n_deleted` is not tracked incrementally and is
    /// always reported as `0`.
    pub fn stats(&self) -> Stats {
        let segments = self.shared.segments.read();
        let n_entries: u64 = segments.values().map(|segment| segment.number_of_items() as u64).sum();
        Stats::with_counts(&self.shared.config, segments.len(), n_entries, 0)
    }

    fn current_end_offset(&self) -> u64 {
        let segments = self.shared.segments.read();
        segments
            .values()
            .next_back()
            .map(|s| s.end_offset().max(0) as u64)
            .unwrap_or(0)
    }

    fn validate_file_span(&self, file_span: &FileSpan) -> Result<()> {
        let current_end = self.current_end_offset();
        if current_end <= file_span.start_offset && file_span.start_offset <= file_span.end_offset {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(format!(
                "file span {}..{} violates current end offset {}",
                file_span.start_offset, file_span.end_offset, current_end
            )))
        }
    }

    fn needs_new_segment(&self, segments: &BTreeMap<u64, IndexSegment<K>>, key_size: usize) -> bool {
        let config = &self.shared.config;
        match segments.values().next_back() {
            None => true,
            Some(active) => {
                active.size_written() >= config.max_in_memory_index_size_bytes
                    || active.number_of_items() >= config.max_in_memory_num_elements
                    || active.key_size != key_size
                    || active.value_size != crate::value::INDEX_VALUE_SIZE_IN_BYTES
            }
        }
    }

    /// §4.3 `addToIndex(entry, fileSpan)`.
    pub fn add_to_index(&self, entry: IndexEntry<K>, file_span: FileSpan) -> Result<()> {
        self.add_to_index_batch(vec![entry], file_span)
    }

    /// §4.3 `addToIndex(entries, fileSpan)` — batched variant; rollover is
    /// decided from `entries[0]`.
    pub fn add_to_index_batch(&self, entries: Vec<IndexEntry<K>>, file_span: FileSpan) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.validate_file_span(&file_span)?;

        let key_size = entries[0].key.size_in_bytes();
        let rollover_start_offset = entries[0].value.offset;

        let mut segments = self.shared.segments.write();
        if self.needs_new_segment(&segments, key_size) {
            let segment = IndexSegment::create(&self.shared.data_dir, &self.shared.config.name, rollover_start_offset, key_size);
            segments.insert(rollover_start_offset, segment);
            self.shared.metrics.segment_rolled_over(rollover_start_offset);
            debug!("rolled over new active segment at start_offset={}", rollover_start_offset);
        }

        let (&active_offset, _) = segments.iter().next_back().unwrap();
        let mut journal = self.journal.lock();
        for entry in &entries {
            if journal.add_entry(entry.value.offset, entry.key.clone()) {
                self.shared.metrics.journal_evicted();
            }
        }
        let active = segments.get_mut(&active_offset).unwrap();
        active.add_entries(entries.into_iter().map(|e| (e.key, e.value)), file_span.end_offset)
    }

    /// §4.3 `markAsDeleted(key, fileSpan)`.
    pub fn mark_as_deleted(&self, key: &K, file_span: FileSpan) -> Result<()> {
        self.validate_file_span(&file_span)?;

        let mut value = self.find_key(key).ok_or(StoreError::IdNotFound)?;
        value.set_flag(DELETE_INDEX_FLAG);
        value.set_new_offset(file_span.start_offset);
        value.set_new_size(file_span.end_offset - file_span.start_offset);

        let key_size = key.size_in_bytes();
        let mut segments = self.shared.segments.write();
        if self.needs_new_segment(&segments, key_size) {
            let segment = IndexSegment::create(&self.shared.data_dir, &self.shared.config.name, file_span.start_offset, key_size);
            segments.insert(file_span.start_offset, segment);
            self.shared.metrics.segment_rolled_over(file_span.start_offset);
        }

        let (&active_offset, _) = segments.iter().next_back().unwrap();
        let active = segments.get_mut(&active_offset).unwrap();
        active.add_entry(key.clone(), value, file_span.end_offset)?;
        if self.journal.lock().add_entry(file_span.start_offset, key.clone()) {
            self.shared.metrics.journal_evicted();
        }
        Ok(())
    }

    /// §4.3 `findKey` — newest segment first, first hit wins (MVCC by recency).
    pub fn find_key(&self, key: &K) -> Option<IndexValue> {
        let segments = self.shared.segments.read();
        segments.values().rev().find_map(|segment| segment.find(key))
    }

    pub fn exists(&self, key: &K) -> bool {
        self.find_key(key).is_some()
    }

    /// §4.3 `getBlobReadInfo`.
    pub fn get_blob_read_info(&self, key: &K) -> Result<(u64, u64, i64, K)> {
        let value = self.find_key(key).ok_or(StoreError::IdNotFound)?;
        if value.is_deleted() {
            return Err(StoreError::IdDeleted);
        }
        if value.is_expired() {
            return Err(StoreError::TtlExpired);
        }
        Ok((value.offset, value.size, value.time_to_live_ms, key.clone()))
    }

    /// §4.3 `findMissingKeys` — deleted and expired keys count as present.
    pub fn find_missing_keys(&self, keys: &[K]) -> BTreeSet<K> {
        keys.iter().filter(|key| self.find_key(key).is_none()).cloned().collect()
    }

    /// §4.5 `findEntriesSince`.
    pub fn find_entries_since(
        &self,
        mut token: StoreFindToken<K>,
        max_total_size_of_entries: u64,
    ) -> Result<(Vec<MessageInfo<K>>, StoreFindToken<K>)> {
        let log_end_offset_before_find = self.shared.log.get_log_end_offset();

        if token.session_id != self.session_id {
            let points_past_startup = match (token.offset, token.index_start_offset) {
                (offset, _) if offset != UNINITIALIZED_OFFSET => offset as u64 > self.log_end_offset_on_startup,
                (_, index_start_offset) if index_start_offset != UNINITIALIZED_OFFSET => {
                    index_start_offset as u64 >= self.log_end_offset_on_startup
                }
                _ => false,
            };
            if points_past_startup {
                if self.clean_shutdown {
                    return Err(StoreError::InvalidArgument(
                        "token references bytes past a clean shutdown's known committed end".to_string(),
                    ));
                }
                token = StoreFindToken::journal_shape(self.session_id, self.log_end_offset_on_startup as i64, 0);
            }
        }

        let (mut entries, mut new_token) = if token.is_journal_shape() {
            self.scan_from_journal_shape(&token, max_total_size_of_entries)?
        } else {
            let after_key = token.store_key.clone();
            self.find_entries_from_offset(token.index_start_offset as u64, after_key.as_ref(), max_total_size_of_entries)?
        };

        eliminate_duplicates(&mut entries);
        new_token.session_id = self.session_id;
        new_token.bytes_read = compute_bytes_read(&new_token, &entries, log_end_offset_before_find);
        self.shared.metrics.scan_invoked(entries.len());

        Ok((entries, new_token))
    }

    fn scan_from_journal_shape(
        &self,
        token: &StoreFindToken<K>,
        max_total_size: u64,
    ) -> Result<(Vec<MessageInfo<K>>, StoreFindToken<K>)> {
        let offset_to_start = if token.offset == UNINITIALIZED_OFFSET { 0 } else { token.offset as u64 };
        let inclusive = token.offset == UNINITIALIZED_OFFSET;

        let journal_entries = self.journal.lock().get_entries_since(offset_to_start, inclusive);

        match journal_entries {
            Some(entries) => {
                let mut out = Vec::new();
                let mut offset_end = offset_to_start;
                let mut acc = 0u64;
                for journal_entry in &entries {
                    if acc >= max_total_size {
                        break;
                    }
                    if let Some(value) = self.find_key(&journal_entry.key) {
                        acc += value.size;
                        out.push(MessageInfo {
                            store_key: journal_entry.key.clone(),
                            size: value.size,
                            is_deleted: value.is_deleted(),
                            expiration_time_ms: value.time_to_live_ms,
                        });
                        offset_end = journal_entry.offset;
                    }
                }
                let new_token = StoreFindToken::journal_shape(self.session_id, offset_end as i64, 0);
                Ok((out, new_token))
            }
            None => {
                let floor_offset = {
                    let segments = self.shared.segments.read();
                    segments.range(..=offset_to_start).next_back().map(|(&offset, _)| offset)
                };
                match floor_offset {
                    Some(floor_offset) => self.find_entries_from_offset(floor_offset, None, max_total_size),
                    None => Ok((Vec::new(), token.clone())),
                }
            }
        }
    }

    /// §4.5 `findEntriesFromOffset`.
    fn find_entries_from_offset(
        &self,
        start_offset: u64,
        after_key: Option<&K>,
        max_total_size: u64,
    ) -> Result<(Vec<MessageInfo<K>>, StoreFindToken<K>)> {
        let segments = self.shared.segments.read();
        let offsets: Vec<u64> = segments.range(start_offset..).map(|(&offset, _)| offset).collect();

        let mut raw: Vec<(K, IndexValue)> = Vec::new();
        let mut acc = 0u64;
        let mut last_appended_key: Option<K> = None;
        let mut journal_offset_end: Option<u64> = None;
        let mut last_offset_visited = start_offset;

        let last_offset = match offsets.last() {
            Some(&offset) => offset,
            None => {
                drop(segments);
                let new_token = match after_key {
                    Some(key) => StoreFindToken::segment_shape(self.session_id, start_offset as i64, key.clone(), 0),
                    None => StoreFindToken::journal_shape(self.session_id, start_offset as i64, 0),
                };
                return Ok((Vec::new(), new_token));
            }
        };

        let mut first = true;
        for offset in offsets {
            if acc >= max_total_size {
                break;
            }
            last_offset_visited = offset;
            if offset == last_offset {
                drop(segments);
                let entries = self.journal.lock().get_entries_since(last_offset, true);
                if let Some(entries) = entries {
                    let mut offset_end = last_offset;
                    for journal_entry in &entries {
                        if acc >= max_total_size {
                            break;
                        }
                        if let Some(value) = self.find_key(&journal_entry.key) {
                            acc += value.size;
                            last_appended_key = Some(journal_entry.key.clone());
                            offset_end = journal_entry.offset;
                            raw.push((journal_entry.key.clone(), value));
                        }
                    }
                    journal_offset_end = Some(offset_end);
                }
                break;
            }

            let segment = segments.get(&offset).unwrap();
            let filter = if first { after_key } else { None };
            segment.get_entries_since(filter, max_total_size, &mut raw, &mut acc);
            if let Some((key, _)) = raw.last() {
                last_appended_key = Some(key.clone());
            }
            first = false;
        }

        let messages = raw
            .into_iter()
            .map(|(key, value)| MessageInfo {
                store_key: key,
                size: value.size,
                is_deleted: value.is_deleted(),
                expiration_time_ms: value.time_to_live_ms,
            })
            .collect();

        let new_token = match journal_offset_end {
            Some(offset_end) => StoreFindToken::journal_shape(self.session_id, offset_end as i64, 0),
            None => match last_appended_key {
                Some(key) => StoreFindToken::segment_shape(self.session_id, last_offset_visited as i64, key, 0),
                None => StoreFindToken::segment_shape(
                    self.session_id,
                    last_offset_visited as i64,
                    after_key.cloned().unwrap_or_else(|| unreachable!("segment-shape resume always carries a prior key")),
                    0,
                ),
            },
        };

        Ok((messages, new_token))
    }

    /// §4.6 `close()` — final synchronous flush, then the `cleanshutdown`
    /// marker. Idempotent: a second call is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.persistor.close()
    }
}

impl<K> Drop for PersistentIndex<K> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(err) = self.persistor.close() {
                warn!("error flushing index on drop: {}", err);
            }
        }
    }
}

fn eliminate_duplicates<K: StoreKey>(entries: &mut Vec<MessageInfo<K>>) {
    let mut seen = BTreeSet::new();
    let mut kept: Vec<MessageInfo<K>> = Vec::with_capacity(entries.len());
    for entry in entries.iter().rev() {
        if seen.insert(entry.store_key.clone()) {
            kept.push(entry.clone());
        }
    }
    kept.reverse();
    *entries = kept;
}

fn compute_bytes_read<K>(new_token: &StoreFindToken<K>, entries: &[MessageInfo<K>], log_end_offset_before_find: u64) -> u64 {
    if new_token.offset == UNINITIALIZED_OFFSET {
        if new_token.index_start_offset == UNINITIALIZED_OFFSET {
            0
        } else {
            new_token.index_start_offset as u64
        }
    } else if let Some(last) = entries.last() {
        new_token.offset as u64 + last.size
    } else {
        log_end_offset_before_find
    }
}

/// §4.4 recovery procedure.
fn run_recovery<K: StoreKey>(
    segments: &mut BTreeMap<u64, IndexSegment<K>>,
    data_dir: &ffi::OsStr,
    segment_name: &str,
    log: &dyn Log,
    recovery: &dyn MessageStoreRecovery<K>,
    key_factory: &dyn StoreKeyFactory<K>,
    journal: &mut Journal<K>,
    metrics: &dyn IndexMetrics,
) -> Result<usize> {
    let offsets: Vec<u64> = segments.keys().copied().collect();
    let mut replayed = 0usize;

    if let Some(&last_offset) = offsets.last() {
        if offsets.len() >= 2 {
            let prev_offset = offsets[offsets.len() - 2];
            let prev_end = segment_effective_end(segments, prev_offset);
            replayed += recover_into(segments, data_dir, segment_name, prev_offset, prev_end, last_offset, log, recovery, key_factory, journal, metrics)?;
        }

        let last_end = segment_effective_end(segments, last_offset);
        let log_size = log.size_in_bytes();
        replayed += recover_into(segments, data_dir, segment_name, last_offset, last_end, log_size, log, recovery, key_factory, journal, metrics)?;
    } else {
        let log_size = log.size_in_bytes();
        if log_size > 0 {
            replayed += recover_into(segments, data_dir, segment_name, 0, 0, log_size, log, recovery, key_factory, journal, metrics)?;
        }
    }

    Ok(replayed)
}

fn segment_effective_end<K>(segments: &BTreeMap<u64, IndexSegment<K>>, offset: u64) -> u64 {
    match segments.get(&offset) {
        Some(segment) if segment.end_offset() >= 0 => segment.end_offset() as u64,
        _ => offset,
    }
}

fn recover_into<K: StoreKey>(
    segments: &mut BTreeMap<u64, IndexSegment<K>>,
    data_dir: &ffi::OsStr,
    segment_name: &str,
    target_offset: u64,
    from: u64,
    to: u64,
    log: &dyn Log,
    recovery: &dyn MessageStoreRecovery<K>,
    key_factory: &dyn StoreKeyFactory<K>,
    journal: &mut Journal<K>,
    metrics: &dyn IndexMetrics,
) -> Result<usize> {
    if from >= to {
        return Ok(0);
    }

    let messages = recovery.recover(log, from, to, key_factory)?;
    let mut running_offset = from;
    let mut count = 0usize;

    for info in messages {
        let existing = segments.values().rev().find_map(|segment| segment.find(&info.store_key));

        if !segments.contains_key(&target_offset) {
            let segment = IndexSegment::create(data_dir, segment_name, target_offset, info.store_key.size_in_bytes());
            segments.insert(target_offset, segment);
        }
        let target = segments.get_mut(&target_offset).unwrap();

        match existing {
            Some(mut value) => {
                if !info.is_deleted {
                    return Err(StoreError::InitializationError(format!(
                        "recovery found a non-delete record for an already-indexed key at offset {}",
                        running_offset
                    )));
                }
                value.set_flag(DELETE_INDEX_FLAG);
                value.set_new_offset(running_offset);
                value.set_new_size(info.size);
                target.add_entry(info.store_key.clone(), value, running_offset + info.size)?;
            }
            None => {
                let mut value = IndexValue::new(running_offset, info.size, info.expiration_time_ms);
                if info.is_deleted {
                    value.set_flag(DELETE_INDEX_FLAG);
                }
                target.add_entry(info.store_key.clone(), value, running_offset + info.size)?;
            }
        }

        if journal.add_entry(running_offset, info.store_key.clone()) {
            metrics.journal_evicted();
        }
        running_offset += info.size;
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
#[path = "persistent_index_test.rs"]
mod persistent_index_test;
