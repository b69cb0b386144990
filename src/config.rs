//! Tunables for [crate::PersistentIndex], handed in as a typed struct rather
//! than loaded from a config file (config-file loading is out of scope).

use std::{ffi, time::Duration};

use cbordata::{Cbor, Cborize, FromCbor, IntoCbor};

use crate::error::{Result, StoreError};

/// Default rollover threshold on the projected on-disk size of the active
/// segment, in bytes.
pub const MAX_IN_MEMORY_INDEX_SIZE_BYTES: usize = 20 * 1024 * 1024;
/// Default rollover threshold on the number of entries in the active segment.
pub const MAX_IN_MEMORY_NUM_ELEMENTS: usize = 100_000;
/// Default journal capacity, in (offset, key) pairs retained.
pub const JOURNAL_MAX_ELEMENTS: usize = 20_000;
/// Default cap on entries a single `getEntriesSince` call returns from the
/// journal.
pub const JOURNAL_MAX_RETURN: usize = 5_000;
/// Default persistor flush period.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);
/// Default upper bound on the persistor's randomized initial-delay jitter.
pub const FLUSH_DELAY_JITTER_MAX: Duration = Duration::from_secs(60);

/// Configuration for a [crate::PersistentIndex]. Use `new` to start from
/// defaults, then the `set_*` methods to override individual tunables.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Directory holding segment files and the `cleanshutdown` marker.
    pub dir: ffi::OsString,
    /// Base name used to compose segment and bloom-filter file names.
    pub name: String,
    /// Rollover threshold, §4.1: active `sizeWritten >= max_in_memory_index_size_bytes`.
    pub max_in_memory_index_size_bytes: usize,
    /// Rollover threshold, §4.1: active `numberOfItems >= max_in_memory_num_elements`.
    pub max_in_memory_num_elements: usize,
    /// Journal capacity, §3: evict oldest once this many entries are held.
    pub journal_max_elements: usize,
    /// Journal return cap, §3: `getEntriesSince` never returns more than this many.
    pub journal_max_return: usize,
    /// Persistor tick period.
    pub flush_interval: Duration,
    /// Upper bound of the persistor's randomized initial-delay jitter.
    pub flush_delay_jitter_max: Duration,
    /// Whether mapped segments get a companion bloom filter file.
    pub bloom_filter: bool,
}

impl IndexConfig {
    pub fn new(dir: &ffi::OsStr, name: &str) -> IndexConfig {
        IndexConfig {
            dir: dir.to_os_string(),
            name: name.to_string(),
            max_in_memory_index_size_bytes: MAX_IN_MEMORY_INDEX_SIZE_BYTES,
            max_in_memory_num_elements: MAX_IN_MEMORY_NUM_ELEMENTS,
            journal_max_elements: JOURNAL_MAX_ELEMENTS,
            journal_max_return: JOURNAL_MAX_RETURN,
            flush_interval: FLUSH_INTERVAL,
            flush_delay_jitter_max: FLUSH_DELAY_JITTER_MAX,
            bloom_filter: false,
        }
    }

    pub fn set_rollover(&mut self, size_bytes: usize, num_elements: usize) -> &mut Self {
        self.max_in_memory_index_size_bytes = size_bytes;
        self.max_in_memory_num_elements = num_elements;
        self
    }

    pub fn set_journal(&mut self, max_elements: usize, max_return: usize) -> &mut Self {
        self.journal_max_elements = max_elements;
        self.journal_max_return = max_return;
        self
    }

    pub fn set_flush_interval(&mut self, interval: Duration, jitter_max: Duration) -> &mut Self {
        self.flush_interval = interval;
        self.flush_delay_jitter_max = jitter_max;
        self
    }

    pub fn set_bloom_filter(&mut self, enabled: bool) -> &mut Self {
        self.bloom_filter = enabled;
        self
    }
}

const STATS_VER: u32 = 0x0001;

/// Subset of [IndexConfig] worth snapshotting at index-close time, mirroring
/// the reference crate's `Config` → `Stats` split. Encodable via `cbordata`
/// the same way the reference crate persists its own `robt::Stats`
/// alongside a file's metadata block.
#[derive(Clone, Debug, Cborize)]
pub struct Stats {
    pub name: String,
    pub n_segments: usize,
    pub n_entries: u64,
    pub n_deleted: u64,
}

impl Stats {
    const ID: u32 = STATS_VER;

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let cbor = self
            .clone()
            .into_cbor()
            .map_err(|err| StoreError::IndexCreationFailure(format!("stats encode: {}", err)))?;
        cbor.encode(&mut data)
            .map_err(|err| StoreError::IndexCreationFailure(format!("stats encode: {}", err)))?;
        Ok(data)
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Stats> {
        let (cbor, _) = Cbor::decode(&mut data)
            .map_err(|err| StoreError::IndexCreationFailure(format!("stats decode: {}", err)))?;
        Stats::from_cbor(cbor).map_err(|err| StoreError::IndexCreationFailure(format!("stats decode: {}", err)))
    }
}

impl From<&IndexConfig> for Stats {
    /// Baseline snapshot with no index-runtime state; `PersistentIndex`
    /// fills in real counters via [Stats::with_counts].
    fn from(config: &IndexConfig) -> Stats {
        Stats {
            name: config.name.clone(),
            n_segments: 0,
            n_entries: 0,
            n_deleted: 0,
        }
    }
}

impl Stats {
    pub fn with_counts(config: &IndexConfig, n_segments: usize, n_entries: u64, n_deleted: u64) -> Stats {
        Stats {
            name: config.name.clone(),
            n_segments,
            n_entries,
            n_deleted,
        }
    }
}
