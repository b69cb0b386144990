//! `IndexValue` and its write-side companion `IndexEntry`, plus `FileSpan`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed-width on-disk record: 8 + 8 + 1 + 8 bytes.
pub const INDEX_VALUE_SIZE_IN_BYTES: usize = 25;

/// Sentinel meaning "never expires".
pub const TTL_NEVER: i64 = -1;

/// Bit for [IndexValue::is_flag_set] / [IndexValue::set_flag]: the record at
/// this offset is a delete marker rather than a live blob.
pub const DELETE_INDEX_FLAG: u8 = 0b0000_0001;

/// `[start, end)` range of log bytes a record occupies (§3).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct FileSpan {
    pub start_offset: u64,
    pub end_offset: u64,
}

impl FileSpan {
    pub fn new(start_offset: u64, end_offset: u64) -> FileSpan {
        debug_assert!(start_offset <= end_offset);
        FileSpan {
            start_offset,
            end_offset,
        }
    }
}

/// Offset + size + flags + expiration record persisted per key (§3).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct IndexValue {
    pub offset: u64,
    pub size: u64,
    pub flags: u8,
    pub time_to_live_ms: i64,
}

impl IndexValue {
    pub fn new(offset: u64, size: u64, time_to_live_ms: i64) -> IndexValue {
        IndexValue {
            offset,
            size,
            flags: 0,
            time_to_live_ms,
        }
    }

    pub fn is_flag_set(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u8) {
        self.flags |= flag;
    }

    pub fn set_new_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn set_new_size(&mut self, size: u64) {
        self.size = size;
    }

    pub fn is_deleted(&self) -> bool {
        self.is_flag_set(DELETE_INDEX_FLAG)
    }

    /// Compares `time_to_live_ms` against wall-clock now. `TTL_NEVER` never
    /// expires.
    pub fn is_expired(&self) -> bool {
        if self.time_to_live_ms == TTL_NEVER {
            return false;
        }
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.time_to_live_ms <= now_ms
    }

    pub(crate) fn to_bytes(self) -> [u8; INDEX_VALUE_SIZE_IN_BYTES] {
        let mut buf = [0u8; INDEX_VALUE_SIZE_IN_BYTES];
        buf[0..8].copy_from_slice(&self.offset.to_be_bytes());
        buf[8..16].copy_from_slice(&self.size.to_be_bytes());
        buf[16] = self.flags;
        buf[17..25].copy_from_slice(&self.time_to_live_ms.to_be_bytes());
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> IndexValue {
        debug_assert_eq!(buf.len(), INDEX_VALUE_SIZE_IN_BYTES);
        let offset = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let size = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        let flags = buf[16];
        let time_to_live_ms = i64::from_be_bytes(buf[17..25].try_into().unwrap());
        IndexValue {
            offset,
            size,
            flags,
            time_to_live_ms,
        }
    }
}

/// Write-side bundle handed to `addToIndex` (§3).
#[derive(Clone, Debug)]
pub struct IndexEntry<K> {
    pub key: K,
    pub value: IndexValue,
}

impl<K> IndexEntry<K> {
    pub fn new(key: K, value: IndexValue) -> IndexEntry<K> {
        IndexEntry { key, value }
    }
}

#[cfg(test)]
mod value_test;
