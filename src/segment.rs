//! `IndexSegment`: a sorted key→value map over a contiguous log range, in
//! either *mutable* or *mapped read-only* state (§3, §4.1).
//!
//! Mapping follows the reference crate's intent to memory-map index blocks
//! (`# memmap = "0.7.0"`, left commented out in the source crate's
//! `Cargo.toml`) using `memmap2`, the maintained descendant, the same way
//! `spacetimedb-commitlog`'s `index::indexfile` module maps its offset
//! index (`IndexFileMut`): map the whole file, binary-search the mapped
//! bytes, keep the file descriptor alive for the life of the mapping.

use std::{collections::BTreeMap, ffi, fs, io::Write};

use fs2::FileExt;
use log::{debug, warn};
use memmap2::Mmap;

use crate::{
    bloom::SegmentBloom,
    error::{Result, StoreError},
    files::SegmentFileName,
    key::StoreKey,
    value::{IndexValue, INDEX_VALUE_SIZE_IN_BYTES},
};

const HEADER_VERSION: u16 = 1;
// version:u16 | keySize:u32 | valueSize:u32 | startOffset:u64 | endOffset:u64 | numEntries:u32
const HEADER_LEN: usize = 2 + 4 + 4 + 8 + 8 + 4;
const CRC_LEN: usize = 4;

/// `-1` sentinel used by the source spec for "segment has no entries yet".
/// Represented here as `None` on the mutable side; mapped segments always
/// have a concrete `end_offset` because they are only created from a
/// flushed, non-empty mutable segment.
pub const NO_END_OFFSET: i64 = -1;

enum State<K> {
    Mutable(Mutable<K>),
    Mapped(Mapped<K>),
}

struct Mutable<K> {
    entries: BTreeMap<K, IndexValue>,
    end_offset: Option<u64>,
}

struct Mapped<K> {
    mmap: Mmap,
    _file: fs::File,
    num_entries: usize,
    end_offset: u64,
    bloom: Option<SegmentBloom>,
    _marker: std::marker::PhantomData<K>,
}

impl<K> Drop for Mapped<K> {
    fn drop(&mut self) {
        if let Err(err) = self._file.unlock() {
            warn!("failed to unlock mapped segment fd: {}", err);
        }
    }
}

/// A single segment. `key_size` is fixed for the lifetime of the segment
/// (§3 invariant a); `value_size` is always [INDEX_VALUE_SIZE_IN_BYTES].
pub struct IndexSegment<K> {
    pub start_offset: u64,
    pub key_size: usize,
    pub value_size: usize,
    file_name: SegmentFileName,
    dir: ffi::OsString,
    state: State<K>,
}

impl<K: StoreKey> IndexSegment<K> {
    /// Create a new, empty, mutable segment starting at `start_offset`.
    pub fn create(dir: &ffi::OsStr, name: &str, start_offset: u64, key_size: usize) -> IndexSegment<K> {
        IndexSegment {
            start_offset,
            key_size,
            value_size: INDEX_VALUE_SIZE_IN_BYTES,
            file_name: SegmentFileName {
                start_offset,
                name: name.to_string(),
            },
            dir: dir.to_os_string(),
            state: State::Mutable(Mutable {
                entries: BTreeMap::new(),
                end_offset: None,
            }),
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.state, State::Mapped(_))
    }

    pub fn end_offset(&self) -> i64 {
        match &self.state {
            State::Mutable(m) => m.end_offset.map(|o| o as i64).unwrap_or(NO_END_OFFSET),
            State::Mapped(m) => m.end_offset as i64,
        }
    }

    pub fn number_of_items(&self) -> usize {
        match &self.state {
            State::Mutable(m) => m.entries.len(),
            State::Mapped(m) => m.num_entries,
        }
    }

    /// Projected on-disk size if flushed right now: header + all entries
    /// currently held. Used by rollover decisions (§4.1).
    pub fn size_written(&self) -> usize {
        match &self.state {
            State::Mutable(m) => HEADER_LEN + m.entries.len() * (self.key_size + self.value_size) + CRC_LEN,
            State::Mapped(m) => HEADER_LEN + m.num_entries * (self.key_size + self.value_size) + CRC_LEN,
        }
    }

    /// §4.1 `addEntry`: preconditions — segment must be mutable, key width
    /// must match, `new_end_offset` must not move backwards. Last write
    /// wins for a repeated key.
    pub fn add_entry(&mut self, key: K, value: IndexValue, new_end_offset: u64) -> Result<()> {
        self.add_entries(std::iter::once((key, value)), new_end_offset)
    }

    pub fn add_entries(
        &mut self,
        entries: impl IntoIterator<Item = (K, IndexValue)>,
        new_end_offset: u64,
    ) -> Result<()> {
        let m = match &mut self.state {
            State::Mutable(m) => m,
            State::Mapped(_) => {
                return Err(StoreError::InvalidArgument(
                    "cannot add entries to a mapped segment".to_string(),
                ))
            }
        };
        if let Some(end_offset) = m.end_offset {
            if new_end_offset < end_offset {
                return Err(StoreError::InvalidArgument(format!(
                    "new_end_offset {} precedes current end_offset {}",
                    new_end_offset, end_offset
                )));
            }
        }
        for (key, value) in entries {
            m.entries.insert(key, value);
        }
        m.end_offset = Some(new_end_offset);
        Ok(())
    }

    /// §4.1 `find`: constant-or-log time lookup. In mapped state, a bloom
    /// filter (if present) is consulted first to skip the binary search on
    /// a definite miss.
    pub fn find(&self, key: &K) -> Option<IndexValue> {
        match &self.state {
            State::Mutable(m) => m.entries.get(key).copied(),
            State::Mapped(m) => {
                if let Some(bloom) = &m.bloom {
                    if !bloom.may_contain(&format!("{:?}", key)) {
                        return None;
                    }
                }
                binary_search(&m.mmap, m.num_entries, self.key_size, self.value_size, key)
            }
        }
    }

    /// §4.1 `getEntriesSince`: entries strictly greater than `after_key`
    /// (or all entries when `after_key` is `None`), ascending, stopping
    /// once `*size_acc >= max_bytes`.
    pub fn get_entries_since(
        &self,
        after_key: Option<&K>,
        max_bytes: u64,
        out: &mut Vec<(K, IndexValue)>,
        size_acc: &mut u64,
    ) {
        if *size_acc >= max_bytes {
            return;
        }
        match &self.state {
            State::Mutable(m) => {
                let iter: Box<dyn Iterator<Item = (&K, &IndexValue)>> = match after_key {
                    Some(k) => Box::new(m.entries.range((
                        std::ops::Bound::Excluded(k.clone()),
                        std::ops::Bound::Unbounded,
                    ))),
                    None => Box::new(m.entries.iter()),
                };
                for (k, v) in iter {
                    out.push((k.clone(), *v));
                    *size_acc += v.size;
                    if *size_acc >= max_bytes {
                        break;
                    }
                }
            }
            State::Mapped(m) => {
                let start = match after_key {
                    Some(k) => match binary_search_index(&m.mmap, m.num_entries, self.key_size, self.value_size, k) {
                        Ok(idx) => idx + 1,
                        Err(idx) => idx,
                    },
                    None => 0,
                };
                for idx in start..m.num_entries {
                    let (k, v) = read_record::<K>(&m.mmap, idx, self.key_size, self.value_size);
                    out.push((k, v));
                    *size_acc += v.size;
                    if *size_acc >= max_bytes {
                        break;
                    }
                }
            }
        }
    }

    /// §4.1 `writeIndexToFile`: serialize `(header, sorted records whose
    /// bytes are fully within `end_offset_at_flush`)` atomically — write to
    /// a temp file, fsync, rename. Does not change the segment's in-memory
    /// state; only a later [IndexSegment::map] call does that.
    pub fn write_index_to_file(&self, end_offset_at_flush: u64) -> Result<()> {
        let m = match &self.state {
            State::Mutable(m) => m,
            State::Mapped(_) => return Ok(()),
        };

        let mut records: Vec<(&K, &IndexValue)> = m
            .entries
            .iter()
            .filter(|(_, v)| v.offset + v.size <= end_offset_at_flush)
            .collect();
        records.sort_by(|a, b| a.0.cmp(b.0));

        let final_path = self.file_name.index_path(&self.dir);
        let tmp_path = final_path.with_extension("index.tmp");

        let mut buf = Vec::with_capacity(HEADER_LEN + records.len() * (self.key_size + self.value_size) + CRC_LEN);
        buf.extend_from_slice(&HEADER_VERSION.to_be_bytes());
        buf.extend_from_slice(&(self.key_size as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value_size as u32).to_be_bytes());
        buf.extend_from_slice(&self.start_offset.to_be_bytes());
        buf.extend_from_slice(&end_offset_at_flush.to_be_bytes());
        buf.extend_from_slice(&(records.len() as u32).to_be_bytes());
        for (key, value) in &records {
            key.write_bytes(&mut buf);
            buf.extend_from_slice(&value.to_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());

        let mut tmp_file = crate::err_at!(IOError, fs::File::create(&tmp_path))?;
        crate::err_at!(IOError, tmp_file.write_all(&buf))?;
        crate::err_at!(IOError, tmp_file.sync_all())?;
        crate::err_at!(IOError, fs::rename(&tmp_path, &final_path))?;

        debug!(
            "wrote segment start_offset={} entries={} end_offset={}",
            self.start_offset,
            records.len(),
            end_offset_at_flush
        );
        Ok(())
    }

    /// §4.1 `map(readOnly)`: memory-map the on-disk file, drop the
    /// in-memory map, transition to `mapped` state. One-way (§3 invariant
    /// c): calling this twice is a no-op.
    pub fn map(&mut self, build_bloom: bool) -> Result<()> {
        if self.is_mapped() {
            return Ok(());
        }

        let path = self.file_name.index_path(&self.dir);
        let file = crate::err_at!(IOError, fs::File::open(&path))?;
        crate::err_at!(IOError, file.lock_shared())?;

        let mmap = crate::err_at!(IOError, unsafe { Mmap::map(&file) })?;

        let (key_size, value_size, end_offset, num_entries) = parse_header(&mmap, self.start_offset)?;
        verify_checksum(&mmap)?;

        let bloom = if build_bloom {
            let keys: Vec<String> = (0..num_entries)
                .map(|idx| format!("{:?}", read_record::<K>(&mmap, idx, key_size, value_size).0))
                .collect();
            let bloom = SegmentBloom::build(keys.into_iter());
            write_bloom_to_file(&bloom, &self.file_name, &self.dir)?;
            Some(bloom)
        } else {
            load_bloom(&self.file_name, &self.dir)?
        };

        self.key_size = key_size;
        self.value_size = value_size;
        self.state = State::Mapped(Mapped {
            mmap,
            _file: file,
            num_entries,
            end_offset,
            bloom,
            _marker: std::marker::PhantomData,
        });
        debug!("mapped segment start_offset={} entries={}", self.start_offset, num_entries);
        Ok(())
    }

    /// Reload an already-flushed segment from disk (used on startup, §4.3).
    pub fn open_mapped(dir: &ffi::OsStr, file_name: SegmentFileName, start_offset: u64) -> Result<IndexSegment<K>> {
        let mut seg = IndexSegment {
            start_offset,
            key_size: 0,
            value_size: INDEX_VALUE_SIZE_IN_BYTES,
            file_name,
            dir: dir.to_os_string(),
            state: State::Mutable(Mutable {
                entries: BTreeMap::new(),
                end_offset: None,
            }),
        };
        seg.map(false)?;
        Ok(seg)
    }

    /// Load the last, still-open segment mutably by replaying its on-disk
    /// records back into an in-memory map (used for the last two segments
    /// during recovery, §4.3).
    pub fn open_mutable(dir: &ffi::OsStr, file_name: SegmentFileName, start_offset: u64) -> Result<IndexSegment<K>> {
        let path = file_name.index_path(dir);
        let bytes = crate::err_at!(IOError, fs::read(&path))?;
        let (key_size, value_size, end_offset, num_entries) = parse_header(&bytes, start_offset)?;
        verify_checksum(&bytes)?;

        let mut entries = BTreeMap::new();
        for idx in 0..num_entries {
            let (key, value) = read_record::<K>(&bytes, idx, key_size, value_size);
            entries.insert(key, value);
        }

        Ok(IndexSegment {
            start_offset,
            key_size,
            value_size,
            file_name,
            dir: dir.to_os_string(),
            state: State::Mutable(Mutable {
                entries,
                end_offset: Some(end_offset),
            }),
        })
    }
}

fn parse_header(buf: &[u8], expected_start_offset: u64) -> Result<(usize, usize, u64, usize)> {
    if buf.len() < HEADER_LEN + CRC_LEN {
        return Err(StoreError::IndexCreationFailure("segment file truncated".to_string()));
    }
    let version = u16::from_be_bytes(buf[0..2].try_into().unwrap());
    if version != HEADER_VERSION {
        return Err(StoreError::IndexCreationFailure(format!("unsupported segment version {}", version)));
    }
    let key_size = u32::from_be_bytes(buf[2..6].try_into().unwrap()) as usize;
    let value_size = u32::from_be_bytes(buf[6..10].try_into().unwrap()) as usize;
    let start_offset = u64::from_be_bytes(buf[10..18].try_into().unwrap());
    let end_offset = u64::from_be_bytes(buf[18..26].try_into().unwrap());
    let num_entries = u32::from_be_bytes(buf[26..30].try_into().unwrap()) as usize;

    if start_offset != expected_start_offset {
        return Err(StoreError::IndexCreationFailure(format!(
            "segment file start_offset {} does not match file name {}",
            start_offset, expected_start_offset
        )));
    }
    let expected_len = HEADER_LEN + num_entries * (key_size + value_size) + CRC_LEN;
    if buf.len() != expected_len {
        return Err(StoreError::IndexCreationFailure(format!(
            "segment file length {} does not match header-implied length {}",
            buf.len(),
            expected_len
        )));
    }
    Ok((key_size, value_size, end_offset, num_entries))
}

fn verify_checksum(buf: &[u8]) -> Result<()> {
    let body_len = buf.len() - CRC_LEN;
    let expected = u32::from_be_bytes(buf[body_len..].try_into().unwrap());
    let actual = crc32fast::hash(&buf[..body_len]);
    if expected != actual {
        return Err(StoreError::IndexCreationFailure("segment checksum mismatch".to_string()));
    }
    Ok(())
}

fn read_record<K: StoreKey>(buf: &[u8], idx: usize, key_size: usize, value_size: usize) -> (K, IndexValue) {
    let start = HEADER_LEN + idx * (key_size + value_size);
    let key = K::read_bytes(&buf[start..start + key_size]).expect("segment record key corrupt");
    let value = IndexValue::from_bytes(&buf[start + key_size..start + key_size + value_size]);
    (key, value)
}

fn binary_search<K: StoreKey>(
    buf: &[u8],
    num_entries: usize,
    key_size: usize,
    value_size: usize,
    target: &K,
) -> Option<IndexValue> {
    match binary_search_index(buf, num_entries, key_size, value_size, target) {
        Ok(idx) => Some(read_record::<K>(buf, idx, key_size, value_size).1),
        Err(_) => None,
    }
}

fn binary_search_index<K: StoreKey>(
    buf: &[u8],
    num_entries: usize,
    key_size: usize,
    value_size: usize,
    target: &K,
) -> std::result::Result<usize, usize> {
    let mut lo = 0usize;
    let mut hi = num_entries;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let (key, _) = read_record::<K>(buf, mid, key_size, value_size);
        match key.cmp(target) {
            std::cmp::Ordering::Equal => return Ok(mid),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    Err(lo)
}

fn load_bloom(file_name: &SegmentFileName, dir: &ffi::OsStr) -> Result<Option<SegmentBloom>> {
    let path = file_name.bloom_path(dir);
    match fs::read(&path) {
        Ok(buf) => Ok(Some(SegmentBloom::from_bytes(&buf)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::IoError(format!("{}:{}", file!(), line!()), err)),
    }
}

/// Persist the sibling `.bloom` file for a mapped segment (§3, §6),
/// atomically the same way [IndexSegment::write_index_to_file] persists the
/// `.index` file: write to a temp file, fsync, rename.
fn write_bloom_to_file(bloom: &SegmentBloom, file_name: &SegmentFileName, dir: &ffi::OsStr) -> Result<()> {
    let final_path = file_name.bloom_path(dir);
    let tmp_path = final_path.with_extension("bloom.tmp");
    let buf = bloom.to_bytes()?;

    let mut tmp_file = crate::err_at!(IOError, fs::File::create(&tmp_path))?;
    crate::err_at!(IOError, tmp_file.write_all(&buf))?;
    crate::err_at!(IOError, tmp_file.sync_all())?;
    crate::err_at!(IOError, fs::rename(&tmp_path, &final_path))?;
    Ok(())
}

#[cfg(test)]
#[path = "segment_test.rs"]
mod segment_test;
