//! `StoreFindToken`: a resumable cursor for [crate::persistent_index::PersistentIndex::find_entries_since],
//! and its wire format (§3, §4.5, §6). A token has two mutually exclusive
//! shapes — "journal" (an absolute log `offset`) or "segment" (a segment
//! `index_start_offset` plus the last `store_key` returned from it) — plus
//! a `session_id` stamping which index instance issued it and a producer-only
//! `bytes_read` lag indicator that is never put on the wire.

use std::convert::TryInto;

use uuid::Uuid;

use crate::{
    error::{Result, StoreError},
    key::{StoreKey, StoreKeyFactory},
};

pub const UNINITIALIZED_OFFSET: i64 = -1;

const WIRE_VERSION: u16 = 1;

/// A resumable scan cursor. See module docs for shape discipline.
#[derive(Clone, Debug)]
pub struct StoreFindToken<K> {
    pub session_id: Uuid,
    pub offset: i64,
    pub index_start_offset: i64,
    pub store_key: Option<K>,
    /// Producer-side lag indicator; not part of the wire format (§6).
    pub bytes_read: u64,
}

impl<K: StoreKey> StoreFindToken<K> {
    /// The empty token a fresh consumer starts with: uninitialized offset,
    /// no session yet (§8 scenario S4 starts from `token = ∅`).
    pub fn empty() -> StoreFindToken<K> {
        StoreFindToken {
            session_id: Uuid::nil(),
            offset: UNINITIALIZED_OFFSET,
            index_start_offset: UNINITIALIZED_OFFSET,
            store_key: None,
            bytes_read: 0,
        }
    }

    pub fn journal_shape(session_id: Uuid, offset: i64, bytes_read: u64) -> StoreFindToken<K> {
        StoreFindToken {
            session_id,
            offset,
            index_start_offset: UNINITIALIZED_OFFSET,
            store_key: None,
            bytes_read,
        }
    }

    pub fn segment_shape(
        session_id: Uuid,
        index_start_offset: i64,
        store_key: K,
        bytes_read: u64,
    ) -> StoreFindToken<K> {
        StoreFindToken {
            session_id,
            offset: UNINITIALIZED_OFFSET,
            index_start_offset,
            store_key: Some(store_key),
            bytes_read,
        }
    }

    pub fn is_journal_shape(&self) -> bool {
        self.index_start_offset == UNINITIALIZED_OFFSET
    }

    pub fn is_uninitialized(&self) -> bool {
        self.offset == UNINITIALIZED_OFFSET && self.index_start_offset == UNINITIALIZED_OFFSET
    }

    /// Serialize per §6: `version:u16 | sessionIdLen:u32 | sessionId[..] |
    /// offset:i64 | indexStartOffset:i64 | (if indexStartOffset != -1)
    /// storeKey[..]`. The session id is the canonical hyphenated UUID
    /// string, length-prefixed by its *actual* encoded length — resolving
    /// the undersized fixed-length bug from the source format (§9 Open
    /// Question #2).
    pub fn to_bytes(&self) -> Vec<u8> {
        let session_id_str = self.session_id.to_string();
        let session_id_bytes = session_id_str.as_bytes();

        let mut buf = Vec::new();
        buf.extend_from_slice(&WIRE_VERSION.to_be_bytes());
        buf.extend_from_slice(&(session_id_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(session_id_bytes);
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(&self.index_start_offset.to_be_bytes());
        if self.index_start_offset != UNINITIALIZED_OFFSET {
            if let Some(key) = &self.store_key {
                key.write_bytes(&mut buf);
            }
        }
        buf
    }

    pub fn from_bytes(buf: &[u8], key_factory: &dyn StoreKeyFactory<K>, key_size: usize) -> Result<StoreFindToken<K>> {
        let mut cursor = buf;
        let version = take_u16(&mut cursor)?;
        if version != WIRE_VERSION {
            return Err(StoreError::InvalidArgument(format!("unsupported token version {}", version)));
        }
        let session_id_len = take_u32(&mut cursor)? as usize;
        if cursor.len() < session_id_len {
            return Err(StoreError::InvalidArgument("token truncated in session id".to_string()));
        }
        let (session_id_bytes, rest) = cursor.split_at(session_id_len);
        cursor = rest;
        let session_id_str = std::str::from_utf8(session_id_bytes)
            .map_err(|_| StoreError::InvalidArgument("token session id is not valid UTF-8".to_string()))?;
        let session_id = Uuid::parse_str(session_id_str)
            .map_err(|_| StoreError::InvalidArgument("token session id is not a valid UUID".to_string()))?;

        let offset = take_i64(&mut cursor)?;
        let index_start_offset = take_i64(&mut cursor)?;

        let store_key = if index_start_offset != UNINITIALIZED_OFFSET {
            Some(key_factory.get_store_key(&mut cursor, key_size)?)
        } else {
            None
        };

        Ok(StoreFindToken {
            session_id,
            offset,
            index_start_offset,
            store_key,
            bytes_read: 0,
        })
    }
}

fn take_u16(cursor: &mut &[u8]) -> Result<u16> {
    take_n(cursor, 2).map(|b| u16::from_be_bytes(b.try_into().unwrap()))
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32> {
    take_n(cursor, 4).map(|b| u32::from_be_bytes(b.try_into().unwrap()))
}

fn take_i64(cursor: &mut &[u8]) -> Result<i64> {
    take_n(cursor, 8).map(|b| i64::from_be_bytes(b.try_into().unwrap()))
}

fn take_n<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if cursor.len() < n {
        return Err(StoreError::InvalidArgument("token truncated".to_string()));
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

#[cfg(test)]
#[path = "token_test.rs"]
mod token_test;
