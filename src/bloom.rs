//! Optional bloom-filter companion for a mapped [crate::IndexSegment]
//! (§3, §4.1: "bloom filter check (if present) followed by binary search").
//!
//! Built on `xorfilter-rs`, the same crate the reference crate depends on
//! for its own `db::Bloom` trait (`robt::Config`/`db::mod::Bloom`); a filter
//! is only built and consulted when [crate::config::IndexConfig::bloom_filter]
//! is set.

use std::hash::Hash;

use xorfilter_rs::Xor8;

use crate::error::{Result, StoreError};

/// Immutable, append-once bloom filter over a segment's key set.
pub struct SegmentBloom {
    inner: Xor8,
}

impl SegmentBloom {
    /// Build from every key in a (already-sorted) segment.
    pub fn build<K: Hash>(keys: impl Iterator<Item = K>) -> SegmentBloom {
        let mut inner = Xor8::new();
        for key in keys {
            inner.insert(&key);
        }
        inner.build();
        SegmentBloom { inner }
    }

    /// `true` means "maybe present"; `false` means "definitely absent" —
    /// the standard bloom-filter contract, no false negatives.
    pub fn may_contain<K: Hash>(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.inner
            .to_bytes()
            .map_err(|err| StoreError::IndexCreationFailure(format!("bloom encode: {}", err)))
    }

    pub fn from_bytes(buf: &[u8]) -> Result<SegmentBloom> {
        let (inner, _) = Xor8::from_bytes(buf)
            .map_err(|err| StoreError::IndexCreationFailure(format!("bloom decode: {}", err)))?;
        Ok(SegmentBloom { inner })
    }
}
