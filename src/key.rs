//! `StoreKey` is deliberately opaque to this crate: callers bring their own
//! key type (a content hash, a UUID, whatever their blob-id scheme is) and
//! tell us how wide it is and how to move it to/from bytes.

use std::{fmt, io};

use crate::error::Result;

/// Opaque, fixed-width, totally ordered key. All keys held by a single
/// [crate::IndexSegment] share the same `size_in_bytes()` (§3, invariant a).
pub trait StoreKey: Clone + Eq + Ord + fmt::Debug + Send + 'static {
    /// Width of this key's serialized form. Constant per key era; a change
    /// in width forces a segment rollover (§4.1).
    fn size_in_bytes(&self) -> usize;

    /// Append this key's serialized bytes to `buf`.
    fn write_bytes(&self, buf: &mut Vec<u8>);

    /// Parse a key of this type from exactly `size` bytes.
    fn read_bytes(buf: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Deserializes a [StoreKey] from a byte stream, used to decode keys off a
/// segment file or a recovery stream without the reader needing to know the
/// concrete key type up front.
pub trait StoreKeyFactory<K: StoreKey>: Send + Sync {
    fn get_store_key(&self, reader: &mut dyn io::Read, size: usize) -> Result<K>;
}

/// A `StoreKeyFactory` for any `StoreKey` that can self-describe its width
/// and parse from a flat buffer; most concrete key types can use this
/// instead of writing a bespoke factory.
pub struct DefaultKeyFactory;

impl<K: StoreKey> StoreKeyFactory<K> for DefaultKeyFactory {
    fn get_store_key(&self, reader: &mut dyn io::Read, size: usize) -> Result<K> {
        let mut buf = vec![0u8; size];
        crate::err_at!(IOError, reader.read_exact(&mut buf))?;
        K::read_bytes(&buf)
    }
}
