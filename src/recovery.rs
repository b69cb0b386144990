//! `MessageStoreRecovery`: the external callback that replays log bytes
//! the index doesn't yet know about into a sequence of [MessageInfo]
//! records (§4.4, §6).

use crate::{
    error::Result,
    key::{StoreKey, StoreKeyFactory},
    log::Log,
};

/// One message recovered from the log: what key it wrote, how large the
/// record is, and whether it was a delete.
#[derive(Clone, Debug)]
pub struct MessageInfo<K> {
    pub store_key: K,
    pub size: u64,
    pub is_deleted: bool,
    pub expiration_time_ms: i64,
}

/// Replays `[start_offset, end_offset)` of `log` into [MessageInfo] records,
/// in log order. Supplied by the surrounding blob store; this crate only
/// consumes it during [crate::persistent_index::PersistentIndex] construction.
pub trait MessageStoreRecovery<K: StoreKey>: Send + Sync {
    fn recover(
        &self,
        log: &dyn Log,
        start_offset: u64,
        end_offset: u64,
        key_factory: &dyn StoreKeyFactory<K>,
    ) -> Result<Vec<MessageInfo<K>>>;
}
