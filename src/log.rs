//! The `Log` collaborator: the append-only byte log this index is layered
//! over. Owned and driven by the surrounding blob store; this crate only
//! consumes it (§6).

use crate::error::Result;

/// External append-only log. A production store supplies its real
/// implementation; tests supply [InMemoryLog].
pub trait Log: Send + Sync {
    fn append(&self, bytes: &[u8]) -> Result<u64>;
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn get_log_end_offset(&self) -> u64;
    fn set_log_end_offset(&self, offset: u64) -> Result<()>;
    fn size_in_bytes(&self) -> u64;
    fn flush(&self) -> Result<()>;
}

/// In-memory fake used by unit and integration tests (§6, §9: "a
/// deterministic fake" mirrors `ManualScheduler`'s role for the scheduler
/// seam).
pub struct InMemoryLog {
    inner: parking_lot::RwLock<InMemoryLogState>,
}

struct InMemoryLogState {
    bytes: Vec<u8>,
    end_offset: u64,
}

impl InMemoryLog {
    pub fn new() -> InMemoryLog {
        InMemoryLog {
            inner: parking_lot::RwLock::new(InMemoryLogState {
                bytes: Vec::new(),
                end_offset: 0,
            }),
        }
    }
}

impl Default for InMemoryLog {
    fn default() -> InMemoryLog {
        InMemoryLog::new()
    }
}

impl Log for InMemoryLog {
    fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut state = self.inner.write();
        let offset = state.bytes.len() as u64;
        state.bytes.extend_from_slice(bytes);
        state.end_offset = state.bytes.len() as u64;
        Ok(offset)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.inner.read();
        let start = offset as usize;
        Ok(state.bytes[start..start + len].to_vec())
    }

    fn get_log_end_offset(&self) -> u64 {
        self.inner.read().end_offset
    }

    fn set_log_end_offset(&self, offset: u64) -> Result<()> {
        self.inner.write().end_offset = offset;
        Ok(())
    }

    fn size_in_bytes(&self) -> u64 {
        self.inner.read().bytes.len() as u64
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
