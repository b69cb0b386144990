//! Narrow instrumentation seam. The index calls into an `IndexMetrics`
//! implementation but never depends on a concrete sink — wiring metrics to
//! an actual transport (statsd, prometheus, ...) is out of scope.

use std::time::Duration;

/// Observable events a [crate::PersistentIndex] reports as they occur.
pub trait IndexMetrics: Send + Sync {
    /// A new active segment was created.
    fn segment_rolled_over(&self, start_offset: u64) {
        let _ = start_offset;
    }
    /// The persistor completed one `write()` pass.
    fn flush_completed(&self, duration: Duration, segments_mapped: usize) {
        let _ = (duration, segments_mapped);
    }
    /// `findEntriesSince` was invoked.
    fn scan_invoked(&self, entries_returned: usize) {
        let _ = entries_returned;
    }
    /// Startup recovery finished.
    fn recovery_completed(&self, duration: Duration, messages_replayed: usize) {
        let _ = (duration, messages_replayed);
    }
    /// The journal evicted its oldest entry to make room.
    fn journal_evicted(&self) {}
}

/// Default sink: observes nothing, costs nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl IndexMetrics for NoopMetrics {}
