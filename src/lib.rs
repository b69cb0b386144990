//! A persistent, log-structured index mapping opaque keys to offset/size
//! records in an external append-only log.
//!
//! The index is organized as an ordered sequence of on-disk segments: a
//! single mutable *active* segment accepting writes, and zero or more
//! immutable, memory-mapped *sealed* segments. A background persistor
//! periodically flushes the active segment and maps sealed ones, always
//! after confirming the log bytes they reference are durable. A bounded
//! in-memory journal accelerates `find_entries_since` scans for consumers
//! that are close to caught up; callers falling behind the journal's
//! retained window transparently fall back to a segment walk.

pub mod bloom;
pub mod config;
pub mod error;
pub mod files;
pub mod journal;
pub mod key;
pub mod log;
pub mod metrics;
pub mod persistent_index;
pub mod persistor;
pub mod recovery;
pub mod segment;
pub mod thread;
pub mod token;
pub mod value;

pub use crate::config::{IndexConfig, Stats};
pub use crate::error::{Result, StoreError};
pub use crate::journal::{Journal, JournalEntry};
pub use crate::key::{DefaultKeyFactory, StoreKey, StoreKeyFactory};
pub use crate::log::{InMemoryLog, Log};
pub use crate::metrics::{IndexMetrics, NoopMetrics};
pub use crate::persistent_index::{PersistentIndex, PersistentIndexShared};
pub use crate::persistor::{IndexPersistor, ManualScheduler, Scheduler, ThreadScheduler};
pub use crate::recovery::{MessageInfo, MessageStoreRecovery};
pub use crate::segment::IndexSegment;
pub use crate::token::{StoreFindToken, UNINITIALIZED_OFFSET};
pub use crate::value::{FileSpan, IndexEntry, IndexValue};
