//! Bounded in-memory ring of recent `(offset, key)` insertions, accelerating
//! `findEntriesSince` for consumers who are close to caught up (§4.2).

use std::collections::VecDeque;

use log::trace;

use crate::key::StoreKey;

/// One journal record: the log offset an insert/delete landed at, and the
/// key it affected.
#[derive(Clone, Debug)]
pub struct JournalEntry<K> {
    pub offset: u64,
    pub key: K,
}

pub struct Journal<K> {
    entries: VecDeque<JournalEntry<K>>,
    capacity: usize,
    max_return: usize,
}

impl<K: StoreKey> Journal<K> {
    pub fn new(capacity: usize, max_return: usize) -> Journal<K> {
        Journal {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            max_return,
        }
    }

    /// Append one entry, evicting the oldest if already at capacity.
    /// Offsets must be non-decreasing across calls (§4.2 invariant).
    /// Returns `true` if an eviction happened, so callers can report it to
    /// their `IndexMetrics` sink.
    pub fn add_entry(&mut self, offset: u64, key: K) -> bool {
        let evicted = self.entries.len() == self.capacity;
        if evicted {
            self.entries.pop_front();
            trace!("journal evicted oldest entry, capacity {}", self.capacity);
        }
        self.entries.push_back(JournalEntry { offset, key });
        evicted
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn oldest_offset(&self) -> Option<u64> {
        self.entries.front().map(|e| e.offset)
    }

    /// Returns at most `max_return` entries whose offset is `>= offset` (or
    /// `> offset` when `inclusive` is false), or `None` if `offset` precedes
    /// what the journal still retains — the caller must fall back to a
    /// segment scan.
    pub fn get_entries_since(&self, offset: u64, inclusive: bool) -> Option<Vec<JournalEntry<K>>> {
        if self.entries.is_empty() {
            return Some(Vec::new());
        }

        let oldest = self.entries.front().unwrap().offset;
        if offset < oldest {
            // `offset` predates our retained window: signal fallback.
            return None;
        }

        let start = self
            .entries
            .iter()
            .position(|e| if inclusive { e.offset >= offset } else { e.offset > offset });

        match start {
            Some(start) => Some(
                self.entries
                    .iter()
                    .skip(start)
                    .take(self.max_return)
                    .cloned()
                    .collect(),
            ),
            None => Some(Vec::new()),
        }
    }
}

#[cfg(test)]
#[path = "journal_test.rs"]
mod journal_test;
