//! `IndexPersistor`: periodic background flush, following the log-flush-
//! before-segment-write ordering rule (§4.6), plus the pluggable
//! `Scheduler` seam (§6, §9) used to drive it.

use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Mutex},
    thread,
    time::Duration,
};

use log::{debug, error, warn};
use rand::Rng;

use crate::{
    error::Result,
    key::StoreKey,
    log::Log,
    persistent_index::PersistentIndexShared,
    thread::{Rx, Thread},
};

/// Pluggable periodic-task driver (§6). Production code uses
/// [ThreadScheduler]; tests use [ManualScheduler] to run ticks
/// deterministically instead of racing a real clock.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, name: &str, task: Box<dyn Fn() + Send + Sync>, initial_delay: Duration, period: Duration);
    fn shutdown(&self);
}

/// Spawns one `crate::thread::Thread` gen-server per scheduled task (§4.6,
/// §9): the task loop sleeps for `initial_delay`, then alternates `task()`
/// with waiting up to `period` on its control channel. [Scheduler::shutdown]
/// posts a message rather than flipping a polled flag, so a task sleeping
/// mid-period wakes immediately instead of running out its current tick.
pub struct ThreadScheduler {
    threads: Mutex<Vec<Thread<(), ()>>>,
}

impl ThreadScheduler {
    pub fn new() -> ThreadScheduler {
        ThreadScheduler {
            threads: Mutex::new(Vec::new()),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> ThreadScheduler {
        ThreadScheduler::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, name: &str, task: Box<dyn Fn() + Send + Sync>, initial_delay: Duration, period: Duration) {
        let thread_name = name.to_string();
        let thread = Thread::new(name, move |rx: Rx<(), ()>| {
            move || {
                thread::sleep(initial_delay);
                loop {
                    match rx.recv_timeout(period) {
                        Ok((_, reply)) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(());
                            }
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => task(),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("scheduled task {} exiting", thread_name);
            }
        });
        self.threads.lock().unwrap().push(thread);
    }

    fn shutdown(&self) {
        let threads = std::mem::take(&mut *self.threads.lock().unwrap());
        for thread in threads {
            let tx = thread.to_tx();
            let _ = tx.request(());
            thread.join().ok();
        }
    }
}

/// Deterministic scheduler for tests: `schedule` just remembers the task;
/// [ManualScheduler::run_pending] invokes every registered task once,
/// synchronously, on the calling thread.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl ManualScheduler {
    pub fn new() -> ManualScheduler {
        ManualScheduler::default()
    }

    pub fn run_pending(&self) {
        for task in self.tasks.lock().unwrap().iter() {
            task();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, _name: &str, task: Box<dyn Fn() + Send + Sync>, _initial_delay: Duration, _period: Duration) {
        self.tasks.lock().unwrap().push(task);
    }

    fn shutdown(&self) {}
}

/// Periodic flush driver, holding only a shared, non-owning handle to the
/// index's state (§9: "non-owning back reference... implemented via
/// `Arc<PersistentIndexShared<K>>`"). Never outlives the index: the index's
/// `Drop` calls [IndexPersistor::close], which joins the scheduler.
pub struct IndexPersistor<K> {
    shared: Arc<PersistentIndexShared<K>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<K: StoreKey> IndexPersistor<K> {
    pub fn new(shared: Arc<PersistentIndexShared<K>>, scheduler: Arc<dyn Scheduler>) -> IndexPersistor<K> {
        IndexPersistor { shared, scheduler }
    }

    /// Schedule the periodic `write()` at `flush_interval`, delayed
    /// initially by `flush_delay + rand(0, flush_delay_jitter_max)` so that
    /// many nodes restarted together don't flush in lockstep (§4.3).
    pub fn start(&self) {
        let shared = self.shared.clone();
        let jitter = rand::thread_rng().gen_range(0..=self.shared.config.flush_delay_jitter_max.as_millis() as u64);
        let initial_delay = self.shared.config.flush_interval + Duration::from_millis(jitter);
        let period = self.shared.config.flush_interval;

        self.scheduler.schedule(
            "index-persistor",
            Box::new(move || {
                if let Err(err) = write_once(&shared) {
                    error!("persistor flush failed: {}", err);
                }
            }),
            initial_delay,
            period,
        );
    }

    /// Run one final synchronous flush, then mark the shutdown clean by
    /// writing the `cleanshutdown` marker (§4.6 `close()`).
    pub fn close(&self) -> Result<()> {
        self.scheduler.shutdown();
        write_once(&self.shared)?;
        let marker = crate::files::clean_shutdown_marker_path(&self.shared.data_dir);
        crate::err_at!(IOError, std::fs::File::create(&marker))?;
        Ok(())
    }
}

/// The ordering-critical flush pass (§4.6): flush the log, then map every
/// unmapped earlier segment whose claimed bytes are already durable, then
/// partially flush the active segment.
fn write_once<K: StoreKey>(shared: &PersistentIndexShared<K>) -> Result<()> {
    let started = std::time::Instant::now();
    let file_end_pointer_before_flush = shared.log.get_log_end_offset();
    shared.log.flush()?;

    let mut segments = shared.segments.write();
    let offsets: Vec<u64> = segments.keys().copied().collect();
    let active_offset = match offsets.last() {
        Some(&offset) => offset,
        None => return Ok(()),
    };

    let mut segments_mapped = 0usize;
    for &offset in offsets.iter().rev().skip(1) {
        let already_mapped = segments.get(&offset).map(|s| s.is_mapped()).unwrap_or(true);
        if already_mapped {
            break;
        }
        let seg = segments.get_mut(&offset).unwrap();
        if seg.end_offset() >= 0 && seg.end_offset() as u64 > file_end_pointer_before_flush {
            return crate::err_at!(
                msg: "segment at {} claims end_offset {} past flushed log end {}",
                offset,
                seg.end_offset(),
                file_end_pointer_before_flush
            );
        }
        let end_offset = seg.end_offset().max(0) as u64;
        seg.write_index_to_file(end_offset)?;
        seg.map(shared.config.bloom_filter)?;
        segments_mapped += 1;
        debug!("persistor mapped segment start_offset={}", offset);
    }

    let active = segments.get(&active_offset).unwrap();
    active.write_index_to_file(file_end_pointer_before_flush)?;
    debug!(
        "persistor partially flushed active segment start_offset={} up to {}",
        active_offset, file_end_pointer_before_flush
    );

    if shared.config.bloom_filter {
        warn!("bloom filter on active segment deferred until segment is mapped");
    }

    shared.metrics.flush_completed(started.elapsed(), segments_mapped);
    Ok(())
}

#[cfg(test)]
#[path = "persistor_test.rs"]
mod persistor_test;
