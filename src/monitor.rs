//! Lifecycle & Mode Controller (spec §4.7): the public `Monitor` type.
//! Owns the Reader thread, the Watch Registry, the Exclusion Policy, the
//! Coalescing Buffer, and the current index handle, and drives the
//! caller-owned cooperative scheduler via [`Monitor::pump`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use inotify::Inotify;
use parking_lot::{Mutex, RwLock};

use crate::applier::apply_batch;
use crate::coalesce::{coalesce_events, CoalescingBuffer};
use crate::error::{ErrorKind, MonitorError};
use crate::exclude::{ExcludedPath, ExclusionPolicy};
use crate::index::FileIndex;
use crate::installer::WatchInstaller;
use crate::reader::{ErrorMailbox, Reader};
use crate::registry::WatchRegistry;

/// Default coalescing window, matching the original implementation's
/// default (spec §6: "zero means use default 1500").
const DEFAULT_COALESCE_MS: u32 = 1500;

/// Outcome of one [`Monitor::pump`] call: whether a coalescing window
/// was applied this call, so the caller can decide how eagerly to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpResult {
    Idle,
    Applied,
}

type Callback = Box<dyn FnMut() + Send>;
type ErrorCallback = Box<dyn FnMut(ErrorKind) + Send>;

struct SharedState {
    index: RwLock<Arc<dyn FileIndex>>,
    exclude: RwLock<ExclusionPolicy>,
    registry: Arc<WatchRegistry>,
    queue: Arc<CoalescingBuffer>,
    watch_limit_reached: Arc<AtomicBool>,
    overflow_occurred: Arc<AtomicBool>,
    num_watches: AtomicU32,
    errors: Arc<ErrorMailbox>,
}

/// The monitor's public surface (spec §6). One instance watches one set
/// of root paths against one file index at a time (`set_database` swaps
/// the index, not the watched roots).
pub struct Monitor {
    indexed_paths: Vec<PathBuf>,
    inotify: Option<Arc<Mutex<Inotify>>>,
    reader: Option<Reader>,
    shared: Arc<SharedState>,
    running: bool,
    on_apply: Arc<Mutex<Callback>>,
    on_prepare: Arc<Mutex<Callback>>,
    on_error: Arc<Mutex<ErrorCallback>>,
}

impl Monitor {
    /// Constructs a stopped monitor over `indexed_paths`, against `index`
    /// (spec §6: `new(index, indexed_paths)`).
    pub fn new(index: Arc<dyn FileIndex>, indexed_paths: Vec<PathBuf>) -> Self {
        Self {
            indexed_paths,
            inotify: None,
            reader: None,
            shared: Arc::new(SharedState {
                index: RwLock::new(index),
                exclude: RwLock::new(ExclusionPolicy::new()),
                registry: Arc::new(WatchRegistry::new()),
                queue: Arc::new(CoalescingBuffer::new(Duration::from_millis(
                    DEFAULT_COALESCE_MS as u64,
                ))),
                watch_limit_reached: Arc::new(AtomicBool::new(false)),
                overflow_occurred: Arc::new(AtomicBool::new(false)),
                num_watches: AtomicU32::new(0),
                errors: Arc::new(ErrorMailbox::new()),
            }),
            running: false,
            on_apply: Arc::new(Mutex::new(Box::new(|| {}))),
            on_prepare: Arc::new(Mutex::new(Box::new(|| {}))),
            on_error: Arc::new(Mutex::new(Box::new(|_| {}))),
        }
    }

    /// Installs watches on every indexed path (recursively) and spawns
    /// the Reader thread. Failure of any single root is surfaced; other
    /// roots are still attempted (partial coverage is an acceptable
    /// steady state, per spec §4.3).
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.running {
            return Ok(());
        }

        for root in &self.indexed_paths {
            if !root.exists() {
                return Err(MonitorError::InvalidWatchRoot(root.clone()));
            }
        }

        let inotify = Inotify::init().map_err(MonitorError::WatcherInit)?;
        let inotify = Arc::new(Mutex::new(inotify));

        {
            let exclude = self.shared.exclude.read();
            for root in &self.indexed_paths {
                let installer = WatchInstaller::new(
                    &inotify,
                    &self.shared.registry,
                    &exclude,
                    &self.shared.watch_limit_reached,
                );
                installer.install_recursive(root);
            }
        }
        self.shared
            .num_watches
            .store(self.shared.registry.count(), Ordering::Release);

        let exclude_snapshot = Arc::new(self.shared.exclude.read().clone());
        let reader = Reader::spawn(
            Arc::clone(&inotify),
            Arc::clone(&self.shared.registry),
            exclude_snapshot,
            Arc::clone(&self.shared.queue),
            Arc::clone(&self.shared.watch_limit_reached),
            Arc::clone(&self.shared.overflow_occurred),
            Arc::clone(&self.shared.errors),
        );

        self.inotify = Some(inotify);
        self.reader = Some(reader);
        self.running = true;
        tracing::info!(
            watches = self.shared.registry.count(),
            "monitor started"
        );
        Ok(())
    }

    /// Stops the Reader thread, closes the kernel stream, clears the
    /// registry, and discards any pending batched events (spec §4.7
    /// stop sequence).
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.reader = None; // Drop joins the thread
        self.inotify = None; // closing the fd invalidates every wd
        self.shared.registry.clear();
        self.shared.queue.discard_pending();
        let _ = self.shared.errors.drain(); // discard undelivered errors (spec §5 stop quiescence)
        self.shared.num_watches.store(0, Ordering::Release);
        self.running = false;
        tracing::info!("monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Zero means "use the default" (spec §6).
    pub fn set_coalesce_interval_ms(&self, millis: u32) {
        let millis = if millis == 0 { DEFAULT_COALESCE_MS } else { millis };
        self.shared
            .queue
            .set_interval(Duration::from_millis(millis as u64));
    }

    pub fn set_excluded_paths(&self, paths: Vec<ExcludedPath>) {
        self.shared.exclude.write().set_excluded_paths(paths);
    }

    pub fn set_exclude_patterns<I, S>(&self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.shared.exclude.write().set_patterns(patterns);
    }

    pub fn set_exclude_hidden(&self, exclude: bool) {
        self.shared.exclude.write().set_exclude_hidden(exclude);
    }

    /// Post-apply notification (spec §6).
    pub fn set_callback(&self, callback: impl FnMut() + Send + 'static) {
        *self.on_apply.lock() = Box::new(callback);
    }

    /// Pre-apply notification, invoked before any mutation (spec §4.6).
    pub fn set_prepare_callback(&self, callback: impl FnMut() + Send + 'static) {
        *self.on_prepare.lock() = Box::new(callback);
    }

    pub fn set_error_callback(&self, callback: impl FnMut(ErrorKind) + Send + 'static) {
        *self.on_error.lock() = Box::new(callback);
    }

    pub fn get_num_watches(&self) -> u32 {
        self.shared.num_watches.load(Ordering::Acquire)
    }

    pub fn watch_limit_reached(&self) -> bool {
        self.shared.watch_limit_reached.load(Ordering::Acquire)
    }

    pub fn overflow_occurred(&self) -> bool {
        self.shared.overflow_occurred.load(Ordering::Acquire)
    }

    pub fn set_batching(&self, batching: bool) {
        self.shared.queue.set_batching(batching);
    }

    pub fn is_batching(&self) -> bool {
        self.shared.queue.is_batching()
    }

    /// Synchronously drains the queue, coalesces, and applies, regardless
    /// of batching state (spec §4.7).
    pub fn flush_events(&self) {
        let events = self.shared.queue.take_all();
        if events.is_empty() {
            return;
        }
        self.apply_window(events.into_iter().collect());
    }

    /// Atomically swaps the index handle (spec §4.7).
    pub fn set_database(&self, index: Arc<dyn FileIndex>) {
        *self.shared.index.write() = index;
    }

    /// Drains any errors the Reader thread detected, then the
    /// coalesce-ready signal channel, and if a window has closed, runs
    /// coalesce -> prepare -> apply -> notify inline on the calling
    /// thread (spec §4.7 "Driving the cooperative scheduler"). Call this
    /// from the embedding application's own event loop.
    ///
    /// Errors are delivered here, never from the Reader thread itself
    /// (spec §9), so a caller that never pumps never hears about them.
    pub fn pump(&self) -> PumpResult {
        for kind in self.shared.errors.drain() {
            (self.on_error.lock())(kind);
        }

        let Some(generation) = self.shared.queue.try_recv_ready() else {
            return PumpResult::Idle;
        };

        match self.shared.queue.try_take_window(generation) {
            Some(raw_events) => {
                self.apply_window(raw_events.into_iter().collect());
                PumpResult::Applied
            }
            None => PumpResult::Idle, // superseded generation, or batching on
        }
    }

    fn apply_window(&self, raw_events: std::collections::VecDeque<crate::reader::RawEvent>) {
        let coalesced = coalesce_events(raw_events, &self.shared.registry);
        if coalesced.is_empty() {
            return;
        }

        (self.on_prepare.lock())();

        let index = self.shared.index.read().clone();
        match &self.inotify {
            Some(inotify) => {
                let exclude = self.shared.exclude.read();
                apply_batch(
                    coalesced.into_values().collect(),
                    &index,
                    inotify,
                    &self.shared.registry,
                    &exclude,
                    &self.shared.watch_limit_reached,
                );
            }
            None => {
                tracing::debug!("pump called while stopped; dropping closed window");
                return;
            }
        }
        self.shared
            .num_watches
            .store(self.shared.registry.count(), Ordering::Release);

        (self.on_apply.lock())();
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
