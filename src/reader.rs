//! Raw Event Reader (spec §4.4): the background thread that polls the
//! kernel's inotify stream, classifies each record, and either drops it,
//! queues it for coalescing, or (for `CREATE | IS_DIR`) triggers a
//! recursive watch install before the coalescing window can close.

use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use inotify::{EventMask, Inotify, WatchDescriptor};
use parking_lot::Mutex;

use crate::coalesce::CoalescingBuffer;
use crate::error::ErrorKind;
use crate::exclude::ExclusionPolicy;
use crate::installer::WatchInstaller;
use crate::registry::WatchRegistry;

/// How long a single `poll(2)` call blocks before re-checking the
/// `running` flag (spec §4.4: "~100 ms so shutdown remains responsive").
const POLL_TIMEOUT_MS: i32 = 100;

/// Cross-thread mailbox for [`ErrorKind`]s detected on the Reader thread.
/// The Reader only ever pushes here; the Controller's `pump` drains it
/// and invokes the user's error callback itself, so that callback always
/// runs on the cooperative scheduler (spec §9: "never deliver callbacks
/// from the Reader thread").
pub struct ErrorMailbox {
    tx: mpsc::Sender<ErrorKind>,
    rx: Mutex<mpsc::Receiver<ErrorKind>>,
}

impl ErrorMailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn push(&self, kind: ErrorKind) {
        let _ = self.tx.send(kind);
    }

    /// Test-only hook for simulating a Reader-thread-detected error
    /// without spinning up a real inotify failure.
    #[cfg(test)]
    pub(crate) fn push_for_test(&self, kind: ErrorKind) {
        self.push(kind);
    }

    /// Drains every queued error. Call from the cooperative scheduler
    /// (e.g. inside `Monitor::pump`), never from the Reader thread.
    pub fn drain(&self) -> Vec<ErrorKind> {
        self.rx.lock().try_iter().collect()
    }
}

impl Default for ErrorMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable record of one raw kernel notification (spec §3). Resolving
/// `wd` to a path is deferred to fold time, since the registry — not
/// this struct — owns that mapping (spec §9: join by path only).
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub wd: WatchDescriptor,
    pub name: Option<String>,
    pub is_dir: bool,
    pub is_create: bool,
    pub is_delete: bool,
    pub is_modify: bool,
}

/// Spawns and owns the Reader thread. Dropping or calling [`Reader::stop`]
/// joins the thread, bounded by the poll timeout.
pub struct Reader {
    handle: Option<std::thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Reader {
    /// Starts the background loop. `on_crash` is invoked (from this
    /// thread) only when the loop exits due to an unexpected I/O error
    /// while `running` was still true when the error occurred — the
    /// Controller is responsible for trampolining that onto the
    /// cooperative scheduler (spec §9: never call user callbacks
    /// directly from the Reader thread).
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        inotify: Arc<Mutex<Inotify>>,
        registry: Arc<WatchRegistry>,
        exclude: Arc<ExclusionPolicy>,
        queue: Arc<CoalescingBuffer>,
        watch_limit_reached: Arc<AtomicBool>,
        overflow_occurred: Arc<AtomicBool>,
        errors: Arc<ErrorMailbox>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("fsearch-monitor-reader".into())
            .spawn(move || {
                run_loop(
                    &inotify,
                    &registry,
                    &exclude,
                    &queue,
                    &watch_limit_reached,
                    &overflow_occurred,
                    &running_thread,
                    &errors,
                );
            })
            .expect("failed to spawn reader thread");

        Self {
            handle: Some(handle),
            running,
        }
    }

    /// Signals the loop to exit and joins it. Bounded by the poll
    /// timeout (spec §5: "stop blocks joining the Reader thread").
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    inotify: &Arc<Mutex<Inotify>>,
    registry: &Arc<WatchRegistry>,
    exclude: &Arc<ExclusionPolicy>,
    queue: &Arc<CoalescingBuffer>,
    watch_limit_reached: &Arc<AtomicBool>,
    overflow_occurred: &Arc<AtomicBool>,
    running: &Arc<AtomicBool>,
    errors: &Arc<ErrorMailbox>,
) {
    tracing::debug!("reader thread started");
    let raw_fd = inotify.lock().as_raw_fd();
    let mut buffer = [0u8; 4096];
    let mut crashed = false;

    while running.load(Ordering::Acquire) {
        let mut pfd = libc::pollfd {
            fd: raw_fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: `pfd` is a single valid pollfd on the stack, matching
        // the `nfds = 1` argument; this mirrors the original C
        // implementation's `poll(&pfd, 1, POLL_TIMEOUT_MS)` call.
        let ret = unsafe { libc::poll(&mut pfd, 1, POLL_TIMEOUT_MS) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            tracing::warn!(%err, "poll error, reader thread exiting");
            crashed = true;
            break;
        }
        if ret == 0 {
            continue; // timeout, re-check `running`
        }
        if !running.load(Ordering::Acquire) {
            break;
        }

        let events = {
            let mut inotify = inotify.lock();
            match inotify.read_events(&mut buffer) {
                Ok(events) => events.collect::<Vec<_>>(),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => {
                    tracing::warn!(%err, "read error, reader thread exiting");
                    crashed = true;
                    break;
                }
            }
        };

        for event in events {
            if event.mask.contains(EventMask::Q_OVERFLOW) {
                overflow_occurred.store(true, Ordering::Release);
                tracing::warn!(
                    "inotify queue overflow: events were dropped by the kernel; \
                     a full re-scan is required to restore consistency"
                );
                errors.push(ErrorKind::QueueOverflow);
                continue;
            }

            if event.mask.contains(EventMask::IGNORED) {
                // Kernel already removed this watch; nothing to resolve.
                continue;
            }

            let name = event.name.map(|n| n.to_string_lossy().into_owned());
            if let Some(name) = &name {
                if exclude.is_name_excluded(name) {
                    continue;
                }
            }

            let is_dir = event.mask.contains(EventMask::ISDIR);
            let is_create = event.mask.contains(EventMask::CREATE) || event.mask.contains(EventMask::MOVED_TO);
            let is_delete = event.mask.contains(EventMask::DELETE) || event.mask.contains(EventMask::MOVED_FROM);
            let is_modify = event.mask.contains(EventMask::MODIFY);

            let raw = RawEvent {
                wd: event.wd.clone(),
                name: name.clone(),
                is_dir,
                is_create,
                is_delete,
                is_modify,
            };

            // Newly created subdirectories must gain their own watch
            // before this window closes, or events inside them would be
            // lost (spec §4.4).
            if is_create && is_dir {
                if let Some(dir_path) = registry.lookup_path(&event.wd) {
                    let new_dir = match &name {
                        Some(n) => dir_path.join(n),
                        None => dir_path,
                    };
                    if !exclude.is_path_excluded(&new_dir) {
                        let installer =
                            WatchInstaller::new(inotify, registry, exclude, watch_limit_reached);
                        installer.install_recursive(&new_dir);
                    }
                }
            }

            queue.push(raw);
        }
    }

    if crashed && running.load(Ordering::Acquire) {
        tracing::warn!("reader thread crashed unexpectedly");
        errors.push(ErrorKind::ThreadCrashed);
    }

    tracing::debug!("reader thread exiting");
}
