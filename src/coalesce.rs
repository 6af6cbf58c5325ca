//! Coalescing Buffer (spec §4.5): a time-windowed FIFO of raw events
//! that folds per-path sequences into a single logical [`CoalescedEvent`]
//! per window, via a bounded-delay, non-resetting timer.
//!
//! The timer is deliberately *not* a debounce: the first push while no
//! timer is currently armed starts a one-shot timer for
//! `coalesce_interval`, regardless of whether the queue already holds
//! events left over from a prior batching period, and later pushes
//! within that window do not reset it (spec §9, "Timer semantics").
//! This bounds worst-case latency under a sustained event storm, at the
//! cost of not waiting for true quiescence.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::reader::RawEvent;
use crate::registry::WatchRegistry;

/// State of one path within a single coalescing window (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceState {
    Created,
    Deleted,
    Modified,
    Noop,
}

/// One folded, path-keyed change produced by a closed window.
#[derive(Debug, Clone)]
pub struct CoalescedEvent {
    pub path: PathBuf,
    pub is_dir: bool,
    pub state: CoalesceState,
}

/// Applies one incoming raw event's kind to the current per-path state,
/// per the transition table in spec §4.5. `is_dir` is handled by the
/// caller (first-event-wins, never downgraded).
fn fold(current: Option<CoalesceState>, raw: &RawEvent) -> CoalesceState {
    use CoalesceState::*;

    match (current, raw.is_create, raw.is_delete, raw.is_modify) {
        (None, true, _, _) => Created,
        (None, _, true, _) => Deleted,
        (None, _, _, true) => Modified,
        (None, false, false, false) => Noop,

        (Some(Created), true, _, _) => Created,
        (Some(Created), _, true, _) => Noop,
        (Some(Created), _, _, true) => Created,
        (Some(Created), false, false, false) => Created,

        (Some(Deleted), true, _, _) => Modified,
        (Some(Deleted), _, true, _) => Deleted,
        (Some(Deleted), _, _, true) => Deleted,
        (Some(Deleted), false, false, false) => Deleted,

        (Some(Modified), true, _, _) => Created,
        (Some(Modified), _, true, _) => Deleted,
        (Some(Modified), _, _, true) => Modified,
        (Some(Modified), false, false, false) => Modified,

        (Some(Noop), true, _, _) => Created,
        (Some(Noop), _, true, _) => Deleted,
        (Some(Noop), _, _, true) => Modified,
        (Some(Noop), false, false, false) => Noop,
    }
}

struct QueueState {
    events: VecDeque<RawEvent>,
    /// Bumped every time a timer is armed; lets a timer thread detect
    /// that it has been superseded (cancelled, or a new window already
    /// started) without needing a cancellable sleep.
    arm_generation: u64,
    timer_armed: bool,
}

/// Lock-protected FIFO plus the single pending-timer handle (spec §4.5).
pub struct CoalescingBuffer {
    state: Mutex<QueueState>,
    interval: Mutex<Duration>,
    is_batching: AtomicBool,
    /// Fires (with the current generation) whenever a timer should
    /// trigger window processing; the Controller's `pump` drains this.
    ready_tx: Mutex<mpsc::Sender<u64>>,
    ready_rx: Mutex<mpsc::Receiver<u64>>,
    generation_counter: AtomicU64,
}

impl CoalescingBuffer {
    pub fn new(interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                arm_generation: 0,
                timer_armed: false,
            }),
            interval: Mutex::new(interval),
            is_batching: AtomicBool::new(false),
            ready_tx: Mutex::new(tx),
            ready_rx: Mutex::new(rx),
            generation_counter: AtomicU64::new(0),
        }
    }

    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
    }

    pub fn is_batching(&self) -> bool {
        self.is_batching.load(Ordering::Acquire)
    }

    /// Enqueues a raw event and arms the timer if none is currently
    /// pending (spec §4.5: "first push arms the timer"). Arming depends
    /// only on `timer_armed`, not on the queue being empty — after
    /// `set_batching(off)` the queue may still hold events accumulated
    /// while batching, and the next push must still arm delivery (spec
    /// §4.7: "`set_batching(off)` resumes the normal timer-driven
    /// delivery").
    pub fn push(&self, event: RawEvent) {
        let mut state = self.state.lock();
        let should_arm = !state.timer_armed;
        state.events.push_back(event);

        if should_arm && !self.is_batching() {
            state.timer_armed = true;
            let generation = self.generation_counter.fetch_add(1, Ordering::AcqRel) + 1;
            state.arm_generation = generation;
            drop(state);
            self.spawn_timer(generation);
        }
    }

    fn spawn_timer(&self, generation: u64) {
        let interval = *self.interval.lock();
        let tx = self.ready_tx.lock().clone();
        std::thread::Builder::new()
            .name("fsearch-monitor-coalesce-timer".into())
            .spawn(move || {
                std::thread::sleep(interval);
                let _ = tx.send(generation);
            })
            .expect("failed to spawn coalesce timer thread");
    }

    /// Enters or leaves batching mode (spec §4.7). Entering cancels any
    /// pending timer's effect (a later fire for the cancelled generation
    /// is a silent no-op — see [`CoalescingBuffer::try_take_window`]);
    /// leaving does not itself trigger delivery.
    pub fn set_batching(&self, batching: bool) {
        self.is_batching.store(batching, Ordering::Release);
        if batching {
            let mut state = self.state.lock();
            state.timer_armed = false;
            state.arm_generation = self.generation_counter.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::debug!("entering batch mode");
        } else {
            tracing::debug!("exiting batch mode");
        }
    }

    /// Called by the Controller's `pump` with each generation signalled
    /// on the ready channel. Returns the swapped-out event queue if this
    /// generation is still current and batching is off; otherwise `None`
    /// (a superseded or batched-over timer fire is a no-op per spec §4.5).
    pub fn try_take_window(&self, fired_generation: u64) -> Option<VecDeque<RawEvent>> {
        let mut state = self.state.lock();
        if state.arm_generation != fired_generation {
            return None; // superseded by a cancel or a later arm
        }
        if self.is_batching() {
            return None; // accumulate without delivery until flush/clear
        }
        state.timer_armed = false;
        Some(std::mem::take(&mut state.events))
    }

    /// Non-blocking poll for a ready timer generation (used by `pump`).
    pub fn try_recv_ready(&self) -> Option<u64> {
        self.ready_rx.lock().try_recv().ok()
    }

    /// Unconditionally drains the queue regardless of batching state
    /// (spec §4.7: `flush_events`).
    pub fn take_all(&self) -> VecDeque<RawEvent> {
        let mut state = self.state.lock();
        state.timer_armed = false;
        state.arm_generation = self.generation_counter.fetch_add(1, Ordering::AcqRel) + 1;
        std::mem::take(&mut state.events)
    }

    /// Discards all pending events without applying them (spec §4.7:
    /// "Pending batched events are discarded on stop").
    pub fn discard_pending(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.timer_armed = false;
        state.arm_generation = self.generation_counter.fetch_add(1, Ordering::AcqRel) + 1;
    }
}

/// Folds a batch of raw events into a `path -> CoalescedEvent` map,
/// resolving each event's path via the Watch Registry. Events whose
/// `wd` no longer resolves (watch already removed) are dropped silently
/// (spec §4.5).
pub fn coalesce_events(
    events: VecDeque<RawEvent>,
    registry: &Arc<WatchRegistry>,
) -> HashMap<PathBuf, CoalescedEvent> {
    let mut result: HashMap<PathBuf, CoalescedEvent> = HashMap::new();

    for event in events {
        let Some(dir_path) = registry.lookup_path(&event.wd) else {
            continue;
        };
        let path = match &event.name {
            Some(name) => dir_path.join(name),
            None => dir_path,
        };

        match result.get_mut(&path) {
            None => {
                let state = fold(None, &event);
                result.insert(
                    path.clone(),
                    CoalescedEvent {
                        path,
                        is_dir: event.is_dir,
                        state,
                    },
                );
            }
            Some(existing) => {
                existing.state = fold(Some(existing.state), &event);
                // is_dir is set from the first raw event that carried it
                // and never downgraded (spec §4.5).
                existing.is_dir = existing.is_dir || event.is_dir;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use inotify::Inotify;

    fn fake_wd(inotify: &mut Inotify, dir: &std::path::Path) -> inotify::WatchDescriptor {
        inotify
            .watches()
            .add(dir, inotify::WatchMask::CREATE)
            .expect("add watch")
    }

    fn raw(wd: inotify::WatchDescriptor, name: Option<&str>, create: bool, delete: bool, modify: bool, is_dir: bool) -> RawEvent {
        RawEvent {
            wd,
            name: name.map(|s| s.to_string()),
            is_dir,
            is_create: create,
            is_delete: delete,
            is_modify: modify,
        }
    }

    #[test]
    fn create_then_delete_cancels_to_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut inotify = Inotify::init().unwrap();
        let wd = fake_wd(&mut inotify, tmp.path());
        let registry = Arc::new(WatchRegistry::new());
        registry.insert(wd.clone(), tmp.path().to_path_buf());

        let mut events = VecDeque::new();
        events.push_back(raw(wd.clone(), Some("a.txt"), true, false, false, false));
        events.push_back(raw(wd, Some("a.txt"), false, true, false, false));

        let coalesced = coalesce_events(events, &registry);
        let entry = &coalesced[&tmp.path().join("a.txt")];
        assert_eq!(entry.state, CoalesceState::Noop);
    }

    #[test]
    fn delete_then_create_promotes_to_modified() {
        let tmp = tempfile::tempdir().unwrap();
        let mut inotify = Inotify::init().unwrap();
        let wd = fake_wd(&mut inotify, tmp.path());
        let registry = Arc::new(WatchRegistry::new());
        registry.insert(wd.clone(), tmp.path().to_path_buf());

        let mut events = VecDeque::new();
        events.push_back(raw(wd.clone(), Some("b.txt"), false, true, false, false));
        events.push_back(raw(wd, Some("b.txt"), true, false, false, false));

        let coalesced = coalesce_events(events, &registry);
        let entry = &coalesced[&tmp.path().join("b.txt")];
        assert_eq!(entry.state, CoalesceState::Modified);
    }

    #[test]
    fn unresolvable_wd_is_dropped_silently() {
        let tmp = tempfile::tempdir().unwrap();
        let mut inotify = Inotify::init().unwrap();
        let wd = fake_wd(&mut inotify, tmp.path());
        let registry = Arc::new(WatchRegistry::new()); // never inserted

        let mut events = VecDeque::new();
        events.push_back(raw(wd, Some("a.txt"), true, false, false, false));

        let coalesced = coalesce_events(events, &registry);
        assert!(coalesced.is_empty());
    }

    #[test]
    fn fold_table_matches_spec() {
        let pure = |current, create, delete, modify| {
            fold(
                current,
                &RawEvent {
                    wd: fake_wd(&mut Inotify::init().unwrap(), std::path::Path::new("/tmp")),
                    name: None,
                    is_dir: false,
                    is_create: create,
                    is_delete: delete,
                    is_modify: modify,
                },
            )
        };

        assert_eq!(pure(None, true, false, false), CoalesceState::Created);
        assert_eq!(pure(None, false, true, false), CoalesceState::Deleted);
        assert_eq!(pure(None, false, false, true), CoalesceState::Modified);

        assert_eq!(pure(Some(CoalesceState::Created), false, true, false), CoalesceState::Noop);
        assert_eq!(pure(Some(CoalesceState::Deleted), true, false, false), CoalesceState::Modified);
        assert_eq!(pure(Some(CoalesceState::Modified), false, true, false), CoalesceState::Deleted);
        assert_eq!(pure(Some(CoalesceState::Noop), true, false, false), CoalesceState::Created);
    }

    #[test]
    fn batching_window_is_not_taken() {
        let queue = CoalescingBuffer::new(Duration::from_millis(20));
        queue.set_batching(true);

        let mut inotify = Inotify::init().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let wd = fake_wd(&mut inotify, tmp.path());
        queue.push(raw(wd, Some("a.txt"), true, false, false, false));

        // No timer is armed while batching, so there is nothing to take.
        assert!(queue.try_recv_ready().is_none());
        let drained = queue.take_all();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn push_after_unbatching_arms_timer_even_with_events_already_queued() {
        let queue = CoalescingBuffer::new(Duration::from_millis(20));
        queue.set_batching(true);

        let mut inotify = Inotify::init().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let wd = fake_wd(&mut inotify, tmp.path());

        // Accumulates while batching; no timer armed yet.
        queue.push(raw(wd.clone(), Some("a.txt"), true, false, false, false));
        queue.set_batching(false);

        // The queue already holds "a.txt" from the batching period; this
        // push must still arm delivery (spec §4.7: unbatching resumes
        // normal timer-driven delivery), not stay silently un-armed
        // because the queue was non-empty.
        queue.push(raw(wd, Some("b.txt"), true, false, false, false));

        let generation = queue
            .ready_rx
            .lock()
            .recv_timeout(Duration::from_millis(500))
            .expect("timer must fire now that batching is off");

        let window = queue.try_take_window(generation).expect("window deliverable");
        assert_eq!(window.len(), 2);
    }
}
