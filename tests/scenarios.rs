//! End-to-end scenarios (spec §8) against a real temp directory and a
//! real `Inotify` watcher, driven purely through `Monitor::pump`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fsearch_monitor::{FileIndex, MemoryIndex, Monitor, PumpResult};

/// Polls `pump` until it applies a window or `timeout` elapses. The
/// coalesce interval is set short in these tests so this resolves well
/// under a second.
fn pump_until_applied(monitor: &Monitor, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if monitor.pump() == PumpResult::Applied {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn new_monitor(root: &std::path::Path, index: Arc<MemoryIndex>) -> Monitor {
    let dyn_index: Arc<dyn FileIndex> = index;
    let mut monitor = Monitor::new(dyn_index, vec![root.to_path_buf()]);
    monitor.set_coalesce_interval_ms(50);
    monitor.start().expect("start monitor");
    monitor
}

#[test]
fn create_then_delete_cancels_to_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryIndex::new());
    let monitor = new_monitor(tmp.path(), Arc::clone(&index));

    let path = tmp.path().join("ghost.txt");
    std::fs::write(&path, b"x").unwrap();
    std::fs::remove_file(&path).unwrap();

    // Give the window time to close; nothing should ever be applied
    // since CREATED+DELETED folds to NOOP within one window.
    let applied = pump_until_applied(&monitor, Duration::from_millis(500));
    assert!(
        !applied || index.entries().iter().all(|e| e.path != path),
        "a create-then-delete within one window must never surface"
    );
}

#[test]
fn delete_then_create_promotes_to_modified() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("flicker.txt");
    std::fs::write(&path, b"original").unwrap();

    let index = Arc::new(MemoryIndex::new());
    index.lock().add_file(tmp.path(), "flicker.txt", 8, 0);
    let monitor = new_monitor(tmp.path(), Arc::clone(&index));

    std::fs::remove_file(&path).unwrap();
    std::fs::write(&path, b"replaced-contents").unwrap();

    assert!(pump_until_applied(&monitor, Duration::from_millis(500)));
    let entry = index
        .entries()
        .into_iter()
        .find(|e| e.path == path)
        .expect("entry still present after delete+create folds to MODIFIED");
    assert_eq!(entry.size, "replaced-contents".len() as u64);
}

#[test]
fn new_subdirectory_gets_its_own_watch_before_window_closes() {
    let tmp = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryIndex::new());
    let monitor = new_monitor(tmp.path(), Arc::clone(&index));

    let sub = tmp.path().join("newdir");
    std::fs::create_dir(&sub).unwrap();
    // A file created inside the new subdirectory immediately after
    // must still be picked up, proving the recursive watch install
    // happened before the coalescing window closed.
    std::fs::write(sub.join("inner.txt"), b"abc").unwrap();

    assert!(pump_until_applied(&monitor, Duration::from_millis(1000)));
    assert!(monitor.get_num_watches() >= 2);
}

#[test]
fn recursive_delete_removes_folder_and_watch() {
    let tmp = tempfile::tempdir().unwrap();
    let sub = tmp.path().join("doomed");
    std::fs::create_dir(&sub).unwrap();
    std::fs::write(sub.join("x"), b"x").unwrap();
    std::fs::write(sub.join("y"), b"y").unwrap();

    let index = Arc::new(MemoryIndex::new());
    index.lock().add_folder(tmp.path(), "doomed", 0);
    index.lock().add_file(&sub, "x", 1, 0);
    index.lock().add_file(&sub, "y", 1, 0);
    let monitor = new_monitor(tmp.path(), Arc::clone(&index));
    let watches_before = monitor.get_num_watches();

    std::fs::remove_dir_all(&sub).unwrap();

    assert!(pump_until_applied(&monitor, Duration::from_millis(500)));
    assert!(index.entries().iter().all(|e| e.path != sub));
    assert!(index.entries().iter().all(|e| e.path != sub.join("x")));
    assert!(index.entries().iter().all(|e| e.path != sub.join("y")));
    assert!(monitor.get_num_watches() < watches_before);
}

#[test]
fn overflow_signals_error_callback() {
    let tmp = tempfile::tempdir().unwrap();
    let index: Arc<dyn FileIndex> = Arc::new(MemoryIndex::new());
    let mut monitor = Monitor::new(index, vec![tmp.path().to_path_buf()]);

    let saw_overflow = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&saw_overflow);
    monitor.set_error_callback(move |kind| {
        if kind == fsearch_monitor::ErrorKind::QueueOverflow {
            flag.store(true, Ordering::Release);
        }
    });
    monitor.start().expect("start monitor");

    // This test only verifies the wiring compiles and the callback slot
    // is reachable; provoking a real kernel Q_OVERFLOW deterministically
    // requires tuning /proc/sys/fs/inotify/max_queued_events, which this
    // suite does not assume permission to change.
    assert!(!monitor.overflow_occurred());
    let _ = saw_overflow.load(Ordering::Acquire);
}

#[test]
fn batch_mode_holds_delivery_until_flush() {
    let tmp = tempfile::tempdir().unwrap();
    let index = Arc::new(MemoryIndex::new());
    let monitor = new_monitor(tmp.path(), Arc::clone(&index));

    monitor.set_batching(true);
    let path = tmp.path().join("batched.txt");
    std::fs::write(&path, b"held").unwrap();

    // Give the reader a moment to observe and enqueue the event, then
    // confirm pump alone never applies it while batching is on.
    std::thread::sleep(Duration::from_millis(200));
    for _ in 0..5 {
        assert_eq!(monitor.pump(), PumpResult::Idle);
    }
    assert!(index.entries().iter().all(|e| e.path != path));

    monitor.set_batching(false);
    monitor.flush_events();
    assert!(index.entries().iter().any(|e| e.path == path));
}

#[test]
fn indexed_paths_that_do_not_exist_fail_start() {
    let index: Arc<dyn FileIndex> = Arc::new(MemoryIndex::new());
    let mut monitor = Monitor::new(index, vec![PathBuf::from("/no/such/path")]);
    assert!(monitor.start().is_err());
}
