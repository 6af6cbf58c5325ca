//! Applier (spec §4.6): consumes a coalesced batch and mutates the file
//! index under its own lock, acquired once per batch. Runs entirely on
//! the caller's cooperative scheduler — never on the Reader thread.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::coalesce::{CoalesceState, CoalescedEvent};
use crate::exclude::ExclusionPolicy;
use crate::index::FileIndex;
use crate::installer::WatchInstaller;
use crate::registry::WatchRegistry;

use inotify::Inotify;
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;

fn mtime_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Applies one coalesced window to `index`, in the order the map
/// iterates (spec.md does not require cross-path ordering within a
/// window, only that the whole window finishes before the next begins).
#[allow(clippy::too_many_arguments)]
pub fn apply_batch(
    events: Vec<CoalescedEvent>,
    index: &Arc<dyn FileIndex>,
    inotify: &Mutex<Inotify>,
    registry: &WatchRegistry,
    exclude: &ExclusionPolicy,
    watch_limit_reached: &AtomicBool,
) {
    let mut writer = index.lock();

    for event in events {
        match event.state {
            CoalesceState::Noop => continue,
            CoalesceState::Created => {
                apply_created(
                    &event.path,
                    event.is_dir,
                    &mut *writer,
                    inotify,
                    registry,
                    exclude,
                    watch_limit_reached,
                );
            }
            CoalesceState::Deleted => {
                apply_deleted(&event.path, &mut *writer, inotify, registry);
            }
            CoalesceState::Modified => {
                apply_modified(&event.path, event.is_dir, &mut *writer);
            }
        }
    }
}

fn apply_created(
    path: &Path,
    is_dir_hint: bool,
    writer: &mut dyn crate::index::IndexWriter,
    inotify: &Mutex<Inotify>,
    registry: &WatchRegistry,
    exclude: &ExclusionPolicy,
    watch_limit_reached: &AtomicBool,
) {
    if writer.find_entry_by_path(path).is_some() {
        // Already indexed, e.g. by a concurrent initial scan. Resolves
        // scan-vs-monitor races (spec §4.6).
        return;
    }

    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return, // gone already; consistency restored by next event or re-scan
    };

    let Some(parent) = path.parent() else {
        return;
    };
    if writer.find_folder_by_path(parent).is_none() && parent != Path::new("") {
        // Parent must already be a folder entry (root excepted, handled
        // by the monitor's initial scan, not by CREATE application).
        return;
    }

    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return,
    };

    let is_dir = is_dir_hint || metadata.is_dir();
    let mtime = mtime_secs(&metadata);

    if is_dir {
        writer.add_folder(parent, name, mtime);

        let installer = WatchInstaller::new(inotify, registry, exclude, watch_limit_reached);
        installer.install_recursive(path);

        // Direct children are enumerated once here; their own
        // subdirectories self-report contents via later CREATE events
        // (spec §4.6, grounded on fsearch_monitor.c's COALESCED_CREATED
        // branch — see DESIGN.md for the partial-recursion decision).
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                let child_name = entry.file_name();
                let Some(child_name) = child_name.to_str() else {
                    continue;
                };
                let child_path = entry.path();
                if exclude.is_excluded(child_name, &child_path) {
                    continue;
                }
                let Ok(child_meta) = entry.metadata() else {
                    continue;
                };
                if !child_meta.is_dir() {
                    writer.add_file(path, child_name, child_meta.len(), mtime_secs(&child_meta));
                }
            }
        }
    } else {
        writer.add_file(parent, name, metadata.len(), mtime);
    }
}

fn apply_deleted(path: &Path, writer: &mut dyn crate::index::IndexWriter, inotify: &Mutex<Inotify>, registry: &WatchRegistry) {
    let Some(entry) = writer.find_entry_by_path(path) else {
        return;
    };

    if entry.is_folder {
        if let Some(wd) = registry.remove_by_path(path) {
            let _ = inotify.lock().watches().remove(wd);
        }
        writer.remove_folder(path);
    } else {
        writer.remove_file(path);
    }
}

fn apply_modified(path: &Path, is_dir_hint: bool, writer: &mut dyn crate::index::IndexWriter) {
    match writer.find_entry_by_path(path) {
        Some(entry) => {
            if entry.is_folder {
                // Directory mtime churn is noise (spec §4.6).
                return;
            }
            if let Ok(metadata) = fs::metadata(path) {
                writer.update_file(path, metadata.len(), mtime_secs(&metadata));
            }
        }
        None => {
            if is_dir_hint {
                return;
            }
            // Late CREATE for a file: no watch install needed for files.
            if let Ok(metadata) = fs::metadata(path) {
                if metadata.is_file() {
                    if let Some(parent) = path.parent() {
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            writer.add_file(parent, name, metadata.len(), mtime_secs(&metadata));
                        }
                    }
                }
            }
        }
    }
}
