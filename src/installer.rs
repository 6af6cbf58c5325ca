//! Watch Installer (spec §4.3): depth-first recursive traversal that
//! installs one kernel watch per directory, honouring the Exclusion
//! Policy and the kernel's per-user watch ceiling.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use inotify::{Inotify, WatchMask};
use parking_lot::Mutex;

use crate::exclude::ExclusionPolicy;
use crate::registry::WatchRegistry;

/// The watch mask requested for every directory (spec §4.3): create,
/// delete, modify, both halves of a move, directory-only,
/// no-symlink-follow, and exclude-unlink-races semantics.
fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MODIFY
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::DONT_FOLLOW
        | WatchMask::ONLYDIR
        | WatchMask::EXCL_UNLINK
}

/// Recursively installs watches under `root`. Partial installation is an
/// acceptable steady state (spec §4.3) — failures are classified and
/// handled per-node rather than aborting the whole walk.
pub struct WatchInstaller<'a> {
    inotify: &'a Mutex<Inotify>,
    registry: &'a WatchRegistry,
    exclude: &'a ExclusionPolicy,
    watch_limit_reached: &'a AtomicBool,
}

impl<'a> WatchInstaller<'a> {
    pub fn new(
        inotify: &'a Mutex<Inotify>,
        registry: &'a WatchRegistry,
        exclude: &'a ExclusionPolicy,
        watch_limit_reached: &'a AtomicBool,
    ) -> Self {
        Self {
            inotify,
            registry,
            exclude,
            watch_limit_reached,
        }
    }

    /// Installs a watch on `root` and recurses into its non-excluded
    /// subdirectories. Symlinks are never followed (`file_type` reports
    /// the link itself, not its target, since we never call
    /// `metadata()` — only `symlink_metadata` via `DirEntry::file_type`).
    pub fn install_recursive(&self, root: &Path) {
        if self.exclude.is_path_excluded(root) {
            tracing::debug!(path = %root.display(), "skipping excluded subtree");
            return;
        }

        if !self.add_watch(root) {
            return;
        }

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(path = %root.display(), %err, "failed to read directory, leaving watch in place");
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name_str = match name.to_str() {
                Some(s) => s,
                None => continue,
            };
            let child_path = entry.path();

            if self.exclude.is_excluded(name_str, &child_path) {
                continue;
            }

            match entry.file_type() {
                Ok(ft) if ft.is_dir() => self.install_recursive(&child_path),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(path = %child_path.display(), %err, "failed to stat directory entry");
                }
            }
        }
    }

    /// Attempts to install a single watch. Returns `false` if no watch
    /// was installed (caller should not recurse further in that case).
    fn add_watch(&self, path: &Path) -> bool {
        if self.watch_limit_reached.load(Ordering::Acquire) {
            return false;
        }

        let mut inotify = self.inotify.lock();
        match inotify.watches().add(path, watch_mask()) {
            Ok(wd) => {
                drop(inotify);
                self.registry.insert(wd, path.to_path_buf());
                tracing::debug!(path = %path.display(), total = self.registry.count(), "added watch");
                true
            }
            Err(err) => {
                drop(inotify);
                self.classify_install_failure(path, &err);
                false
            }
        }
    }

    fn classify_install_failure(&self, path: &Path, err: &io::Error) {
        match err.raw_os_error() {
            Some(libc::ENOSPC) => {
                if !self.watch_limit_reached.swap(true, Ordering::AcqRel) {
                    tracing::warn!(
                        "inotify watch limit reached; file monitoring will be incomplete \
                         (increase fs.inotify.max_user_watches)"
                    );
                }
            }
            Some(libc::ENOENT) => {
                tracing::debug!(path = %path.display(), "directory vanished before watch could be installed");
            }
            Some(libc::EACCES) => {
                tracing::debug!(path = %path.display(), "permission denied installing watch");
            }
            _ => {
                tracing::debug!(path = %path.display(), %err, "failed to install watch");
            }
        }
    }
}
