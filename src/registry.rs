//! Watch Registry (spec §4.1): the bidirectional mapping between kernel
//! watch descriptors and absolute directory paths.
//!
//! Invariants maintained by this module:
//! - both directions of the mapping are total and bijective over live
//!   entries;
//! - [`WatchRegistry::count`] equals the number of live entries in
//!   either direction;
//! - the kernel-side `inotify_rm_watch` call always happens *outside*
//!   this registry's lock — `remove_by_path` only updates the maps and
//!   hands the caller the descriptor to remove from the kernel itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use inotify::WatchDescriptor;
use parking_lot::Mutex;

#[derive(Default)]
struct RegistryInner {
    wd_to_path: HashMap<WatchDescriptor, PathBuf>,
    path_to_wd: HashMap<PathBuf, WatchDescriptor>,
}

/// Bidirectional `wd <-> path` map. Cheap to construct, never shared
/// across a `set_database` swap (it is rebuildable from path alone —
/// see spec §9, "Back-references between watches and the index").
#[derive(Default)]
pub struct WatchRegistry {
    inner: Mutex<RegistryInner>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new live watch. Both maps get their own owned copy of
    /// `path` so neither can outlive or alias the other's storage.
    pub fn insert(&self, wd: WatchDescriptor, path: PathBuf) {
        let mut inner = self.inner.lock();
        inner.path_to_wd.insert(path.clone(), wd.clone());
        inner.wd_to_path.insert(wd, path);
    }

    /// Removes the entry for `path`, if any, and returns its kernel
    /// handle. The caller is responsible for calling
    /// `inotify.watches().remove(wd)` themselves, outside any lock this
    /// registry holds — that syscall can block on kernel bookkeeping.
    pub fn remove_by_path(&self, path: &Path) -> Option<WatchDescriptor> {
        let mut inner = self.inner.lock();
        let wd = inner.path_to_wd.remove(path)?;
        inner.wd_to_path.remove(&wd);
        Some(wd)
    }

    /// Resolves a watch descriptor to its directory path.
    pub fn lookup_path(&self, wd: &WatchDescriptor) -> Option<PathBuf> {
        self.inner.lock().wd_to_path.get(wd).cloned()
    }

    /// Resolves a directory path to its watch descriptor.
    pub fn lookup_wd(&self, path: &Path) -> Option<WatchDescriptor> {
        self.inner.lock().path_to_wd.get(path).cloned()
    }

    /// Number of live watches. Equal in both directions by construction.
    pub fn count(&self) -> u32 {
        self.inner.lock().wd_to_path.len() as u32
    }

    /// Drops all entries without touching the kernel — used on `stop`,
    /// after the inotify fd itself has already been closed (closing the
    /// fd implicitly invalidates every watch descriptor on it).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.wd_to_path.clear();
        inner.path_to_wd.clear();
    }
}
