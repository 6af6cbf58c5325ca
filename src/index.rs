//! External Index contract (spec §6): the file index is an out-of-scope
//! peer this crate only writes into, never owns. [`FileIndex`] is the
//! trait boundary standing in for the C API's function-pointer table;
//! [`MemoryIndex`] is a minimal reference implementation used by tests
//! and the `demos/pump_loop` example, never intended for production use.

use std::path::{Path, PathBuf};

/// A single entry in the index: either a file or a folder. `mtime` is
/// seconds since the epoch, matching `std::fs::Metadata::modified`'s
/// resolution after conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub is_folder: bool,
    pub size: u64,
    pub mtime: i64,
}

/// A held lock on the index, returned by [`FileIndex::lock`]. Dropping
/// it releases the lock (spec §6: `lock`/`unlock` become a guard type
/// under RAII rather than a matched pair of calls).
pub trait IndexWriter {
    fn find_entry_by_path(&self, path: &Path) -> Option<IndexEntry>;
    fn find_folder_by_path(&self, path: &Path) -> Option<IndexEntry>;
    fn entry_is_folder(&self, entry: &IndexEntry) -> bool {
        entry.is_folder
    }

    fn add_folder(&mut self, parent: &Path, name: &str, mtime: i64) -> IndexEntry;
    fn add_file(&mut self, parent: &Path, name: &str, size: u64, mtime: i64) -> IndexEntry;
    fn remove_folder(&mut self, path: &Path);
    fn remove_file(&mut self, path: &Path);
    fn update_file(&mut self, path: &Path, size: u64, mtime: i64);
}

/// The external index handle (spec §6). `ref`/`unref` fold into `Arc`'s
/// `Clone`/`Drop` at the call site; this trait only needs to expose the
/// locking operation.
pub trait FileIndex: Send + Sync {
    fn lock<'a>(&'a self) -> Box<dyn IndexWriter + 'a>;
}

/// A minimal in-process reference implementation, for tests and the
/// example binary. Not a production index — no persistence, no query
/// surface, just enough bookkeeping to exercise the Applier's contract.
#[derive(Default)]
pub struct MemoryIndex {
    inner: parking_lot::Mutex<Vec<IndexEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/demo convenience: snapshot of every entry currently indexed.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.inner.lock().clone()
    }
}

struct MemoryWriter<'a> {
    guard: parking_lot::MutexGuard<'a, Vec<IndexEntry>>,
}

impl<'a> IndexWriter for MemoryWriter<'a> {
    fn find_entry_by_path(&self, path: &Path) -> Option<IndexEntry> {
        self.guard.iter().find(|e| e.path == path).cloned()
    }

    fn find_folder_by_path(&self, path: &Path) -> Option<IndexEntry> {
        self.guard
            .iter()
            .find(|e| e.path == path && e.is_folder)
            .cloned()
    }

    fn add_folder(&mut self, parent: &Path, name: &str, mtime: i64) -> IndexEntry {
        let entry = IndexEntry {
            path: parent.join(name),
            is_folder: true,
            size: 0,
            mtime,
        };
        self.guard.push(entry.clone());
        entry
    }

    fn add_file(&mut self, parent: &Path, name: &str, size: u64, mtime: i64) -> IndexEntry {
        let entry = IndexEntry {
            path: parent.join(name),
            is_folder: false,
            size,
            mtime,
        };
        self.guard.push(entry.clone());
        entry
    }

    fn remove_folder(&mut self, path: &Path) {
        // Cascades to every descendant, matching fsearch_monitor.c's
        // db_remove_folder: the Applier issues one remove_folder call
        // per deleted subtree and relies on the index to drop its
        // contents along with it.
        self.guard.retain(|e| e.path != path && !e.path.starts_with(path));
    }

    fn remove_file(&mut self, path: &Path) {
        self.guard.retain(|e| e.path != path);
    }

    fn update_file(&mut self, path: &Path, size: u64, mtime: i64) {
        if let Some(entry) = self.guard.iter_mut().find(|e| e.path == path) {
            entry.size = size;
            entry.mtime = mtime;
        }
    }
}

impl FileIndex for MemoryIndex {
    fn lock<'a>(&'a self) -> Box<dyn IndexWriter + 'a> {
        Box::new(MemoryWriter {
            guard: self.inner.lock(),
        })
    }
}
