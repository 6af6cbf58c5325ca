//! Error taxonomy (spec §7).
//!
//! Two tiers: `MonitorError` for operations that can fail synchronously
//! (construction, `start`), and `ErrorKind` for the two conditions that
//! escalate asynchronously to the registered error callback. Everything
//! else in the monitor (per-path stat/install/lookup failures) is logged
//! and silently skipped — see the module docs in `installer`, `applier`,
//! and `reader` for where that happens.

use std::path::PathBuf;
use thiserror::Error;

/// Failures that can occur constructing or starting a [`crate::Monitor`].
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("watch root does not exist: {0}")]
    InvalidWatchRoot(PathBuf),

    #[error("failed to initialize inotify")]
    WatcherInit(#[source] std::io::Error),

    #[error("failed to install watch on {path}")]
    WatchStart {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Conditions surfaced to the registered error callback (spec §4.7, §7).
///
/// Both are asynchronous: they are detected on the Reader thread but
/// always delivered on the caller's cooperative scheduler, never
/// invoked directly from the Reader thread (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The kernel's event queue overflowed and dropped events. Recovery
    /// requires a full re-scan, which is the caller's responsibility.
    QueueOverflow,
    /// The Reader thread exited due to an unexpected I/O error while
    /// the monitor was not being stopped. Monitoring has ceased; the
    /// caller must decide whether to restart.
    ThreadCrashed,
}
