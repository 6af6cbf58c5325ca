//! Filesystem change monitor: watches a set of directory trees via
//! inotify, coalesces bursts of create/delete/modify events into a
//! time-windowed batch, and applies the resulting changes to an
//! external file index.
//!
//! The monitor owns exactly one background thread (the Raw Event
//! Reader); everything else — the coalesce timer's fire, the Applier,
//! and user callbacks — runs on whatever thread calls [`Monitor::pump`]
//! or [`Monitor::flush_events`]. There is no bundled event loop: the
//! embedding application drives `pump` from its own.

mod applier;
mod coalesce;
mod error;
mod exclude;
mod index;
mod installer;
mod monitor;
mod reader;
mod registry;

pub use coalesce::{CoalesceState, CoalescedEvent};
pub use error::{ErrorKind, MonitorError};
pub use exclude::ExcludedPath;
pub use index::{FileIndex, IndexEntry, IndexWriter, MemoryIndex};
pub use monitor::{Monitor, PumpResult};
