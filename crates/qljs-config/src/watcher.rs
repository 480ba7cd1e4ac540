//! Platform filesystem watcher
//!
//! Watches directories for mutations and exposes a pull model: any event in
//! any armed directory sets a single dirty pulse, which `refresh()` on the
//! loader consumes. No per-file precision is attempted; a pulse means
//! "something changed, rescan".
//!
//! Platform dispatch is selected at compile time: inotify on Linux, kqueue
//! on the BSDs and macOS, ReadDirectoryChangesW on Windows. Watch failures
//! are never fatal to a load; they accumulate here and are drained with
//! [`PlatformWatcher::take_watch_errors`] so clients can warn but keep
//! linting.
//!
//! Known platform gap: kqueue may not report permission-only changes to an
//! already-watched file, so a chmod with no other mutation can miss its
//! pulse. The loader's `refresh()` rescans unconditionally, so the change
//! is still picked up whenever the client refreshes.

use crate::canonical::CanonicalPath;
use crate::error::{ErrorCode, WatchError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError, channel};

pub struct PlatformWatcher {
    backend: Option<RecommendedWatcher>,
    events: Receiver<notify::Result<Event>>,
    /// Directories armed in the current rescan generation.
    armed: HashSet<CanonicalPath>,
    watch_errors: Vec<WatchError>,
    dirty: bool,
}

impl PlatformWatcher {
    /// Create a watcher. Backend initialization failure (for example
    /// inotify instance exhaustion) is queued as an init-time watch error
    /// with an empty path; the watcher then degrades to inert so loads
    /// still succeed with partial observability.
    pub fn new() -> Self {
        let (tx, rx) = channel();
        let mut watch_errors = Vec::new();
        let backend = match notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        }) {
            Ok(backend) => Some(backend),
            Err(error) => {
                tracing::warn!("failed to initialize filesystem watcher: {error}");
                watch_errors.push(WatchError::at_init(notify_error_code(&error)));
                None
            }
        };
        Self {
            backend,
            events: rx,
            armed: HashSet::new(),
            watch_errors,
            dirty: false,
        }
    }

    /// Arm a non-recursive watch on a directory. Idempotent within a rescan
    /// generation. Per-directory failure (for example `ENOSPC` watch-table
    /// exhaustion) is queued with the offending canonical path.
    pub fn watch_directory(&mut self, directory: &CanonicalPath) {
        if !self.armed.insert(directory.clone()) {
            return;
        }
        let Some(backend) = &mut self.backend else {
            return;
        };
        match backend.watch(directory.as_path(), RecursiveMode::NonRecursive) {
            Ok(()) => tracing::debug!(directory = %directory, "watching directory"),
            Err(error) => {
                tracing::warn!(directory = %directory, "failed to watch directory: {error}");
                self.watch_errors
                    .push(WatchError::new(directory.as_path(), notify_error_code(&error)));
            }
        }
    }

    /// Start a new arming generation. inotify and the Windows backend need
    /// re-registration after a watch fires; re-arming everything on each
    /// rescan covers both (kqueue re-arms are redundant but harmless).
    pub fn begin_rescan(&mut self) {
        self.armed.clear();
    }

    /// Drain out-of-band watch errors accumulated since the last call.
    pub fn take_watch_errors(&mut self) -> Vec<WatchError> {
        self.drain_events();
        std::mem::take(&mut self.watch_errors)
    }

    /// True if any armed directory changed since the pulse was last taken.
    pub fn poll_dirty(&mut self) -> bool {
        self.drain_events();
        self.dirty
    }

    /// Consume and clear the dirty pulse.
    pub fn take_dirty(&mut self) -> bool {
        self.drain_events();
        std::mem::replace(&mut self.dirty, false)
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(Ok(event)) => {
                    if event_signals_change(&event.kind) {
                        self.dirty = true;
                    }
                }
                Ok(Err(error)) => {
                    let path: PathBuf = error.paths.first().cloned().unwrap_or_default();
                    self.watch_errors
                        .push(WatchError::new(path, notify_error_code(&error)));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl Default for PlatformWatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn event_signals_change(kind: &EventKind) -> bool {
    // Reads are not mutations; everything else forces a rescan.
    !matches!(kind, EventKind::Access(_))
}

fn notify_error_code(error: &notify::Error) -> ErrorCode {
    match &error.kind {
        notify::ErrorKind::Io(io_error) => ErrorCode::from_io_error(io_error),
        notify::ErrorKind::PathNotFound => ErrorCode::not_found(),
        notify::ErrorKind::MaxFilesWatch => ErrorCode::watch_exhausted(),
        _ => ErrorCode::from_io_error(&io::Error::other(error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{ConfigFilesystem, OsFilesystem};
    use tempfile::TempDir;

    #[test]
    fn new_watcher_is_clean() {
        let mut watcher = PlatformWatcher::new();
        assert!(!watcher.poll_dirty());
        assert!(watcher.take_watch_errors().is_empty());
    }

    #[test]
    fn watching_an_existing_directory_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let canonical = OsFilesystem::new()
            .canonicalize(temp_dir.path())
            .unwrap()
            .canonical;

        let mut watcher = PlatformWatcher::new();
        watcher.watch_directory(&canonical);
        watcher.watch_directory(&canonical); // idempotent
        assert!(watcher.take_watch_errors().is_empty());
    }

    #[test]
    fn watching_a_missing_directory_queues_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = CanonicalPath::new_unchecked(temp_dir.path().join("does-not-exist"));

        let mut watcher = PlatformWatcher::new();
        watcher.watch_directory(&missing);

        let errors = watcher.take_watch_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, missing.as_path());
        assert!(!errors[0].is_init_error());
        // Draining clears the queue.
        assert!(watcher.take_watch_errors().is_empty());
    }

    #[test]
    fn rescan_generation_allows_rearming() {
        let temp_dir = TempDir::new().unwrap();
        let canonical = OsFilesystem::new()
            .canonicalize(temp_dir.path())
            .unwrap()
            .canonical;

        let mut watcher = PlatformWatcher::new();
        watcher.watch_directory(&canonical);
        watcher.begin_rescan();
        watcher.watch_directory(&canonical);
        assert!(watcher.take_watch_errors().is_empty());
    }
}
