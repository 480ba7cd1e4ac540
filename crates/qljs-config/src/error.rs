//! Error types for configuration loading and watching
//!
//! Platform error codes are carried verbatim: `errno` on Unix, the
//! `GetLastError` value on Windows. No translation happens between the OS
//! and the caller, so editors can render the native error message.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Raw platform error code with value equality.
///
/// Resolution errors are compared by value across refreshes; a watch whose
/// error code changes (for example `EACCES` becoming `ENOENT`) reports a
/// configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    #[cfg(unix)]
    const NOT_FOUND: i32 = libc::ENOENT;
    #[cfg(unix)]
    const PERMISSION_DENIED: i32 = libc::EACCES;
    #[cfg(unix)]
    const NOT_REGULAR_FILE: i32 = libc::EISDIR;
    #[cfg(unix)]
    const IO_FAILED: i32 = libc::EIO;
    #[cfg(unix)]
    const WATCH_EXHAUSTED: i32 = libc::ENOSPC;

    #[cfg(windows)]
    const NOT_FOUND: i32 = 2; // ERROR_FILE_NOT_FOUND
    #[cfg(windows)]
    const PERMISSION_DENIED: i32 = 5; // ERROR_ACCESS_DENIED
    #[cfg(windows)]
    const NOT_REGULAR_FILE: i32 = 5; // ERROR_ACCESS_DENIED
    #[cfg(windows)]
    const IO_FAILED: i32 = 31; // ERROR_GEN_FAILURE
    #[cfg(windows)]
    const WATCH_EXHAUSTED: i32 = 1450; // ERROR_NO_SYSTEM_RESOURCES

    pub const fn from_raw(code: i32) -> Self {
        Self(code)
    }

    /// Extract the platform code from an [`io::Error`]. Synthetic errors
    /// without an OS code are mapped onto the nearest platform code so that
    /// equality comparisons stay meaningful.
    pub fn from_io_error(error: &io::Error) -> Self {
        if let Some(code) = error.raw_os_error() {
            return Self(code);
        }
        match error.kind() {
            io::ErrorKind::NotFound => Self(Self::NOT_FOUND),
            io::ErrorKind::PermissionDenied => Self(Self::PERMISSION_DENIED),
            _ => Self(Self::IO_FAILED),
        }
    }

    /// The platform's file-not-found code.
    pub const fn not_found() -> Self {
        Self(Self::NOT_FOUND)
    }

    /// The code reported when a `quick-lint-js.config` candidate exists but
    /// is not a regular file: `EISDIR` on Unix, access denied on Windows.
    pub const fn not_regular_file() -> Self {
        Self(Self::NOT_REGULAR_FILE)
    }

    /// The code reported when a per-directory watch cannot be armed because
    /// the platform's watch table is exhausted.
    pub const fn watch_exhausted() -> Self {
        Self(Self::WATCH_EXHAUSTED)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub fn is_not_found(self) -> bool {
        self.0 == Self::NOT_FOUND
    }

    pub fn is_permission_denied(self) -> bool {
        self.0 == Self::PERMISSION_DENIED
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}

/// An I/O failure while resolving or reading a configuration file.
///
/// `path` names the file or directory the operation failed on.
/// `canonicalizing_path` is set when the failure happened while
/// canonicalizing a caller-supplied path, and holds that original input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load configuration from '{}': {}", .path.display(), .code)]
pub struct LoadError {
    pub path: PathBuf,
    pub canonicalizing_path: Option<PathBuf>,
    pub code: ErrorCode,
}

impl LoadError {
    pub fn from_io(path: impl Into<PathBuf>, error: &io::Error) -> Self {
        Self {
            path: path.into(),
            canonicalizing_path: None,
            code: ErrorCode::from_io_error(error),
        }
    }

    pub fn while_canonicalizing(
        path: impl Into<PathBuf>,
        canonicalizing_path: impl Into<PathBuf>,
        error: &io::Error,
    ) -> Self {
        Self {
            path: path.into(),
            canonicalizing_path: Some(canonicalizing_path.into()),
            code: ErrorCode::from_io_error(error),
        }
    }

    pub fn with_code(path: impl Into<PathBuf>, code: ErrorCode) -> Self {
        Self {
            path: path.into(),
            canonicalizing_path: None,
            code,
        }
    }
}

/// A failure to arm a filesystem watch.
///
/// Watch failures never abort a load; they accumulate inside the watcher
/// and are drained with `take_watch_errors`. An empty `path` marks an
/// init-time failure (for example inotify instance exhaustion).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to watch '{}': {}", .path.display(), .code)]
pub struct WatchError {
    pub path: PathBuf,
    pub code: ErrorCode,
}

impl WatchError {
    pub fn new(path: impl Into<PathBuf>, code: ErrorCode) -> Self {
        Self {
            path: path.into(),
            code,
        }
    }

    pub fn at_init(code: ErrorCode) -> Self {
        Self {
            path: PathBuf::new(),
            code,
        }
    }

    pub fn is_init_error(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}
