//! Nearest-config resolution
//!
//! Walks from a starting path toward the filesystem root looking for the
//! nearest `quick-lint-js.config`. The walk happens on the canonical form
//! of the starting path, so `..` components are resolved before searching
//! and never cause an intermediate literal directory to be inspected.
//!
//! Every existing directory the walk touches is reported back so the
//! loader can arm it with the watcher; that is what makes the later
//! appearance of a shadowing config in an intermediate directory
//! observable.

use crate::canonical::CanonicalPath;
use crate::error::{ErrorCode, LoadError};
use crate::filesystem::{ConfigFilesystem, FileKind};
use crate::loader::FileToLint;
use std::path::Path;

/// The well-known configuration file name. Matching is whatever the OS
/// gives: case-sensitive on Unix, case-insensitive on Windows.
pub const CONFIG_FILE_NAME: &str = "quick-lint-js.config";

/// Outcome of one resolution pass.
#[derive(Debug)]
pub struct Resolution {
    /// `Ok(Some(path))`: the nearest config, canonicalized.
    /// `Ok(None)`: no config applies.
    /// `Err(_)`: resolution failed (permission, non-regular candidate, ...).
    pub outcome: std::result::Result<Option<CanonicalPath>, LoadError>,
    /// Every existing directory inspected during the walk. Directories in
    /// the search path that do not exist are covered by their nearest
    /// existing ancestor, which is always part of this set.
    pub visited_directories: Vec<CanonicalPath>,
}

/// Resolve the configuration that applies to `file`.
pub fn resolve<F: ConfigFilesystem>(filesystem: &F, file: &FileToLint) -> Resolution {
    if let Some(explicit) = &file.config_file {
        return resolve_explicit(filesystem, explicit);
    }
    let Some(start) = file.search_start() else {
        // stdin with no explicit search path: no config applies, no walk.
        return Resolution {
            outcome: Ok(None),
            visited_directories: Vec::new(),
        };
    };
    let mut visited_directories = Vec::new();
    let outcome = search_ancestors(filesystem, start, &mut visited_directories);
    Resolution {
        outcome,
        visited_directories,
    }
}

/// Direct mode: the caller named the config; no ancestor search. The
/// config's directory is still reported for watching.
fn resolve_explicit<F: ConfigFilesystem>(filesystem: &F, explicit: &Path) -> Resolution {
    let mut visited_directories = Vec::new();
    let outcome = match filesystem.canonicalize(explicit) {
        Ok(canonicalized) => {
            let config_path = canonicalized.canonical;
            let mut directory = config_path.parent();
            while let Some(candidate) = directory {
                if filesystem.directory_exists(&candidate) {
                    visited_directories.push(candidate);
                    break;
                }
                directory = candidate.parent();
            }
            Ok(Some(config_path))
        }
        Err(error) => Err(error),
    };
    Resolution {
        outcome,
        visited_directories,
    }
}

fn search_ancestors<F: ConfigFilesystem>(
    filesystem: &F,
    start: &Path,
    visited_directories: &mut Vec<CanonicalPath>,
) -> std::result::Result<Option<CanonicalPath>, LoadError> {
    let canonicalized = filesystem.canonicalize(start)?;
    let mut directory = match canonicalized.canonical.parent() {
        Some(parent) => parent,
        // The search start is the filesystem root itself.
        None => canonicalized.canonical.clone(),
    };

    loop {
        if filesystem.directory_exists(&directory) {
            visited_directories.push(directory.clone());

            let candidate = directory.join_name(CONFIG_FILE_NAME);
            match filesystem.file_kind(&candidate)? {
                Some(FileKind::File) => {
                    let canonical = filesystem.canonicalize(&candidate)?.canonical;
                    tracing::debug!(config = %canonical, "found configuration");
                    return Ok(Some(canonical));
                }
                Some(FileKind::Directory | FileKind::Other) => {
                    let canonical = filesystem.canonicalize(&candidate)?.canonical;
                    return Err(LoadError::with_code(
                        canonical.into_path_buf(),
                        ErrorCode::not_regular_file(),
                    ));
                }
                None => {}
            }
        }

        match directory.parent() {
            Some(parent) => directory = parent,
            None => break,
        }
    }

    tracing::debug!(start = %start.display(), "no configuration found");
    Ok(None)
}
