//! Content-keyed configuration cache
//!
//! At most one live entry exists per canonical config path; every watch
//! resolving to that path shares the same [`Arc`], so entry identity
//! (`Arc::ptr_eq`) is the "same loaded config" guarantee. A refresh that
//! reads byte-identical content keeps the existing entry untouched, which
//! is what suppresses spurious change records downstream.

use crate::canonical::CanonicalPath;
use crate::config::Configuration;
use crate::error::LoadError;
use crate::filesystem::ConfigFilesystem;
use crate::result::Result;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Hash of a config file's raw bytes. Byte equality, not parsed equality,
/// is the change-suppression predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash {
    hash: u64,
    len: usize,
}

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            len: bytes.len(),
        }
    }
}

/// A loaded and parsed configuration file.
///
/// A parse failure does not evict the entry: the configuration degrades to
/// defaults, `parse_error` records why, and linting proceeds.
#[derive(Debug)]
pub struct LoadedConfig {
    config_path: CanonicalPath,
    config: Configuration,
    content_hash: ContentHash,
    parse_error: Option<String>,
}

impl LoadedConfig {
    pub fn config_path(&self) -> &CanonicalPath {
        &self.config_path
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    /// True when the file failed to parse and default semantics are being
    /// served in its place.
    pub fn is_degraded(&self) -> bool {
        self.parse_error.is_some()
    }
}

/// Result of re-reading a cached entry during refresh.
pub enum RefreshOutcome {
    /// Bytes are unchanged; the existing entry is preserved by identity.
    Unchanged(Arc<LoadedConfig>),
    /// Content changed; a replacement entry now lives under the same path.
    Updated(Arc<LoadedConfig>),
    /// The file could not be read; the stale entry was evicted.
    Failed(LoadError),
}

#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: HashMap<CanonicalPath, Arc<LoadedConfig>>,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the entry for a canonical path, loading it on first use.
    pub fn get_or_load<F: ConfigFilesystem>(
        &mut self,
        filesystem: &F,
        path: &CanonicalPath,
    ) -> Result<Arc<LoadedConfig>> {
        if let Some(entry) = self.entries.get(path) {
            tracing::debug!(path = %path, "config cache hit");
            return Ok(entry.clone());
        }
        let entry = load_entry(filesystem, path)?;
        tracing::info!(path = %path, "loaded configuration");
        self.entries.insert(path.clone(), entry.clone());
        Ok(entry)
    }

    /// Re-read and reparse the file at `path`.
    pub fn refresh_entry<F: ConfigFilesystem>(
        &mut self,
        filesystem: &F,
        path: &CanonicalPath,
    ) -> RefreshOutcome {
        let bytes = match filesystem.read_file(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                // Evict so a later recovery reloads rather than serving a
                // stale configuration to new watches.
                self.entries.remove(path);
                return RefreshOutcome::Failed(error);
            }
        };
        let content_hash = ContentHash::of_bytes(&bytes);
        if let Some(existing) = self.entries.get(path)
            && existing.content_hash == content_hash
        {
            return RefreshOutcome::Unchanged(existing.clone());
        }
        let entry = Arc::new(parse_entry(path.clone(), &bytes, content_hash));
        tracing::debug!(path = %path, "configuration reloaded");
        self.entries.insert(path.clone(), entry.clone());
        RefreshOutcome::Updated(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn load_entry<F: ConfigFilesystem>(
    filesystem: &F,
    path: &CanonicalPath,
) -> Result<Arc<LoadedConfig>> {
    let bytes = filesystem.read_file(path)?;
    let content_hash = ContentHash::of_bytes(&bytes);
    Ok(Arc::new(parse_entry(path.clone(), &bytes, content_hash)))
}

fn parse_entry(config_path: CanonicalPath, bytes: &[u8], content_hash: ContentHash) -> LoadedConfig {
    match Configuration::parse(bytes) {
        Ok(config) => LoadedConfig {
            config_path,
            config,
            content_hash,
            parse_error: None,
        },
        Err(error) => {
            tracing::warn!(
                path = %config_path,
                "config failed to parse, serving defaults: {error}"
            );
            LoadedConfig {
                config_path,
                config: Configuration::default(),
                content_hash,
                parse_error: Some(error.to_string()),
            }
        }
    }
}
