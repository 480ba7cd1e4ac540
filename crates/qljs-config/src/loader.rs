//! Configuration loader orchestration
//!
//! The loader owns the watch registry, the config cache, and (optionally)
//! the platform watcher. All public operations run on one thread; change
//! detection is a pull model: the watcher raises a dirty pulse, the client
//! calls [`ConfigLoader::refresh`], and the loader re-resolves every watch
//! and reports the differences as [`ConfigurationChange`] records.

use crate::cache::{ConfigCache, LoadedConfig, RefreshOutcome};
use crate::canonical::CanonicalPath;
use crate::error::{ErrorCode, LoadError, WatchError};
use crate::filesystem::ConfigFilesystem;
use crate::resolver;
use crate::result::Result;
use crate::watcher::PlatformWatcher;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opaque caller-supplied identifier, echoed verbatim in change records.
/// The loader never interprets it; multiple watches may share one token.
pub type WatchToken = u64;

/// A file the linter wants configuration for.
#[derive(Debug, Clone)]
pub struct FileToLint {
    pub path: PathBuf,
    /// Explicit config override. When set, ancestor search is bypassed
    /// entirely (direct mode).
    pub config_file: Option<PathBuf>,
    /// Where the ancestor search starts. Defaults to `path`. Required for
    /// stdin, which otherwise gets no config.
    pub path_for_config_search: Option<PathBuf>,
    pub is_stdin: bool,
}

impl FileToLint {
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config_file: None,
            path_for_config_search: None,
            is_stdin: false,
        }
    }

    /// The path the ancestor search starts from, or `None` when no search
    /// should happen (stdin without an explicit search path).
    pub fn search_start(&self) -> Option<&Path> {
        match &self.path_for_config_search {
            Some(path) => Some(path),
            None if self.is_stdin => None,
            None => Some(&self.path),
        }
    }
}

/// Emitted by [`ConfigLoader::refresh`] for each watch whose resolution
/// differs from its remembered state.
#[derive(Debug, Clone)]
pub struct ConfigurationChange {
    /// The input path of the affected watch.
    pub watched_path: PathBuf,
    pub token: WatchToken,
    /// `None` iff no config now applies (or resolution failed).
    pub config_file: Option<Arc<LoadedConfig>>,
    /// `Some` iff resolution failed.
    pub error: Option<LoadError>,
}

#[derive(Debug, Clone)]
enum ResolutionState {
    Ok(Arc<LoadedConfig>),
    None,
    Error(LoadError),
}

impl ResolutionState {
    /// Whether a refresh landing in `next` is a non-change. Entry identity
    /// covers both "same path, same bytes" (the cache preserved the `Arc`)
    /// and "same path, new bytes" (the cache installed a replacement).
    fn same_as(&self, next: &ResolutionState) -> bool {
        match (self, next) {
            (Self::Ok(a), Self::Ok(b)) => Arc::ptr_eq(a, b),
            (Self::None, Self::None) => true,
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Watch {
    input: FileToLint,
    token: WatchToken,
    state: ResolutionState,
}

pub struct ConfigLoader<F: ConfigFilesystem> {
    filesystem: F,
    cache: ConfigCache,
    watcher: Option<PlatformWatcher>,
    watches: Vec<Watch>,
}

impl<F: ConfigFilesystem> ConfigLoader<F> {
    /// A loader without change detection, for one-shot loads and for tests
    /// driving a fake filesystem.
    pub fn new(filesystem: F) -> Self {
        Self {
            filesystem,
            cache: ConfigCache::new(),
            watcher: None,
            watches: Vec::new(),
        }
    }

    /// A loader with a platform watcher armed. Watcher init failure is not
    /// fatal; it surfaces through [`ConfigLoader::take_watch_errors`].
    pub fn with_change_detection(filesystem: F) -> Self {
        let mut loader = Self::new(filesystem);
        loader.watcher = Some(PlatformWatcher::new());
        loader
    }

    /// One-shot resolution: no watch is registered.
    pub fn load_for_file(&mut self, file: &FileToLint) -> Result<Option<Arc<LoadedConfig>>> {
        let resolution = resolver::resolve(&self.filesystem, file);
        match resolution.outcome? {
            Some(path) => Ok(Some(self.cache.get_or_load(&self.filesystem, &path)?)),
            None => Ok(None),
        }
    }

    /// Resolve and register a watch. The watch is registered even when the
    /// initial load fails, so a later `refresh()` reports the recovery.
    pub fn watch_and_load_for_file(
        &mut self,
        file: FileToLint,
        token: WatchToken,
    ) -> Result<Option<Arc<LoadedConfig>>> {
        let state = self.resolve_and_load(&file);
        let result = match &state {
            ResolutionState::Ok(entry) => Ok(Some(entry.clone())),
            ResolutionState::None => Ok(None),
            ResolutionState::Error(error) => Err(error.clone()),
        };
        self.watches.push(Watch {
            input: file,
            token,
            state,
        });
        result
    }

    /// Direct mode: watch an explicitly named config file.
    pub fn watch_and_load_config_file(
        &mut self,
        config_path: &Path,
        token: WatchToken,
    ) -> Result<Arc<LoadedConfig>> {
        let file = FileToLint {
            path: config_path.to_path_buf(),
            config_file: Some(config_path.to_path_buf()),
            path_for_config_search: None,
            is_stdin: false,
        };
        let state = self.resolve_and_load(&file);
        let result = match &state {
            ResolutionState::Ok(entry) => Ok(entry.clone()),
            // Direct mode always resolves to a path or an error.
            ResolutionState::None => Err(LoadError::with_code(config_path, ErrorCode::not_found())),
            ResolutionState::Error(error) => Err(error.clone()),
        };
        self.watches.push(Watch {
            input: file,
            token,
            state,
        });
        result
    }

    /// Drop every watch whose input path equals `path`. Later filesystem
    /// mutations affecting only that path produce no change records.
    pub fn unwatch_file(&mut self, path: &Path) {
        self.watches.retain(|watch| watch.input.path != path);
    }

    pub fn unwatch_all_files(&mut self) {
        self.watches.clear();
    }

    /// Re-resolve every watch and report the differences.
    ///
    /// The dirty pulse is consumed; the result is a pure function of the
    /// registered watches and the filesystem state at scan time, so calling
    /// `refresh()` again with no intervening mutation returns nothing.
    pub fn refresh(&mut self) -> Vec<ConfigurationChange> {
        if let Some(watcher) = &mut self.watcher {
            watcher.take_dirty();
            watcher.begin_rescan();
        }

        // One re-read per canonical path per pass, so every watch on a
        // modified config sees the same replacement entry.
        let mut refreshed: HashMap<CanonicalPath, std::result::Result<Arc<LoadedConfig>, LoadError>> =
            HashMap::new();
        let mut changes = Vec::new();

        for index in 0..self.watches.len() {
            let input = self.watches[index].input.clone();
            let resolution = resolver::resolve(&self.filesystem, &input);
            self.arm(&resolution.visited_directories);

            let next_state = match resolution.outcome {
                Ok(Some(path)) => {
                    let cache = &mut self.cache;
                    let filesystem = &self.filesystem;
                    let outcome = refreshed.entry(path.clone()).or_insert_with(|| {
                        match cache.refresh_entry(filesystem, &path) {
                            RefreshOutcome::Unchanged(entry) | RefreshOutcome::Updated(entry) => {
                                Ok(entry)
                            }
                            RefreshOutcome::Failed(error) => Err(error),
                        }
                    });
                    match outcome {
                        Ok(entry) => ResolutionState::Ok(entry.clone()),
                        Err(error) => ResolutionState::Error(error.clone()),
                    }
                }
                Ok(None) => ResolutionState::None,
                Err(error) => ResolutionState::Error(error),
            };

            let watch = &mut self.watches[index];
            if !watch.state.same_as(&next_state) {
                changes.push(change_record(watch, &next_state));
            }
            watch.state = next_state;
        }

        tracing::debug!(changes = changes.len(), watches = self.watches.len(), "refresh complete");
        changes
    }

    /// True when the watcher observed a mutation since the last `refresh()`.
    /// Advisory: `refresh()` rescans whether or not a pulse arrived.
    pub fn poll_changes_detected(&mut self) -> bool {
        match &mut self.watcher {
            Some(watcher) => watcher.poll_dirty(),
            None => false,
        }
    }

    /// Drain out-of-band watch errors. Watch failures never abort a load.
    pub fn take_watch_errors(&mut self) -> Vec<WatchError> {
        match &mut self.watcher {
            Some(watcher) => watcher.take_watch_errors(),
            None => Vec::new(),
        }
    }

    fn resolve_and_load(&mut self, file: &FileToLint) -> ResolutionState {
        let resolution = resolver::resolve(&self.filesystem, file);
        self.arm(&resolution.visited_directories);
        match resolution.outcome {
            Ok(Some(path)) => match self.cache.get_or_load(&self.filesystem, &path) {
                Ok(entry) => ResolutionState::Ok(entry),
                Err(error) => ResolutionState::Error(error),
            },
            Ok(None) => ResolutionState::None,
            Err(error) => ResolutionState::Error(error),
        }
    }

    fn arm(&mut self, directories: &[CanonicalPath]) {
        if let Some(watcher) = &mut self.watcher {
            for directory in directories {
                watcher.watch_directory(directory);
            }
        }
    }
}

fn change_record(watch: &Watch, state: &ResolutionState) -> ConfigurationChange {
    let (config_file, error) = match state {
        ResolutionState::Ok(entry) => (Some(entry.clone()), None),
        ResolutionState::None => (None, None),
        ResolutionState::Error(load_error) => (None, Some(load_error.clone())),
    };
    ConfigurationChange {
        watched_path: watch.input.path.clone(),
        token: watch.token,
        config_file,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FakeFilesystem;

    fn loader() -> (FakeFilesystem, ConfigLoader<FakeFilesystem>) {
        let fs = FakeFilesystem::new();
        (fs.clone(), ConfigLoader::new(fs))
    }

    #[test]
    fn file_with_no_config_gets_none() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");

        let loaded = loader
            .load_for_file(&FileToLint::for_path(fs.rooted("hello.js")))
            .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn finds_config_and_shares_entries() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("one.js"), "");
        fs.create_file(fs.rooted("two.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        let one = loader
            .load_for_file(&FileToLint::for_path(fs.rooted("one.js")))
            .unwrap()
            .unwrap();
        let two = loader
            .load_for_file(&FileToLint::for_path(fs.rooted("two.js")))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&one, &two));
        assert_eq!(one.config_path().as_path(), fs.rooted("quick-lint-js.config"));
    }

    #[test]
    fn direct_and_searched_watches_share_one_entry() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        let direct = loader
            .watch_and_load_config_file(&fs.rooted("quick-lint-js.config"), 1)
            .unwrap();
        let searched = loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 2)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&direct, &searched));
    }

    #[test]
    fn config_found_initially_is_unchanged() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn rewriting_config_is_a_change() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(
            fs.rooted("quick-lint-js.config"),
            r#"{"globals": {"before": true}}"#,
        );

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();

        fs.create_file(
            fs.rooted("quick-lint-js.config"),
            r#"{"globals": {"after": true}}"#,
        );
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].watched_path, fs.rooted("hello.js"));
        let entry = changes[0].config_file.as_ref().unwrap();
        assert!(entry.config().global("after").is_some());
        assert!(entry.config().global("before").is_none());

        // A second refresh with no further mutation is quiet.
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn rewriting_config_back_to_original_keeps_config() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();

        // Net no-op between refreshes: same bytes, no change record.
        fs.create_file(fs.rooted("quick-lint-js.config"), r#"{"globals": {}}"#);
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn moving_config_file_away_and_back_keeps_config() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();

        fs.rename(
            fs.rooted("quick-lint-js.config"),
            fs.rooted("temp.config"),
        );
        fs.rename(
            fs.rooted("temp.config"),
            fs.rooted("quick-lint-js.config"),
        );
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn creating_shadowing_config_changes_only_the_inner_watch() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("dir/hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 1)
            .unwrap();
        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("dir/hello.js")), 2)
            .unwrap();

        fs.create_file(fs.rooted("dir/quick-lint-js.config"), "{}");
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].watched_path, fs.rooted("dir/hello.js"));
        assert_eq!(changes[0].token, 2);
        assert_eq!(
            changes[0]
                .config_file
                .as_ref()
                .unwrap()
                .config_path()
                .as_path(),
            fs.rooted("dir/quick-lint-js.config")
        );
    }

    #[test]
    fn duplicate_config_above_the_resolved_one_is_not_a_change() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("dir/hello.js"), "");
        fs.create_file(fs.rooted("dir/quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("dir/hello.js")), 0)
            .unwrap();

        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn deleting_config_is_a_change_to_none() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();

        fs.remove_file(fs.rooted("quick-lint-js.config"));
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].config_file.is_none());
        assert!(changes[0].error.is_none());
    }

    #[test]
    fn creating_config_is_a_change_from_none() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");

        let loaded = loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();
        assert!(loaded.is_none());

        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].config_file.is_some());
    }

    #[test]
    fn moving_directory_away_loses_the_config() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("olddir/hello.js"), "");
        fs.create_file(fs.rooted("olddir/quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("olddir/hello.js")), 0)
            .unwrap();

        fs.rename(fs.rooted("olddir"), fs.rooted("newdir"));
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].watched_path, fs.rooted("olddir/hello.js"));
        assert!(changes[0].config_file.is_none());
        assert!(changes[0].error.is_none());
    }

    #[test]
    fn read_error_and_recovery_are_two_changes() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();

        let denied = ErrorCode::from_io_error(&std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        ));
        fs.set_read_error(fs.rooted("quick-lint-js.config"), Some(denied));
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].config_file.is_none());
        let error = changes[0].error.as_ref().unwrap();
        assert!(error.code.is_permission_denied());

        // Same error again: no new change.
        assert!(loader.refresh().is_empty());

        fs.set_read_error(fs.rooted("quick-lint-js.config"), None);
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].error.is_none());
        assert!(changes[0].config_file.is_some());
    }

    #[test]
    fn failed_initial_load_recovers_on_refresh() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_directory(fs.rooted("quick-lint-js.config"));

        let result =
            loader.watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0);
        let error = result.unwrap_err();
        assert_eq!(error.code, ErrorCode::not_regular_file());

        fs.remove_directory(fs.rooted("quick-lint-js.config"));
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].config_file.is_some());
        assert!(changes[0].error.is_none());
    }

    #[test]
    fn syntax_error_degrades_to_default_config() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();

        fs.create_file(fs.rooted("quick-lint-js.config"), "{\\}");
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        let entry = changes[0].config_file.as_ref().unwrap();
        assert!(entry.is_degraded());
        assert!(entry.config().global("console").is_some());
    }

    #[test]
    fn multiple_watches_on_one_config_each_get_a_change() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_config_file(&fs.rooted("quick-lint-js.config"), 1)
            .unwrap();
        loader
            .watch_and_load_config_file(&fs.rooted("quick-lint-js.config"), 2)
            .unwrap();

        fs.create_file(
            fs.rooted("quick-lint-js.config"),
            r#"{"global-groups": false}"#,
        );
        let changes = loader.refresh();
        assert_eq!(changes.len(), 2);
        let mut tokens: Vec<WatchToken> = changes.iter().map(|change| change.token).collect();
        tokens.sort_unstable();
        assert_eq!(tokens, vec![1, 2]);
        // Both records reference the same cache entry.
        assert!(Arc::ptr_eq(
            changes[0].config_file.as_ref().unwrap(),
            changes[1].config_file.as_ref().unwrap()
        ));
    }

    #[test]
    fn deleting_parent_of_missing_file_is_not_a_change() {
        let (fs, mut loader) = loader();
        fs.create_directory(fs.rooted("dir"));

        let loaded = loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("dir/hello.js")), 0)
            .unwrap();
        assert!(loaded.is_none());

        fs.remove_directory(fs.rooted("dir"));
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn unwatched_file_is_inert() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("hello.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("hello.js")), 0)
            .unwrap();
        loader.unwatch_file(&fs.rooted("hello.js"));

        fs.remove_file(fs.rooted("quick-lint-js.config"));
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn unwatch_all_files_clears_every_watch() {
        let (fs, mut loader) = loader();
        fs.create_file(fs.rooted("one.js"), "");
        fs.create_file(fs.rooted("two.js"), "");
        fs.create_file(fs.rooted("quick-lint-js.config"), "{}");

        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("one.js")), 1)
            .unwrap();
        loader
            .watch_and_load_for_file(FileToLint::for_path(fs.rooted("two.js")), 2)
            .unwrap();
        loader.unwatch_all_files();

        fs.remove_file(fs.rooted("quick-lint-js.config"));
        assert!(loader.refresh().is_empty());
    }

    #[test]
    fn loader_without_watcher_reports_no_pulses_or_errors() {
        let (_fs, mut loader) = loader();
        assert!(!loader.poll_changes_detected());
        assert!(loader.take_watch_errors().is_empty());
    }

    #[test]
    fn direct_mode_missing_config_fails_with_not_found() {
        let (fs, mut loader) = loader();

        let error = loader
            .watch_and_load_config_file(&fs.rooted("config.json"), 0)
            .unwrap_err();
        assert_eq!(error.path, fs.rooted("config.json"));
        assert!(error.code.is_not_found());

        // Creating the file afterwards is a change on the existing watch.
        fs.create_file(fs.rooted("config.json"), "{}");
        let changes = loader.refresh();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].config_file.is_some());
    }
}
