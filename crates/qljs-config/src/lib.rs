//! qljs-config
//!
//! Configuration loading with incremental, platform-native change detection
//! for a JavaScript linter. Editors and long-running linter processes keep,
//! for each file they watch, an up-to-date association to the nearest
//! applicable `quick-lint-js.config`, and learn promptly when that
//! association changes: the config's content mutates, a closer config
//! appears, an existing one disappears, or a directory in the search path
//! is renamed.
//!
//! The entry point is [`ConfigLoader`]:
//!
//! ```no_run
//! use qljs_config::{ConfigLoader, FileToLint, OsFilesystem};
//!
//! let mut loader = ConfigLoader::with_change_detection(OsFilesystem::new());
//! let loaded = loader
//!     .watch_and_load_for_file(FileToLint::for_path("src/app.js"), 0)
//!     .unwrap();
//!
//! // ... later, when the editor is idle or the watcher reports a pulse:
//! for change in loader.refresh() {
//!     eprintln!("configuration changed for {}", change.watched_path.display());
//! }
//! ```

pub mod cache;
pub mod canonical;
pub mod config;
pub mod error;
pub mod filesystem;
pub mod loader;
pub mod resolver;
pub mod result;
pub mod watcher;

// Re-export commonly used types
pub use cache::{ConfigCache, ContentHash, LoadedConfig, RefreshOutcome};
pub use canonical::{CanonicalPath, CanonicalizeResult};
pub use config::{Configuration, GlobalDeclaration};
pub use error::{ErrorCode, LoadError, WatchError};
pub use filesystem::{ConfigFilesystem, FakeFilesystem, FileKind, OsFilesystem};
pub use loader::{ConfigLoader, ConfigurationChange, FileToLint, WatchToken};
pub use resolver::{CONFIG_FILE_NAME, Resolution};
pub use result::Result;
pub use watcher::PlatformWatcher;

/// Initialize the tracing subscriber for logging
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qljs_config=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
