//! Filesystem abstraction for configuration loading
//!
//! The loader consumes a narrow read/stat/canonicalize surface so tests can
//! drive it with an in-memory tree. [`OsFilesystem`] is the production
//! implementation; [`FakeFilesystem`] is a first-class value for tests, not
//! process-wide state.

use crate::canonical::{CanonicalPath, CanonicalizeResult, normalize_lexically, push_lexical};
use crate::error::{ErrorCode, LoadError};
use crate::result::Result;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

/// What a path points at, after following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Other,
}

/// The filesystem operations the loader consumes.
pub trait ConfigFilesystem {
    /// Canonicalize a possibly relative, possibly partially-missing path.
    /// Fails only on permission or I/O errors; a missing suffix is not an
    /// error.
    fn canonicalize(&self, path: &Path) -> Result<CanonicalizeResult>;

    /// Read a file's raw bytes. Reading a directory fails with the
    /// platform's not-a-regular-file code.
    fn read_file(&self, path: &CanonicalPath) -> Result<Vec<u8>>;

    /// Stat a path. `Ok(None)` means the path does not exist.
    fn file_kind(&self, path: &Path) -> Result<Option<FileKind>>;

    fn directory_exists(&self, path: &CanonicalPath) -> bool;
}

/// The real operating-system filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFilesystem;

impl OsFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigFilesystem for OsFilesystem {
    fn canonicalize(&self, path: &Path) -> Result<CanonicalizeResult> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            let cwd = std::env::current_dir()
                .map_err(|e| LoadError::while_canonicalizing(path, path, &e))?;
            cwd.join(path)
        };
        canonicalize_absolute(&absolute)
            .map_err(|(failed, error)| LoadError::while_canonicalizing(failed, path, &error))
    }

    fn read_file(&self, path: &CanonicalPath) -> Result<Vec<u8>> {
        // Stat first so that opening a directory reports the same code on
        // every platform.
        match fs::metadata(path.as_path()) {
            Ok(metadata) if metadata.is_dir() => {
                return Err(LoadError::with_code(
                    path.as_path(),
                    ErrorCode::not_regular_file(),
                ));
            }
            Ok(_) => {}
            Err(error) => return Err(LoadError::from_io(path.as_path(), &error)),
        }
        fs::read(path.as_path()).map_err(|error| LoadError::from_io(path.as_path(), &error))
    }

    fn file_kind(&self, path: &Path) -> Result<Option<FileKind>> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => Ok(Some(FileKind::File)),
            Ok(metadata) if metadata.is_dir() => Ok(Some(FileKind::Directory)),
            Ok(_) => Ok(Some(FileKind::Other)),
            Err(error) if is_missing(&error) => Ok(None),
            Err(error) => Err(LoadError::from_io(path, &error)),
        }
    }

    fn directory_exists(&self, path: &CanonicalPath) -> bool {
        fs::metadata(path.as_path())
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }
}

fn is_missing(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Canonicalize an absolute path, tolerating a missing tail.
///
/// The longest existing prefix is resolved by the OS (which handles `..`
/// across symlinks correctly); the remaining components are folded on
/// lexically. When folding lands back on an existing path (a `..` popping
/// into the existing region, or a symlink that only became visible after
/// folding) the result is re-resolved, bounded to a few passes.
fn canonicalize_absolute(
    absolute: &Path,
) -> std::result::Result<CanonicalizeResult, (PathBuf, io::Error)> {
    const MAX_PASSES: usize = 8;

    let mut current = absolute.to_path_buf();
    for _ in 0..MAX_PASSES {
        let components: Vec<Component<'_>> = current.components().collect();

        let mut split = components.len();
        let mut base: Option<PathBuf> = None;
        while split > 0 {
            let prefix: PathBuf = components[..split].iter().collect();
            match fs::canonicalize(&prefix) {
                Ok(resolved) => {
                    base = Some(resolved);
                    break;
                }
                Err(error) if is_missing(&error) => split -= 1,
                Err(error) => return Err((prefix, error)),
            }
        }
        let Some(mut resolved) = base else {
            let error = io::Error::from(io::ErrorKind::NotFound);
            return Err((current, error));
        };

        if split == components.len() {
            let existing_components = resolved.components().count();
            return Ok(CanonicalizeResult {
                canonical: CanonicalPath::new_unchecked(resolved),
                existing_components,
            });
        }

        for component in &components[split..] {
            push_lexical(&mut resolved, *component);
        }
        if resolved != current && fs::symlink_metadata(&resolved).is_ok() {
            current = resolved;
            continue;
        }

        let existing_components = count_existing_components(&resolved);
        return Ok(CanonicalizeResult {
            canonical: CanonicalPath::new_unchecked(resolved),
            existing_components,
        });
    }

    let existing_components = count_existing_components(&current);
    Ok(CanonicalizeResult {
        canonical: CanonicalPath::new_unchecked(current),
        existing_components,
    })
}

fn count_existing_components(path: &Path) -> usize {
    for ancestor in path.ancestors() {
        if fs::symlink_metadata(ancestor).is_ok() {
            return ancestor.components().count();
        }
    }
    0
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FakeNode {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug, Default)]
struct FakeState {
    nodes: BTreeMap<PathBuf, FakeNode>,
    read_errors: HashMap<PathBuf, ErrorCode>,
}

/// In-memory filesystem for tests.
///
/// Stores a directory tree keyed by logical absolute path under a fixed
/// root. There are no symlinks, so canonicalization is purely lexical.
/// Clones share the same tree, letting a test mutate the filesystem while
/// a loader owns another handle.
#[derive(Debug, Clone)]
pub struct FakeFilesystem {
    state: Rc<RefCell<FakeState>>,
}

impl FakeFilesystem {
    pub const ROOT: &'static str = "/fake-root";

    pub fn new() -> Self {
        let mut state = FakeState::default();
        state.nodes.insert(PathBuf::from("/"), FakeNode::Directory);
        state
            .nodes
            .insert(PathBuf::from(Self::ROOT), FakeNode::Directory);
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// A path under the fake root: `rooted("dir/hello.js")`.
    pub fn rooted(&self, relative: &str) -> PathBuf {
        Path::new(Self::ROOT).join(relative)
    }

    /// Create or overwrite a file, creating missing parent directories.
    pub fn create_file(&self, path: impl AsRef<Path>, bytes: impl Into<Vec<u8>>) {
        let path = self.normalize(path.as_ref());
        let mut state = self.state.borrow_mut();
        Self::create_ancestors(&mut state, &path);
        state.nodes.insert(path, FakeNode::File(bytes.into()));
    }

    /// Create a directory, creating missing parents.
    pub fn create_directory(&self, path: impl AsRef<Path>) {
        let path = self.normalize(path.as_ref());
        let mut state = self.state.borrow_mut();
        Self::create_ancestors(&mut state, &path);
        state.nodes.insert(path, FakeNode::Directory);
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let path = self.normalize(path.as_ref());
        self.state.borrow_mut().nodes.remove(&path);
    }

    /// Remove a directory and everything beneath it.
    pub fn remove_directory(&self, path: impl AsRef<Path>) {
        let path = self.normalize(path.as_ref());
        self.state
            .borrow_mut()
            .nodes
            .retain(|node_path, _| !node_path.starts_with(&path));
    }

    /// Rename a file or directory subtree.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) {
        let from = self.normalize(from.as_ref());
        let to = self.normalize(to.as_ref());
        let mut state = self.state.borrow_mut();
        let moved: Vec<(PathBuf, FakeNode)> = state
            .nodes
            .iter()
            .filter_map(|(node_path, node)| {
                let suffix = node_path.strip_prefix(&from).ok()?;
                Some((to.join(suffix), node.clone()))
            })
            .collect();
        state.nodes.retain(|node_path, _| !node_path.starts_with(&from));
        Self::create_ancestors(&mut state, &to);
        state.nodes.extend(moved);
    }

    /// Make reads of `path` fail with `code`, or succeed again with `None`.
    /// Models permission flips without real permissions.
    pub fn set_read_error(&self, path: impl AsRef<Path>, code: Option<ErrorCode>) {
        let path = self.normalize(path.as_ref());
        let mut state = self.state.borrow_mut();
        match code {
            Some(code) => {
                state.read_errors.insert(path, code);
            }
            None => {
                state.read_errors.remove(&path);
            }
        }
    }

    fn create_ancestors(state: &mut FakeState, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            state
                .nodes
                .entry(ancestor.to_path_buf())
                .or_insert(FakeNode::Directory);
        }
    }

    fn normalize(&self, path: &Path) -> PathBuf {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(Self::ROOT).join(path)
        };
        normalize_lexically(&absolute)
    }
}

impl Default for FakeFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFilesystem for FakeFilesystem {
    fn canonicalize(&self, path: &Path) -> Result<CanonicalizeResult> {
        let normalized = self.normalize(path);
        let state = self.state.borrow();
        let mut existing_components = 0;
        let mut prefix = PathBuf::new();
        for component in normalized.components() {
            prefix.push(component);
            if state.nodes.contains_key(&prefix) {
                existing_components += 1;
            } else {
                break;
            }
        }
        Ok(CanonicalizeResult {
            canonical: CanonicalPath::new_unchecked(normalized),
            existing_components,
        })
    }

    fn read_file(&self, path: &CanonicalPath) -> Result<Vec<u8>> {
        let normalized = self.normalize(path.as_path());
        let state = self.state.borrow();
        if let Some(code) = state.read_errors.get(&normalized) {
            return Err(LoadError::with_code(normalized, *code));
        }
        match state.nodes.get(&normalized) {
            Some(FakeNode::File(bytes)) => Ok(bytes.clone()),
            Some(FakeNode::Directory) => Err(LoadError::with_code(
                normalized,
                ErrorCode::not_regular_file(),
            )),
            None => Err(LoadError::with_code(normalized, ErrorCode::not_found())),
        }
    }

    fn file_kind(&self, path: &Path) -> Result<Option<FileKind>> {
        let normalized = self.normalize(path);
        let state = self.state.borrow();
        Ok(state.nodes.get(&normalized).map(|node| match node {
            FakeNode::File(_) => FileKind::File,
            FakeNode::Directory => FileKind::Directory,
        }))
    }

    fn directory_exists(&self, path: &CanonicalPath) -> bool {
        let normalized = self.normalize(path.as_path());
        matches!(
            self.state.borrow().nodes.get(&normalized),
            Some(FakeNode::Directory)
        )
    }
}
