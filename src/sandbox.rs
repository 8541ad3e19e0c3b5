//! Run-directory providers.
//!
//! An instance never creates its sandbox root itself; it asks a
//! [`RunDirectory`] for absolute paths. Two providers are included:
//!
//! - [`TempRunDirectory`] - a fresh temporary root, removed on drop
//! - [`FixedRunDirectory`] - caller-chosen run and fixture roots

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

/// Resolves sandbox-relative and fixture-relative paths for one instance.
pub trait RunDirectory: Send + Sync {
    /// Identifier used to select per-instance fixtures (`asterisk-<id>`).
    fn instance_id(&self) -> &str;

    /// Root of the instance sandbox.
    fn run_root(&self) -> &Path;

    /// Root of the test fixture tree.
    fn fixture_root(&self) -> &Path;

    /// Absolute path below the sandbox root.
    fn run_path(&self, segments: &[&str]) -> PathBuf {
        join_segments(self.run_root(), segments)
    }

    /// Absolute path below the fixture root.
    fn fixture_path(&self, segments: &[&str]) -> PathBuf {
        join_segments(self.fixture_root(), segments)
    }
}

/// Join path segments, skipping empty ones.
fn join_segments(root: &Path, segments: &[&str]) -> PathBuf {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// A sandbox rooted in a temporary directory.
///
/// The directory and everything the instance wrote into it is removed when
/// this value is dropped, unless [`TempRunDirectory::keep`] was called.
#[derive(Debug)]
pub struct TempRunDirectory {
    id: String,
    dir: Option<TempDir>,
    root: PathBuf,
    fixtures: PathBuf,
}

impl TempRunDirectory {
    /// Create a temporary sandbox for `id`, resolving fixtures from `fixtures`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileSystem`] if the temporary directory cannot be created.
    pub fn new(id: impl Into<String>, fixtures: impl Into<PathBuf>) -> Result<Self> {
        let id = id.into();
        let dir = tempfile::Builder::new()
            .prefix(&format!("asterisk-{id}-"))
            .tempdir()
            .map_err(|e| Error::fs("create temporary run directory", e))?;
        let root = dir.path().to_path_buf();

        Ok(Self {
            id,
            dir: Some(dir),
            root,
            fixtures: fixtures.into(),
        })
    }

    /// Persist the sandbox past drop, for postmortem inspection.
    pub fn keep(&mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            let _ = dir.keep();
        }
        self.root.clone()
    }
}

impl RunDirectory for TempRunDirectory {
    fn instance_id(&self) -> &str {
        &self.id
    }

    fn run_root(&self) -> &Path {
        &self.root
    }

    fn fixture_root(&self) -> &Path {
        &self.fixtures
    }
}

/// A sandbox at caller-chosen locations. Nothing is cleaned up.
#[derive(Debug, Clone)]
pub struct FixedRunDirectory {
    id: String,
    root: PathBuf,
    fixtures: PathBuf,
}

impl FixedRunDirectory {
    /// Create a provider for `id` with explicit run and fixture roots.
    pub fn new(
        id: impl Into<String>,
        root: impl Into<PathBuf>,
        fixtures: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            fixtures: fixtures.into(),
        }
    }
}

impl RunDirectory for FixedRunDirectory {
    fn instance_id(&self) -> &str {
        &self.id
    }

    fn run_root(&self) -> &Path {
        &self.root
    }

    fn fixture_root(&self) -> &Path {
        &self.fixtures
    }
}
