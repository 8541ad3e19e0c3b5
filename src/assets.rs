//! Static asset copying.
//!
//! Copies every file under `source` matching a glob pattern into
//! `destination`, keeping paths relative to `source`. A missing source
//! directory simply matches nothing.

use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use tracing::debug;

use crate::error::{Error, Result};

/// Copy files below `source` matching `pattern` (e.g. `**/*.conf`) into
/// `destination`, returning the number of files copied.
///
/// # Errors
///
/// Returns [`Error::FileSystem`] if the pattern is invalid or any copy fails.
pub async fn copy_matching(source: &Path, pattern: &str, destination: &Path) -> Result<usize> {
    let files = matching_files(source, pattern)?;

    let copies = files.iter().map(|file| async move {
        let relative = file.strip_prefix(source).unwrap_or(file);
        let target = destination.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::fs(format!("create {}", parent.display()), e))?;
        }
        tokio::fs::copy(file, &target)
            .await
            .map_err(|e| Error::fs(format!("copy {}", file.display()), e))
    });
    try_join_all(copies).await?;

    debug!(
        source = %source.display(),
        destination = %destination.display(),
        count = files.len(),
        "Copied assets"
    );
    Ok(files.len())
}

/// Regular files below `source` matching `pattern`, in glob order.
fn matching_files(source: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = source.join(pattern);
    let full = full.to_string_lossy();
    let paths = glob::glob(&full).map_err(|e| {
        Error::fs(
            format!("glob {full}"),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
        )
    })?;

    Ok(paths
        .filter_map(std::result::Result::ok)
        .filter(|p| p.is_file())
        .collect())
}
