//! Filesystem primitives shared by the gatherers.

pub mod tree_hash;

use std::path::{Path, PathBuf};

use anyhow::Context;

pub use tree_hash::{hash_path, hash_tree};

/// Copy a directory tree, excluding `.git` directories.
///
/// Symlinks and other special entries are refused rather than followed.
/// Returns the number of bytes copied.
pub fn copy_tree_filtered(src: &Path, dst: &Path) -> anyhow::Result<u64> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    let mut copied = 0;
    for entry in std::fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry =
            entry.with_context(|| format!("Failed to read dir entry: {}", src.display()))?;
        let file_name = entry.file_name();
        if file_name == ".git" {
            continue;
        }
        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat dir entry: {}", entry.path().display()))?;
        let src_path = entry.path();
        let dst_path = dst.join(&file_name);

        if ty.is_dir() {
            copied += copy_tree_filtered(&src_path, &dst_path)?;
        } else if ty.is_file() {
            copied += std::fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        } else {
            anyhow::bail!("Unsupported filesystem entry type at {}", src_path.display());
        }
    }
    Ok(copied)
}

/// Remove a file, symlink or directory tree if it exists.
///
/// A symlink is removed itself; its target is left alone.
pub fn remove_path(path: &Path) -> anyhow::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read metadata: {}", path.display()));
        }
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// A sibling of `path` that does not exist yet, for staging a write.
pub fn unique_temp_path(path: &Path) -> anyhow::Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Destination path has no parent: {}", path.display()))?;
    let base = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Destination path has no filename: {}", path.display()))?;

    for attempt in 0u32..1000 {
        let name = if attempt == 0 {
            format!(".{}.tmp.{}", base.to_string_lossy(), std::process::id())
        } else {
            format!(
                ".{}.tmp.{}.{}",
                base.to_string_lossy(),
                std::process::id(),
                attempt
            )
        };
        let candidate = parent.join(name);
        if std::fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }

    anyhow::bail!("Failed to allocate a unique temp path for {}", path.display());
}

/// Run filesystem work off the async executor.
pub async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("Filesystem task failed")?
}

/// Create the parent directory of `path`, if it has one.
pub fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
