//! Local filesystem gatherer.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Gatherer;
use crate::context::GatherContext;
use crate::fs::{copy_tree_filtered, ensure_parent, hash_path};
use crate::metadata::{FileMetadata, Metadata, strip_prefixes};

/// Copies a local file or directory tree to the destination.
#[derive(Debug, Default)]
pub struct FileGatherer;

impl FileGatherer {
    pub fn new() -> Self {
        Self
    }
}

/// Turn a `file::`/`file://`/`~/` source into a filesystem path.
pub(crate) fn source_path(source: &str) -> anyhow::Result<PathBuf> {
    let raw = strip_prefixes(source.trim(), &["file::", "file://"]);
    if raw.is_empty() {
        anyhow::bail!("Empty file source");
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(raw))
}

fn copy_source(source: &str, src: &Path, destination: &Path) -> anyhow::Result<FileMetadata> {
    let meta = std::fs::metadata(src)
        .with_context(|| format!("Source path does not exist: {}", src.display()))?;
    let timestamp = meta.modified().ok().map(DateTime::<Utc>::from);

    let (target, size) = if meta.is_dir() {
        let size = copy_tree_filtered(src, destination)?;
        (destination.to_path_buf(), size)
    } else {
        let target = if destination.is_dir() {
            let name = src
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Source has no file name: {}", src.display()))?;
            destination.join(name)
        } else {
            ensure_parent(destination)?;
            destination.to_path_buf()
        };
        let size = std::fs::copy(src, &target).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), target.display())
        })?;
        (target, size)
    };

    let tree_hash = hash_path(&target)?;
    Ok(FileMetadata {
        url: source.to_string(),
        path: target,
        size,
        timestamp,
        tree_hash,
    })
}

#[async_trait]
impl Gatherer for FileGatherer {
    async fn gather(
        &self,
        ctx: &GatherContext,
        source: &str,
        destination: &Path,
    ) -> anyhow::Result<Metadata> {
        let src = source_path(source)?;
        let source = source.to_string();
        let destination = destination.to_path_buf();

        let task = tokio::task::spawn_blocking(move || copy_source(&source, &src, &destination));
        let metadata = ctx
            .run_anyhow(async { task.await.context("File copy task failed")? })
            .await?;
        Ok(Metadata::File(metadata))
    }
}
