//! Git gatherer: clones a repository, checks out a reference and records
//! the resulting commit.

mod source;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use super::Gatherer;
use crate::context::GatherContext;
use crate::fs::{blocking, copy_tree_filtered, ensure_parent, remove_path};
use crate::metadata::{GitMetadata, Metadata};

pub use source::GitSource;

/// Clones git repositories by driving the `git` binary.
#[derive(Debug)]
pub struct GitGatherer {
    binary: PathBuf,
}

impl Default for GitGatherer {
    fn default() -> Self {
        Self::new(PathBuf::from("git"))
    }
}

impl GitGatherer {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Clone `parsed` into `checkout` and return the checked-out commit.
    async fn checkout(
        &self,
        ctx: &GatherContext,
        parsed: &GitSource,
        checkout: &Path,
    ) -> anyhow::Result<String> {
        let checkout_str = checkout
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid checkout dir: {}", checkout.display()))?;

        let mut clone_args = vec!["clone".to_string(), "--quiet".to_string()];
        if let (Some(depth), None) = (parsed.depth, &parsed.reference) {
            clone_args.push(format!("--depth={}", depth));
        }
        clone_args.extend([
            "--".to_string(),
            parsed.repo_url.clone(),
            checkout_str.to_string(),
        ]);
        let clone_args: Vec<&str> = clone_args.iter().map(String::as_str).collect();
        self.run_git(ctx, None, &clone_args).await?;

        if let Some(reference) = &parsed.reference {
            let direct = self
                .run_git(
                    ctx,
                    Some(checkout),
                    &[
                        "checkout",
                        "--quiet",
                        "--detach",
                        "--end-of-options",
                        reference.as_str(),
                    ],
                )
                .await;
            if let Err(err) = direct {
                if ctx.check().is_err() {
                    return Err(err);
                }
                tracing::debug!(reference = %reference, "reference not found locally, fetching");
                self.run_git(
                    ctx,
                    Some(checkout),
                    &["fetch", "--quiet", "--end-of-options", "origin", reference.as_str()],
                )
                .await
                .with_context(|| format!("Failed to resolve git reference {:?}", reference))?;
                self.run_git(
                    ctx,
                    Some(checkout),
                    &["checkout", "--quiet", "--detach", "FETCH_HEAD"],
                )
                .await?;
            }
        }

        let repo_dir = checkout.to_path_buf();
        let task = tokio::task::spawn_blocking(move || head_commit(&repo_dir));
        ctx.run_anyhow(async { task.await.context("Reading HEAD failed")? })
            .await
    }

    /// Run a git command.
    async fn run_git(
        &self,
        ctx: &GatherContext,
        cwd: Option<&Path>,
        args: &[&str],
    ) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = ctx
            .run_anyhow(async {
                cmd.output()
                    .await
                    .with_context(|| format!("Failed to run git {:?}", args))
            })
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Git command failed {:?}: {}", args, stderr.trim());
        }
        Ok(())
    }
}

/// Full id of the commit HEAD points at.
fn head_commit(repo_dir: &Path) -> anyhow::Result<String> {
    let repo = git2::Repository::open(repo_dir)
        .with_context(|| format!("Failed to open repository: {}", repo_dir.display()))?;
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .context("Repository HEAD does not point at a commit")?;
    Ok(commit.id().to_string())
}

/// Sibling scratch directory used when only a subdirectory is wanted.
fn scratch_dir(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkout".to_string());
    destination.with_file_name(format!(".{}.{}.clone", name, std::process::id()))
}

#[async_trait]
impl Gatherer for GitGatherer {
    async fn gather(
        &self,
        ctx: &GatherContext,
        source: &str,
        destination: &Path,
    ) -> anyhow::Result<Metadata> {
        let parsed = GitSource::parse(source)?;
        tracing::debug!(
            repo = %crate::metadata::scrub_credentials(&parsed.repo_url),
            reference = ?parsed.reference,
            subdir = ?parsed.subdir,
            "cloning git repository"
        );

        let dest = destination.to_path_buf();
        blocking(move || {
            remove_path(&dest)?;
            ensure_parent(&dest)
        })
        .await?;

        let latest_commit = match &parsed.subdir {
            None => self.checkout(ctx, &parsed, destination).await?,
            Some(subdir) => {
                let scratch = scratch_dir(destination);
                let stale = scratch.clone();
                blocking(move || remove_path(&stale)).await?;
                let result = async {
                    let commit = self.checkout(ctx, &parsed, &scratch).await?;
                    let src_root = scratch.join(subdir);
                    let dest = destination.to_path_buf();
                    let subdir = subdir.clone();
                    blocking(move || {
                        if !src_root.is_dir() {
                            anyhow::bail!(
                                "Git checkout did not create expected path: {}",
                                subdir
                            );
                        }
                        copy_tree_filtered(&src_root, &dest)
                    })
                    .await?;
                    Ok::<_, anyhow::Error>(commit)
                }
                .await;
                if let Err(err) = blocking(move || remove_path(&scratch)).await {
                    tracing::warn!(error = %err, "failed to remove git scratch directory");
                }
                result?
            }
        };

        Ok(Metadata::Git(GitMetadata::new(source, latest_commit)))
    }
}
