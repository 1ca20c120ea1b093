//! HTTP(S) download gatherer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::Gatherer;
use crate::config::GatherConfig;
use crate::context::GatherContext;
use crate::fs::{blocking, ensure_parent, unique_temp_path};
use crate::metadata::{HttpMetadata, Metadata, scrub_credentials};

/// Build the client shared by the HTTP and OCI gatherers.
pub(crate) fn build_client(config: &GatherConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.http.timeout())
        .build()
        .context("Failed to build HTTP client")
}

/// Request URL for an `http::`/`http://`/`https://` source.
///
/// A forced `http::` prefix on a scheme-less location means HTTPS.
pub(crate) fn request_url(source: &str) -> anyhow::Result<url::Url> {
    let raw = source.trim();
    let raw = raw.strip_prefix("http::").unwrap_or(raw);
    let raw = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };
    url::Url::parse(&raw)
        .with_context(|| format!("Invalid HTTP source: {}", scrub_credentials(&raw)))
}

/// Where the body lands: inside `destination` if it is a directory.
async fn target_path(url: &url::Url, destination: &Path) -> PathBuf {
    let is_dir = tokio::fs::metadata(destination)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return destination.to_path_buf();
    }
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("index");
    destination.join(name)
}

/// Create the parent of `target` and pick a sibling to stream into.
async fn staging_path(target: &Path) -> anyhow::Result<PathBuf> {
    let target = target.to_path_buf();
    blocking(move || {
        ensure_parent(&target)?;
        unique_temp_path(&target)
    })
    .await
}

async fn discard(staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %staging.display(),
            error = %e,
            "failed to remove partial download"
        ),
    }
}

struct Downloaded {
    status: u16,
    written: u64,
    headers: BTreeMap<String, Vec<String>>,
}

/// Downloads a single HTTP resource to the destination.
#[derive(Debug, Clone)]
pub struct HttpGatherer {
    client: reqwest::Client,
}

impl HttpGatherer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: url::Url, target: &Path) -> anyhow::Result<Downloaded> {
        let display = scrub_credentials(url.as_str());
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", display))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download: HTTP {} from {}", response.status(), display);
        }

        let status = response.status().as_u16();
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let mut file = tokio::fs::File::create(target)
            .await
            .with_context(|| format!("Failed to create {}", target.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to read response body from {}", display))?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
            written += chunk.len() as u64;
        }
        file.sync_all()
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        Ok(Downloaded {
            status,
            written,
            headers,
        })
    }
}

#[async_trait]
impl Gatherer for HttpGatherer {
    async fn gather(
        &self,
        ctx: &GatherContext,
        source: &str,
        destination: &Path,
    ) -> anyhow::Result<Metadata> {
        let url = request_url(source)?;
        let target = target_path(&url, destination).await;
        let staging = staging_path(&target).await?;
        tracing::debug!(
            url = %scrub_credentials(url.as_str()),
            target = %target.display(),
            "downloading"
        );

        // The body only replaces the target once it has fully arrived.
        let downloaded = match ctx.run_anyhow(self.download(url, &staging)).await {
            Ok(downloaded) => downloaded,
            Err(err) => {
                discard(&staging).await;
                return Err(err);
            }
        };
        if let Err(err) = tokio::fs::rename(&staging, &target).await {
            discard(&staging).await;
            return Err(err)
                .with_context(|| format!("Failed to move download to {}", target.display()));
        }

        Ok(Metadata::Http(HttpMetadata {
            url: source.to_string(),
            status_code: downloaded.status,
            content_length: downloaded.written,
            destination: target,
            headers: downloaded.headers,
        }))
    }
}
