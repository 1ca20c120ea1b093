//! Gatherers and the protocol dispatch registry.
//!
//! One [`Gatherer`] per [`Protocol`] moves bytes from a resolved source to a
//! local destination and returns [`Metadata`] describing what it fetched.

mod cluster;
mod file;
mod git;
mod http;
mod oci;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::classify::Protocol;
use crate::cluster::ClusterClient;
use crate::config::GatherConfig;
use crate::context::GatherContext;
use crate::error::{GatherError, Result};
use crate::metadata::Metadata;

pub use cluster::ClusterGatherer;
pub use file::FileGatherer;
pub use git::{GitGatherer, GitSource};
pub use http::HttpGatherer;
pub use oci::{OciGatherer, OciReference};

/// Fetch capability for one protocol.
///
/// Implementations create or overwrite `destination` and must honour `ctx`.
/// Metadata is returned fully populated; a field that could not be
/// determined is left empty so that pinning fails rather than silently
/// producing an unpinned reference.
#[async_trait]
pub trait Gatherer: Send + Sync {
    async fn gather(
        &self,
        ctx: &GatherContext,
        source: &str,
        destination: &Path,
    ) -> anyhow::Result<Metadata>;
}

/// Protocol-to-gatherer mapping, built once during startup and read-only after.
#[derive(Default, Clone)]
pub struct GathererRegistry {
    gatherers: BTreeMap<Protocol, Arc<dyn Gatherer>>,
}

impl fmt::Debug for GathererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GathererRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

impl GathererRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with a gatherer for every protocol.
    pub fn with_default_gatherers(
        config: &GatherConfig,
        cluster: Arc<dyn ClusterClient>,
    ) -> Result<Self> {
        let client = http::build_client(config).map_err(|source| GatherError::Gatherer {
            protocol: Protocol::Http,
            source,
        })?;

        let mut registry = Self::new();
        registry.register(Protocol::File, Arc::new(FileGatherer::new()))?;
        registry.register(
            Protocol::Git,
            Arc::new(GitGatherer::new(config.git.binary.clone())),
        )?;
        registry.register(Protocol::Http, Arc::new(HttpGatherer::new(client.clone())))?;
        registry.register(Protocol::Oci, Arc::new(OciGatherer::new(client)))?;
        registry.register(Protocol::Cluster, Arc::new(ClusterGatherer::new(cluster)))?;
        Ok(registry)
    }

    /// Register the gatherer for `protocol`. Fails if one is already registered.
    pub fn register(&mut self, protocol: Protocol, gatherer: Arc<dyn Gatherer>) -> Result<()> {
        if self.gatherers.contains_key(&protocol) {
            return Err(GatherError::DuplicateGatherer { protocol });
        }
        self.gatherers.insert(protocol, gatherer);
        Ok(())
    }

    pub fn get(&self, protocol: Protocol) -> Option<&Arc<dyn Gatherer>> {
        self.gatherers.get(&protocol)
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.gatherers.keys().copied().collect()
    }

    /// Protocols the classifier can produce that have no gatherer.
    pub fn missing_protocols(&self) -> Vec<Protocol> {
        Protocol::ALL
            .into_iter()
            .filter(|p| !self.gatherers.contains_key(p))
            .collect()
    }

    /// Delegate to the gatherer registered for `protocol`.
    ///
    /// The result is returned as-is; only a collaborator error is wrapped to
    /// name the protocol.
    pub async fn gather(
        &self,
        ctx: &GatherContext,
        protocol: Protocol,
        source: &str,
        destination: &Path,
    ) -> Result<Metadata> {
        let gatherer = self
            .get(protocol)
            .ok_or(GatherError::NoGatherer { protocol })?;
        gatherer
            .gather(ctx, source, destination)
            .await
            .map_err(|source| unwrap_cancellation(source).unwrap_or_else(|source| {
                GatherError::Gatherer { protocol, source }
            }))
    }
}

/// Surface a cancellation raised inside a collaborator as the core error.
fn unwrap_cancellation(err: anyhow::Error) -> std::result::Result<GatherError, anyhow::Error> {
    match err.downcast::<GatherError>() {
        Ok(inner) if inner.is_cancellation() => Ok(inner),
        Ok(inner) => Err(inner.into()),
        Err(err) => Err(err),
    }
}
