//! Resolve, classify and dispatch in one call.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::classify::{Protocol, classify};
use crate::cluster::KubeClient;
use crate::config::GatherConfig;
use crate::context::GatherContext;
use crate::error::{GatherError, Result};
use crate::gather::GathererRegistry;
use crate::metadata::{Metadata, scrub_credentials};
use crate::resolver::{ResolverRegistry, template};

const DEFAULT_MAX_INDIRECTIONS: usize = 8;

/// Terminal result of [`GatherService::gather_following`].
#[derive(Debug, Clone, Serialize)]
pub struct Gathered {
    pub metadata: Metadata,
    /// Every resolved source visited, starting with the caller's descriptor
    pub chain: Vec<String>,
}

/// Entry point combining the resolver and gatherer registries.
///
/// Both registries are shared read-only, so a service can be cloned into
/// concurrent tasks freely.
#[derive(Debug, Clone)]
pub struct GatherService {
    resolvers: Arc<ResolverRegistry>,
    gatherers: Arc<GathererRegistry>,
    max_indirections: usize,
}

impl GatherService {
    pub fn new(resolvers: Arc<ResolverRegistry>, gatherers: Arc<GathererRegistry>) -> Self {
        Self {
            resolvers,
            gatherers,
            max_indirections: DEFAULT_MAX_INDIRECTIONS,
        }
    }

    /// Build a service with the built-in resolvers and gatherers.
    pub fn from_config(config: &GatherConfig) -> Result<Self> {
        let cluster = Arc::new(KubeClient::new(
            config.cluster.clone(),
            config.user_agent.clone(),
            config.http.timeout(),
        ));
        let resolvers = ResolverRegistry::with_default_resolvers(cluster.clone())?;
        let gatherers = GathererRegistry::with_default_gatherers(config, cluster)?;
        Ok(Self::new(Arc::new(resolvers), Arc::new(gatherers))
            .with_max_indirections(config.max_indirections))
    }

    pub fn with_max_indirections(mut self, max_indirections: usize) -> Self {
        self.max_indirections = max_indirections;
        self
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }

    pub fn gatherers(&self) -> &GathererRegistry {
        &self.gatherers
    }

    /// Expand resolver macros in `descriptor`.
    pub async fn resolve(&self, ctx: &GatherContext, descriptor: &str) -> Result<String> {
        template::resolve(ctx, &self.resolvers, descriptor).await
    }

    /// Resolve `descriptor`, classify it and fetch it into `destination`.
    ///
    /// A cluster-indirection source yields [`Metadata::Cluster`]; the
    /// reference it holds is not followed.
    pub async fn gather(
        &self,
        ctx: &GatherContext,
        descriptor: &str,
        destination: &Path,
    ) -> Result<Metadata> {
        let resolved = self.resolve(ctx, descriptor).await?;
        self.dispatch(ctx, &resolved, destination).await
    }

    /// Like [`gather`](Self::gather), but keeps following cluster
    /// indirections until content is fetched.
    ///
    /// Fails with [`GatherError::IndirectionCycle`] when a source repeats and
    /// with [`GatherError::IndirectionLimit`] after `max_indirections` hops.
    pub async fn gather_following(
        &self,
        ctx: &GatherContext,
        descriptor: &str,
        destination: &Path,
    ) -> Result<Gathered> {
        let mut chain: Vec<String> = Vec::new();
        let mut next = descriptor.to_string();
        let mut hops = 0usize;

        loop {
            let resolved = self.resolve(ctx, &next).await?;
            if chain.contains(&resolved) {
                return Err(GatherError::IndirectionCycle {
                    reference: scrub_credentials(&resolved),
                });
            }
            chain.push(resolved.clone());

            let metadata = self.dispatch(ctx, &resolved, destination).await?;
            let Some(remote_ref) = metadata.remote_ref().map(str::to_string) else {
                return Ok(Gathered { metadata, chain });
            };

            hops += 1;
            if hops > self.max_indirections {
                return Err(GatherError::IndirectionLimit {
                    limit: self.max_indirections,
                    chain: chain.iter().map(|s| scrub_credentials(s)).collect(),
                });
            }
            tracing::debug!(
                hop = hops,
                remote_ref = %scrub_credentials(&remote_ref),
                "following cluster indirection"
            );
            next = remote_ref;
        }
    }

    async fn dispatch(
        &self,
        ctx: &GatherContext,
        resolved: &str,
        destination: &Path,
    ) -> Result<Metadata> {
        let protocol: Protocol = classify(resolved)?;
        tracing::debug!(
            source = %scrub_credentials(resolved),
            protocol = %protocol,
            destination = %destination.display(),
            "dispatching source"
        );
        let metadata = self
            .gatherers
            .gather(ctx, protocol, resolved, destination)
            .await?;
        match metadata.pinned_url() {
            Ok(pinned) => tracing::info!(
                protocol = %protocol,
                pinned = %scrub_credentials(&pinned),
                "gathered source"
            ),
            Err(err) => {
                tracing::info!(protocol = %protocol, error = %err, "gathered unpinnable source")
            }
        }
        Ok(metadata)
    }
}
