//! Cluster-indirection gatherer.
//!
//! Nothing is downloaded: the ConfigMap key named by the source holds a
//! reference to the real source, which is returned for the caller to follow.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::Gatherer;
use crate::cluster::{ClusterClient, ClusterKind, ClusterSource, lookup_config_map_key};
use crate::context::GatherContext;
use crate::metadata::{ClusterMetadata, Metadata, scrub_credentials};

/// Looks up the reference stored behind a `k8s*::` source.
pub struct ClusterGatherer {
    client: Arc<dyn ClusterClient>,
}

impl ClusterGatherer {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Gatherer for ClusterGatherer {
    async fn gather(
        &self,
        ctx: &GatherContext,
        source: &str,
        _destination: &Path,
    ) -> anyhow::Result<Metadata> {
        let parsed = ClusterSource::parse(source)?;
        let remote_ref = match parsed.kind {
            ClusterKind::ConfigMap => {
                lookup_config_map_key(
                    ctx,
                    self.client.as_ref(),
                    &parsed.namespace,
                    &parsed.name,
                    &parsed.key,
                )
                .await?
            }
        };
        tracing::debug!(
            namespace = %parsed.namespace,
            name = %parsed.name,
            key = %parsed.key,
            remote_ref = %scrub_credentials(&remote_ref),
            "resolved cluster reference"
        );
        Ok(Metadata::Cluster(ClusterMetadata::new(source, remote_ref)))
    }
}
