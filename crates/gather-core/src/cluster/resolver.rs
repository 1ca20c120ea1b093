use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use super::{ClusterClient, ConfigMapKeyRef, lookup_config_map_key};
use crate::context::GatherContext;
use crate::resolver::Resolver;

/// Resolves `{{ k8sConfigMapKey "<ns>/<name>/<key>" }}` to the key's value.
pub struct ConfigMapKeyResolver {
    client: Arc<dyn ClusterClient>,
}

impl ConfigMapKeyResolver {
    pub const NAME: &'static str = "k8sConfigMapKey";

    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Resolver for ConfigMapKeyResolver {
    async fn resolve(&self, ctx: &GatherContext, argument: &str) -> anyhow::Result<String> {
        let r = ConfigMapKeyRef::parse(argument)
            .with_context(|| format!("parsing configmap ref {:?}", argument))?;
        lookup_config_map_key(ctx, self.client.as_ref(), &r.namespace, &r.name, &r.key).await
    }
}
