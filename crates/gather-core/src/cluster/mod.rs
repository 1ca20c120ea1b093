//! Cluster configuration lookups.
//!
//! Two features read references out of Kubernetes ConfigMaps:
//! - the `k8s*::<kind>/<namespace>/<name>#<key>` pseudo-protocol, gathered
//!   by [`ClusterGatherer`](crate::gather::ClusterGatherer)
//! - the `k8sConfigMapKey` resolver, usable inside source macros
//!
//! Both go through the [`ClusterClient`] trait.

mod kube;
mod kubeconfig;
mod resolver;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::classify::CLUSTER_PREFIX;
use crate::context::GatherContext;
use crate::error::{GatherError, Result};

pub use kube::KubeClient;
pub use resolver::ConfigMapKeyResolver;

/// Read access to cluster configuration objects.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// The `data` map of a ConfigMap.
    async fn config_map_data(
        &self,
        ctx: &GatherContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Kinds of cluster objects a `k8s*::` source may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    ConfigMap,
}

impl ClusterKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "configmap" | "configmaps" | "cm" => Some(Self::ConfigMap),
            _ => None,
        }
    }
}

/// A parsed `k8s*::<kind>/<namespace>/<name>[#<key>]` source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSource {
    pub kind: ClusterKind,
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl ClusterSource {
    pub fn parse(source: &str) -> Result<Self> {
        let err = |message: String| GatherError::ClusterSource {
            reference: source.to_string(),
            message,
        };

        let body = source.strip_prefix(CLUSTER_PREFIX).unwrap_or(source);
        let parts: Vec<&str> = body.split('/').collect();
        if parts.len() != 3 {
            return Err(err(format!(
                "source must have three parts, <kind>/<ns>/<name>, got: {}",
                source
            )));
        }

        let kind_raw = parts[0].to_lowercase();
        let namespace = parts[1];
        let (name, key) = parts[2].split_once('#').unwrap_or((parts[2], ""));
        if namespace.is_empty() || name.is_empty() {
            return Err(err("namespace and name must not be empty".to_string()));
        }

        let kind = ClusterKind::parse(&kind_raw)
            .ok_or_else(|| err(format!("{:?} is not supported", kind_raw)))?;
        if kind == ClusterKind::ConfigMap && key.is_empty() {
            return Err(err(
                "source reference must contain configmap key".to_string()
            ));
        }

        Ok(Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })
    }
}

/// A `<namespace>/<name>/<key>` argument to the `k8sConfigMapKey` resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMapKeyRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl ConfigMapKeyRef {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = raw.split('/').collect();
        let [namespace, name, key] = parts.as_slice() else {
            anyhow::bail!(
                "configmap ref must have three parts, <ns>/<name>/<key>, got: {}",
                raw
            );
        };
        if namespace.is_empty() || name.is_empty() || key.is_empty() {
            anyhow::bail!("configmap ref parts must not be empty, got: {}", raw);
        }
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })
    }
}

/// Read one key from a ConfigMap and return it as a trimmed reference.
pub async fn lookup_config_map_key(
    ctx: &GatherContext,
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    key: &str,
) -> anyhow::Result<String> {
    let data = client
        .config_map_data(ctx, namespace, name)
        .await
        .map_err(|e| e.context("fetching configmap"))?;
    let Some(value) = data.get(key) else {
        anyhow::bail!("configmap data key {:?} not found", key);
    };
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("remote ref is empty");
    }
    Ok(value.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory ConfigMaps keyed by `namespace/name`.
    #[derive(Default)]
    pub(crate) struct StaticClusterClient {
        pub maps: BTreeMap<String, BTreeMap<String, String>>,
        pub calls: AtomicUsize,
    }

    impl StaticClusterClient {
        pub fn with(namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
            let mut client = Self::default();
            client.maps.insert(
                format!("{}/{}", namespace, name),
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
            client
        }
    }

    #[async_trait]
    impl ClusterClient for StaticClusterClient {
        async fn config_map_data(
            &self,
            _ctx: &GatherContext,
            namespace: &str,
            name: &str,
        ) -> anyhow::Result<BTreeMap<String, String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.maps
                .get(&format!("{}/{}", namespace, name))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("configmaps {:?} not found", name))
        }
    }

    #[test]
    fn parses_configmap_source() {
        let source = ClusterSource::parse("k8s*::ConfigMap/policies/sources#main").unwrap();
        assert_eq!(source.kind, ClusterKind::ConfigMap);
        assert_eq!(source.namespace, "policies");
        assert_eq!(source.name, "sources");
        assert_eq!(source.key, "main");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for bad in ["k8s*::configmap/ns", "k8s*::configmap/ns/name/extra#k"] {
            let err = ClusterSource::parse(bad).unwrap_err();
            assert!(err.to_string().contains("three parts"), "{err}");
        }
    }

    #[test]
    fn configmap_requires_key() {
        let err = ClusterSource::parse("k8s*::configmap/ns/name").unwrap_err();
        assert!(err.to_string().contains("must contain configmap key"));
    }

    #[test]
    fn unsupported_kind_is_named() {
        let err = ClusterSource::parse("k8s*::secret/ns/name#key").unwrap_err();
        assert!(err.to_string().contains("\"secret\" is not supported"), "{err}");
    }

    #[test]
    fn parses_configmap_key_ref() {
        let r = ConfigMapKeyRef::parse("ns/name/key").unwrap();
        assert_eq!((r.namespace.as_str(), r.name.as_str(), r.key.as_str()), ("ns", "name", "key"));
        assert!(ConfigMapKeyRef::parse("ns/name").is_err());
        assert!(ConfigMapKeyRef::parse("ns//key").is_err());
    }

    #[tokio::test]
    async fn lookup_trims_value() {
        let client = StaticClusterClient::with("ns", "cm", &[("k", "  oci::reg/repo:1 \n")]);
        let value = lookup_config_map_key(&GatherContext::new(), &client, "ns", "cm", "k")
            .await
            .unwrap();
        assert_eq!(value, "oci::reg/repo:1");
    }

    #[tokio::test]
    async fn lookup_reports_missing_and_empty_keys() {
        let client = StaticClusterClient::with("ns", "cm", &[("blank", "   ")]);
        let ctx = GatherContext::new();

        let err = lookup_config_map_key(&ctx, &client, "ns", "cm", "absent")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "configmap data key \"absent\" not found");

        let err = lookup_config_map_key(&ctx, &client, "ns", "cm", "blank")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "remote ref is empty");

        let err = lookup_config_map_key(&ctx, &client, "ns", "missing", "k")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "fetching configmap");
    }
}
