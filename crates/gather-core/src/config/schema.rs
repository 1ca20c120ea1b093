//! Configuration schema for gather.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure for gather.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatherConfig {
    /// User agent sent by the HTTP and OCI gatherers
    pub user_agent: String,

    /// Maximum number of cluster-indirection hops followed by
    /// `GatherService::gather_following`
    pub max_indirections: usize,

    pub http: HttpConfig,

    pub git: GitConfig,

    pub cluster: ClusterConfig,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_indirections: 8,
            http: HttpConfig::default(),
            git: GitConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

fn default_user_agent() -> String {
    format!("gather/{}", env!("CARGO_PKG_VERSION"))
}

/// HTTP client settings (also used for OCI registries)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Git gatherer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Git executable to invoke
    pub binary: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

/// Kubernetes API access for cluster lookups.
///
/// Without `api_server`, a kubeconfig is used when one is found, and the
/// in-cluster service account environment otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// API server base URL, e.g. `https://kubernetes.default.svc`
    pub api_server: Option<String>,

    /// File holding a bearer token
    pub token_file: Option<PathBuf>,

    /// PEM bundle used to verify the API server
    pub ca_file: Option<PathBuf>,

    /// Kubeconfig to read instead of `KUBECONFIG` or `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of `current-context`
    pub context: Option<String>,
}

impl GatherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_indirections == 0 {
            anyhow::bail!("max_indirections must be at least 1");
        }
        if self.http.timeout_secs == 0 {
            anyhow::bail!("http.timeout_secs must be at least 1");
        }
        if self.user_agent.trim().is_empty() {
            anyhow::bail!("user_agent must not be empty");
        }
        if let Some(api_server) = &self.cluster.api_server {
            url::Url::parse(api_server)
                .map_err(|e| anyhow::anyhow!("cluster.api_server is not a valid URL: {}", e))?;
        }
        Ok(())
    }
}
