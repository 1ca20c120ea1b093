//! Minimal Kubernetes REST client for ConfigMap reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::ClusterClient;
use super::kubeconfig::{Kubeconfig, kubeconfig_paths};
use crate::config::ClusterConfig;
use crate::context::GatherContext;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Reads ConfigMaps through the Kubernetes API server.
///
/// Connection settings come from [`ClusterConfig`], then a kubeconfig
/// (`KUBECONFIG` or `~/.kube/config`), then the in-cluster service account.
/// They are resolved on first use, so building a client without any of
/// them succeeds and only lookups fail.
#[derive(Debug)]
pub struct KubeClient {
    config: ClusterConfig,
    user_agent: String,
    timeout: Duration,
    connection: OnceCell<Connection>,
}

#[derive(Debug)]
struct Connection {
    base: url::Url,
    token: Option<String>,
    basic: Option<(String, String)>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ConfigMap {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Where to connect and how to authenticate, before a client is built.
#[derive(Debug, Default)]
struct Settings {
    server: String,
    token: Option<String>,
    ca_pem: Option<Vec<u8>>,
    identity_pem: Option<Vec<u8>>,
    insecure: bool,
    basic: Option<(String, String)>,
}

impl Settings {
    /// Explicit `api_server`, else kubeconfig, else the in-cluster service
    /// account. `token_file` and `ca_file` override whichever source wins.
    fn resolve(config: &ClusterConfig) -> anyhow::Result<Self> {
        let mut settings = match &config.api_server {
            Some(server) => Self {
                server: server.clone(),
                token: read_token(&service_account_file("token"))?,
                ca_pem: read_optional(&service_account_file("ca.crt"))?,
                ..Default::default()
            },
            None => match Self::from_kubeconfig(config)? {
                Some(settings) => settings,
                None => Self {
                    server: in_cluster_server()?,
                    token: read_token(&service_account_file("token"))?,
                    ca_pem: read_optional(&service_account_file("ca.crt"))?,
                    ..Default::default()
                },
            },
        };

        if let Some(path) = &config.token_file {
            settings.token = Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read token file: {}", path.display()))?
                    .trim()
                    .to_string(),
            );
        }
        if let Some(path) = &config.ca_file {
            settings.ca_pem = Some(
                std::fs::read(path)
                    .with_context(|| format!("Failed to read CA file: {}", path.display()))?,
            );
        }
        Ok(settings)
    }

    fn from_kubeconfig(config: &ClusterConfig) -> anyhow::Result<Option<Self>> {
        let paths = kubeconfig_paths(config.kubeconfig.as_deref())?;
        let Some(kubeconfig) = Kubeconfig::load(&paths)? else {
            return Ok(None);
        };
        let target = kubeconfig.target(config.context.as_deref())?;
        tracing::debug!(server = %target.server, "using kubeconfig cluster");
        Ok(Some(Self {
            server: target.server,
            token: target.token,
            ca_pem: target.ca_pem,
            identity_pem: target.identity_pem,
            insecure: target.insecure,
            basic: target.basic,
        }))
    }
}

impl KubeClient {
    pub fn new(config: ClusterConfig, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            config,
            user_agent: user_agent.into(),
            timeout,
            connection: OnceCell::new(),
        }
    }

    async fn connection(&self) -> anyhow::Result<&Connection> {
        self.connection
            .get_or_try_init(|| async { self.connect().await })
            .await
    }

    async fn connect(&self) -> anyhow::Result<Connection> {
        let config = self.config.clone();
        let settings = tokio::task::spawn_blocking(move || Settings::resolve(&config))
            .await
            .context("Kubernetes settings task failed")??;

        let base = url::Url::parse(&settings.server).with_context(|| {
            format!("Invalid Kubernetes API server URL: {}", settings.server)
        })?;

        let mut builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout);
        if let Some(pem) = &settings.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .context("Invalid Kubernetes CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(pem) = &settings.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .context("Invalid Kubernetes client certificate or key")?;
            builder = builder.use_rustls_tls().identity(identity);
        }
        if settings.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build().context("Failed to build Kubernetes HTTP client")?;

        Ok(Connection {
            base,
            token: settings.token,
            basic: settings.basic,
            http,
        })
    }
}

fn in_cluster_server() -> anyhow::Result<String> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").context(
        "No Kubernetes API server configured: set cluster.api_server, KUBECONFIG or \
         ~/.kube/config, or run inside a cluster",
    )?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host
    };
    Ok(format!("https://{}:{}", host, port))
}

fn service_account_file(name: &str) -> PathBuf {
    Path::new(SERVICE_ACCOUNT_DIR).join(name)
}

fn read_optional(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn read_token(path: &Path) -> anyhow::Result<Option<String>> {
    Ok(read_optional(path)?.map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string()))
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn config_map_data(
        &self,
        ctx: &GatherContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let conn = ctx.run_anyhow(self.connection()).await?;

        let mut url = conn.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Kubernetes API server URL cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", namespace, "configmaps", name]);

        let mut request = conn.http.get(url.clone());
        if let Some(token) = &conn.token {
            request = request.bearer_auth(token);
        } else if let Some((username, password)) = &conn.basic {
            request = request.basic_auth(username, Some(password));
        }

        tracing::debug!(namespace, name, "reading configmap");
        let response = ctx
            .run_anyhow(async {
                request
                    .send()
                    .await
                    .with_context(|| format!("Failed to reach Kubernetes API at {}", url))
            })
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("configmaps {:?} not found in namespace {:?}", name, namespace);
        }
        if !status.is_success() {
            anyhow::bail!("Kubernetes API returned HTTP {} for {}", status, url);
        }

        let config_map: ConfigMap = ctx
            .run_anyhow(async {
                response
                    .json()
                    .await
                    .context("Failed to parse ConfigMap response")
            })
            .await?;
        Ok(config_map.data)
    }
}
