//! Kubeconfig discovery and parsing.
//!
//! Files are found the way kubectl finds them: an explicit path, else every
//! file listed in `KUBECONFIG`, else `~/.kube/config`. When several files
//! are listed, the first file to define a name or `current-context` wins.

use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
    #[serde(default)]
    current_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    certificate_authority: Option<PathBuf>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: UserEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<PathBuf>,
    client_certificate: Option<PathBuf>,
    client_certificate_data: Option<String>,
    client_key: Option<PathBuf>,
    client_key_data: Option<String>,
    username: Option<String>,
    password: Option<String>,
    exec: Option<serde_yaml::Value>,
    auth_provider: Option<serde_yaml::Value>,
}

/// Connection settings taken from one kubeconfig context.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct KubeconfigTarget {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure: bool,
    pub token: Option<String>,
    /// Client certificate followed by its private key, PEM encoded
    pub identity_pem: Option<Vec<u8>>,
    pub basic: Option<(String, String)>,
}

/// Kubeconfig files to read, in precedence order.
///
/// An explicit path must exist; discovered paths are skipped when missing.
pub(crate) fn kubeconfig_paths(explicit: Option<&Path>) -> anyhow::Result<Vec<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            anyhow::bail!("Kubeconfig not found: {}", path.display());
        }
        return Ok(vec![path.to_path_buf()]);
    }
    if let Some(list) = std::env::var_os("KUBECONFIG")
        && !list.is_empty()
    {
        return Ok(std::env::split_paths(&list)
            .filter(|p| !p.as_os_str().is_empty() && p.is_file())
            .collect());
    }
    Ok(dirs::home_dir()
        .map(|home| home.join(".kube").join("config"))
        .filter(|p| p.is_file())
        .into_iter()
        .collect())
}

impl Kubeconfig {
    /// Read and merge `paths`. `None` when there is nothing to read.
    pub(crate) fn load(paths: &[PathBuf]) -> anyhow::Result<Option<Self>> {
        let mut merged: Option<Self> = None;
        for path in paths {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read kubeconfig: {}", path.display()))?;
            let mut config = Self::parse(&content)
                .with_context(|| format!("Failed to parse kubeconfig: {}", path.display()))?;
            if let Some(base) = path.parent() {
                config.resolve_paths(base);
            }
            merged = Some(match merged {
                Some(existing) => existing.merge(config),
                None => config,
            });
        }
        Ok(merged)
    }

    pub(crate) fn parse(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Relative file references are relative to the kubeconfig that names them.
    fn resolve_paths(&mut self, base: &Path) {
        let fix = |path: &mut Option<PathBuf>| {
            if let Some(p) = path
                && p.is_relative()
            {
                *p = base.join(&*p);
            }
        };
        for named in &mut self.clusters {
            fix(&mut named.cluster.certificate_authority);
        }
        for named in &mut self.users {
            fix(&mut named.user.token_file);
            fix(&mut named.user.client_certificate);
            fix(&mut named.user.client_key);
        }
    }

    /// Fold `later` into `self`; entries already present are kept.
    fn merge(mut self, later: Self) -> Self {
        for cluster in later.clusters {
            if !self.clusters.iter().any(|c| c.name == cluster.name) {
                self.clusters.push(cluster);
            }
        }
        for context in later.contexts {
            if !self.contexts.iter().any(|c| c.name == context.name) {
                self.contexts.push(context);
            }
        }
        for user in later.users {
            if !self.users.iter().any(|u| u.name == user.name) {
                self.users.push(user);
            }
        }
        if self.current_context.as_deref().is_none_or(str::is_empty) {
            self.current_context = later.current_context;
        }
        self
    }

    /// Connection settings for `context`, or the current context.
    pub(crate) fn target(&self, context: Option<&str>) -> anyhow::Result<KubeconfigTarget> {
        let name = context
            .or(self.current_context.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Kubeconfig has no current-context"))?;
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
            .ok_or_else(|| anyhow::anyhow!("Kubeconfig context {:?} not found", name))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| anyhow::anyhow!("Kubeconfig cluster {:?} not found", context.cluster))?;

        let mut target = KubeconfigTarget {
            server: cluster.server.clone(),
            ca_pem: inline_or_file(
                cluster.certificate_authority_data.as_deref(),
                cluster.certificate_authority.as_deref(),
            )
            .context("Failed to load certificate-authority")?,
            insecure: cluster.insecure_skip_tls_verify,
            ..Default::default()
        };

        let Some(user_name) = context.user.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(target);
        };
        let user = self
            .users
            .iter()
            .find(|u| u.name == user_name)
            .map(|u| &u.user)
            .ok_or_else(|| anyhow::anyhow!("Kubeconfig user {:?} not found", user_name))?;
        if user.exec.is_some() || user.auth_provider.is_some() {
            anyhow::bail!(
                "Kubeconfig user {:?} uses a credential plugin, which is not supported",
                user_name
            );
        }

        target.token = match (&user.token, &user.token_file) {
            (Some(token), _) if !token.is_empty() => Some(token.clone()),
            (_, Some(path)) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read tokenFile: {}", path.display()))?
                    .trim()
                    .to_string(),
            ),
            _ => None,
        };

        let cert = inline_or_file(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
        )
        .context("Failed to load client-certificate")?;
        let key = inline_or_file(user.client_key_data.as_deref(), user.client_key.as_deref())
            .context("Failed to load client-key")?;
        target.identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => anyhow::bail!(
                "Kubeconfig user {:?} needs both a client certificate and key",
                user_name
            ),
        };

        if let (Some(username), Some(password)) = (&user.username, &user.password) {
            target.basic = Some((username.clone(), password.clone()));
        }
        Ok(target)
    }
}

/// Base64 `*-data` wins over the file path, as in kubectl.
fn inline_or_file(data: Option<&str>, file: Option<&Path>) -> anyhow::Result<Option<Vec<u8>>> {
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .context("Invalid base64 data")?;
        return Ok(Some(decoded));
    }
    match file {
        Some(path) => std::fs::read(path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BASIC: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://dev.example.com:6443
      certificate-authority-data: Q0EtUEVN
  - name: prod-cluster
    cluster:
      server: https://prod.example.com
      insecure-skip-tls-verify: true
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
  - name: prod
    context:
      cluster: prod-cluster
      user: prod-user
users:
  - name: dev-user
    user:
      token: dev-token
  - name: prod-user
    user:
      username: admin
      password: hunter2
"#;

    #[test]
    fn current_context_selects_cluster_and_user() {
        let config = Kubeconfig::parse(BASIC).unwrap();
        let target = config.target(None).unwrap();
        assert_eq!(target.server, "https://dev.example.com:6443");
        assert_eq!(target.ca_pem.as_deref(), Some(b"CA-PEM".as_slice()));
        assert_eq!(target.token.as_deref(), Some("dev-token"));
        assert!(!target.insecure);
        assert!(target.identity_pem.is_none());
    }

    #[test]
    fn explicit_context_overrides_current() {
        let config = Kubeconfig::parse(BASIC).unwrap();
        let target = config.target(Some("prod")).unwrap();
        assert_eq!(target.server, "https://prod.example.com");
        assert!(target.insecure);
        assert_eq!(
            target.basic,
            Some(("admin".to_string(), "hunter2".to_string()))
        );
        assert!(config.target(Some("staging")).is_err());
    }

    #[test]
    fn missing_current_context_fails() {
        let config = Kubeconfig::parse("clusters: []\n").unwrap();
        let err = config.target(None).unwrap_err();
        assert!(err.to_string().contains("no current-context"), "{err}");
    }

    #[test]
    fn credential_plugins_are_rejected() {
        let config = Kubeconfig::parse(
            r#"
current-context: eks
clusters: [{ name: c, cluster: { server: "https://eks" } }]
contexts: [{ name: eks, context: { cluster: c, user: u } }]
users: [{ name: u, user: { exec: { command: aws } } }]
"#,
        )
        .unwrap();
        let err = config.target(None).unwrap_err();
        assert!(err.to_string().contains("credential plugin"), "{err}");
    }

    #[test]
    fn relative_files_resolve_against_kubeconfig_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("token"), "file-token\n").unwrap();
        std::fs::write(tmp.path().join("client.crt"), "CERT").unwrap();
        std::fs::write(tmp.path().join("client.key"), "KEY").unwrap();
        let path = tmp.path().join("config");
        std::fs::write(
            &path,
            r#"
current-context: local
clusters: [{ name: c, cluster: { server: "https://127.0.0.1:6443" } }]
contexts: [{ name: local, context: { cluster: c, user: u } }]
users:
  - name: u
    user:
      tokenFile: token
      client-certificate: client.crt
      client-key: client.key
"#,
        )
        .unwrap();

        let config = Kubeconfig::load(&[path]).unwrap().unwrap();
        let target = config.target(None).unwrap();
        assert_eq!(target.token.as_deref(), Some("file-token"));
        assert_eq!(target.identity_pem.as_deref(), Some(b"CERT\nKEY".as_slice()));
    }

    #[test]
    fn first_file_wins_when_merging() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        std::fs::write(
            &first,
            r#"
clusters: [{ name: shared, cluster: { server: "https://first" } }]
"#,
        )
        .unwrap();
        std::fs::write(
            &second,
            r#"
current-context: ctx
clusters: [{ name: shared, cluster: { server: "https://second" } }]
contexts: [{ name: ctx, context: { cluster: shared } }]
"#,
        )
        .unwrap();

        let config = Kubeconfig::load(&[first, second]).unwrap().unwrap();
        let target = config.target(None).unwrap();
        assert_eq!(target.server, "https://first");
        assert_eq!(target.token, None);
    }

    #[test]
    fn nothing_to_load_is_none() {
        assert!(Kubeconfig::load(&[]).unwrap().is_none());
    }

    #[test]
    fn explicit_kubeconfig_must_exist() {
        let err = kubeconfig_paths(Some(Path::new("/nonexistent/kubeconfig"))).unwrap_err();
        assert!(err.to_string().contains("Kubeconfig not found"), "{err}");
    }
}
