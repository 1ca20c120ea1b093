//! OCI registry gatherer.
//!
//! Pulls an artifact manifest and its layer blobs over the distribution
//! API. Only anonymous pulls are supported; a bearer challenge is answered
//! with an unauthenticated token request.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};

use super::Gatherer;
use crate::context::GatherContext;
use crate::metadata::{Metadata, OciMetadata, strip_prefixes};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.index.v1+json";
const DIGEST_HEADER: &str = "docker-content-digest";
const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";
const DEFAULT_REGISTRY: &str = "registry-1.docker.io";
const VERIFIABLE_ALGORITHMS: [&str; 2] = ["sha256", "sha512"];

/// A parsed `registry/repository[:tag|@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    pub registry: String,
    pub repository: String,
    /// Tag or `algorithm:hex` digest
    pub reference: String,
    /// Talk plain HTTP to the registry
    pub insecure: bool,
}

impl OciReference {
    /// Parse an `oci::`/`oci://` source.
    ///
    /// A scheme-less local registry (`localhost`, `127.0.0.1`) or an
    /// explicit `http://` is reached over plain HTTP.
    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let raw = strip_prefixes(source.trim(), &["oci::", "oci://"]);
        let (raw, explicit_http) = match raw.strip_prefix("http://") {
            Some(rest) => (rest, true),
            None => (raw.strip_prefix("https://").unwrap_or(raw), false),
        };
        if raw.is_empty() {
            anyhow::bail!("Empty OCI reference: {:?}", source);
        }

        let (name, reference) = match raw.split_once('@') {
            Some((name, digest)) => (name, digest.to_string()),
            None => {
                match raw.rfind(':').filter(|&i| !raw[i..].contains('/')) {
                    Some(i) => (&raw[..i], raw[i + 1..].to_string()),
                    None => (raw, "latest".to_string()),
                }
            }
        };
        if reference.is_empty() {
            anyhow::bail!("OCI reference has an empty tag or digest: {:?}", source);
        }

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host.to_string(), rest.to_string())
            }
            _ if name.contains('/') => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            _ => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
        };
        if repository.is_empty() {
            anyhow::bail!("OCI reference has no repository: {:?}", source);
        }

        let host = registry.split(':').next().unwrap_or(&registry);
        let insecure = explicit_http || host == "localhost" || host == "127.0.0.1";
        Ok(Self {
            registry,
            repository,
            reference,
            insecure,
        })
    }

    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }

    fn base_url(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{}://{}/v2/{}", scheme, self.registry, self.repository)
    }

    fn manifest_url(&self) -> String {
        format!("{}/manifests/{}", self.base_url(), self.reference)
    }

    fn blob_url(&self, digest: &str) -> String {
        format!("{}/blobs/{}", self.base_url(), digest)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// `sha256:<hex>` of `bytes`.
fn sha256_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Parameters of a `Bearer realm="...",service="...",scope="..."` challenge.
fn parse_challenge(header: &str) -> Option<BTreeMap<String, String>> {
    let params = header.trim().strip_prefix("Bearer ")?;
    let mut out = BTreeMap::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let (key, after) = rest.split_once('=')?;
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            after.split_once(',').unwrap_or((after, ""))
        };
        out.insert(key, value.to_string());
        rest = remaining.trim_start_matches(',').trim();
    }
    Some(out)
}

/// Split an `algorithm:encoded` digest, checking the OCI digest grammar.
fn parse_digest(digest: &str) -> anyhow::Result<(&str, &str)> {
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        anyhow::bail!("Invalid digest {:?}: expected algorithm:encoded", digest);
    };
    let algorithm_ok = algorithm.split(['+', '.', '_', '-']).all(|component| {
        !component.is_empty()
            && component
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    });
    let encoded_ok = !encoded.is_empty()
        && encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'));
    if !algorithm_ok || !encoded_ok {
        anyhow::bail!("Invalid digest {:?}", digest);
    }
    Ok((algorithm, encoded))
}

/// Hex digest of `bytes` under `algorithm`, for the algorithms we can verify.
fn hex_digest(algorithm: &str, bytes: &[u8]) -> Option<String> {
    match algorithm {
        "sha256" => Some(hex::encode(Sha256::digest(bytes))),
        "sha512" => Some(hex::encode(Sha512::digest(bytes))),
        _ => None,
    }
}

/// Blob file name: the title annotation if it is a plain file name,
/// otherwise the encoded part of the digest.
fn layer_file_name(layer: &Descriptor) -> anyhow::Result<String> {
    let (algorithm, encoded) = parse_digest(&layer.digest)?;
    if !VERIFIABLE_ALGORITHMS.contains(&algorithm) {
        anyhow::bail!("Unsupported digest algorithm {:?} for layer {}", algorithm, layer.digest);
    }
    let name = layer
        .annotations
        .get(TITLE_ANNOTATION)
        .and_then(|title| Path::new(title).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| encoded.to_string());
    if name.contains(['/', '\\']) || name == "." || name == ".." || name == "manifest.json" {
        anyhow::bail!("Refusing layer file name {:?} for {}", name, layer.digest);
    }
    Ok(name)
}

/// Per-pull registry session holding the bearer token once obtained.
struct Session<'a> {
    client: &'a reqwest::Client,
    token: Option<String>,
}

impl Session<'_> {
    async fn get(&mut self, url: &str, accept: Option<&str>) -> anyhow::Result<reqwest::Response> {
        let response = self.send(url, accept).await?;
        if response.status() != StatusCode::UNAUTHORIZED || self.token.is_some() {
            return Ok(response);
        }
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge);
        let Some(challenge) = challenge else {
            return Ok(response);
        };
        self.token = Some(self.fetch_token(&challenge).await?);
        self.send(url, accept).await
    }

    async fn send(&self, url: &str, accept: Option<&str>) -> anyhow::Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))
    }

    async fn fetch_token(&self, challenge: &BTreeMap<String, String>) -> anyhow::Result<String> {
        let realm = challenge
            .get("realm")
            .ok_or_else(|| anyhow::anyhow!("Registry auth challenge has no realm"))?;
        let query: Vec<(&str, &str)> = ["service", "scope"]
            .into_iter()
            .filter_map(|key| challenge.get(key).map(|v| (key, v.as_str())))
            .collect();
        tracing::debug!(realm = %realm, "requesting anonymous registry token");

        let response = self
            .client
            .get(realm)
            .query(&query)
            .send()
            .await
            .with_context(|| format!("Failed to request registry token from {}", realm))?;
        if !response.status().is_success() {
            anyhow::bail!(
                "Registry token request failed: HTTP {} from {}",
                response.status(),
                realm
            );
        }
        let body: TokenResponse = response
            .json()
            .await
            .context("Failed to parse registry token response")?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Registry token response has no token"))
    }
}

/// Pulls OCI artifacts from a registry.
#[derive(Debug, Clone)]
pub struct OciGatherer {
    client: reqwest::Client,
}

impl OciGatherer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn pull(&self, reference: &OciReference, destination: &Path) -> anyhow::Result<String> {
        let mut session = Session {
            client: &self.client,
            token: None,
        };

        let manifest_url = reference.manifest_url();
        let response = session.get(&manifest_url, Some(MANIFEST_ACCEPT)).await?;
        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to fetch manifest: HTTP {} from {}",
                response.status(),
                manifest_url
            );
        }
        let header_digest = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .context("Failed to read manifest body")?;
        let digest = match header_digest {
            Some(digest) => {
                parse_digest(&digest).context("Registry returned a malformed manifest digest")?;
                digest
            }
            None => sha256_digest(&body),
        };
        let manifest: Manifest =
            serde_json::from_slice(&body).context("Failed to parse OCI manifest")?;

        tokio::fs::create_dir_all(destination)
            .await
            .with_context(|| format!("Failed to create {}", destination.display()))?;
        tokio::fs::write(destination.join("manifest.json"), &body)
            .await
            .context("Failed to write manifest.json")?;

        for layer in &manifest.layers {
            let file_name = layer_file_name(layer)?;
            let blob_url = reference.blob_url(&layer.digest);
            let response = session.get(&blob_url, None).await?;
            if !response.status().is_success() {
                anyhow::bail!(
                    "Failed to fetch blob {}: HTTP {}",
                    layer.digest,
                    response.status()
                );
            }
            let blob = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read blob {}", layer.digest))?;
            let (algorithm, encoded) = parse_digest(&layer.digest)?;
            if hex_digest(algorithm, &blob).as_deref() != Some(encoded) {
                anyhow::bail!("Blob digest mismatch for {}", layer.digest);
            }
            let target = destination.join(file_name);
            tokio::fs::write(&target, &blob)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
        }

        Ok(digest)
    }
}

#[async_trait]
impl Gatherer for OciGatherer {
    async fn gather(
        &self,
        ctx: &GatherContext,
        source: &str,
        destination: &Path,
    ) -> anyhow::Result<Metadata> {
        let reference = OciReference::parse(source)?;
        tracing::debug!(
            registry = %reference.registry,
            repository = %reference.repository,
            reference = %reference.reference,
            "pulling OCI artifact"
        );
        let digest = ctx.run_anyhow(self.pull(&reference, destination)).await?;
        Ok(Metadata::Oci(OciMetadata::new(source, digest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatherConfig;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn gatherer() -> OciGatherer {
        OciGatherer::new(super::super::http::build_client(&GatherConfig::default()).unwrap())
    }

    #[test]
    fn parse_registry_repository_and_tag() {
        let r = OciReference::parse("oci::quay.io/org/policy:v1").unwrap();
        assert_eq!(r.registry, "quay.io");
        assert_eq!(r.repository, "org/policy");
        assert_eq!(r.reference, "v1");
        assert!(!r.insecure);
        assert_eq!(r.manifest_url(), "https://quay.io/v2/org/policy/manifests/v1");
    }

    #[test]
    fn parse_defaults_to_latest() {
        let r = OciReference::parse("oci://quay.io/org/policy").unwrap();
        assert_eq!(r.reference, "latest");
        assert!(!r.is_digest());
    }

    #[test]
    fn parse_digest_reference() {
        let r = OciReference::parse("oci::quay.io/org/policy@sha256:abc").unwrap();
        assert_eq!(r.reference, "sha256:abc");
        assert!(r.is_digest());
    }

    #[test]
    fn parse_registry_port_is_not_a_tag() {
        let r = OciReference::parse("oci::localhost:5000/policy").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "policy");
        assert_eq!(r.reference, "latest");
        assert!(r.insecure);
    }

    #[test]
    fn parse_docker_hub_short_names() {
        let r = OciReference::parse("oci::alpine:3").unwrap();
        assert_eq!(r.registry, DEFAULT_REGISTRY);
        assert_eq!(r.repository, "library/alpine");
        let r = OciReference::parse("oci::org/app").unwrap();
        assert_eq!(r.repository, "org/app");
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(OciReference::parse("oci::").is_err());
        assert!(OciReference::parse("oci::quay.io/org/policy:").is_err());
    }

    #[test]
    fn challenge_parameters_are_parsed() {
        let params = parse_challenge(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:org/app:pull""#,
        )
        .unwrap();
        assert_eq!(params["realm"], "https://auth.example.com/token");
        assert_eq!(params["service"], "registry.example.com");
        assert_eq!(params["scope"], "repository:org/app:pull");
        assert!(parse_challenge("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn layer_title_cannot_escape_destination() {
        let layer = Descriptor {
            digest: "sha256:abcd".to_string(),
            annotations: BTreeMap::from([(
                TITLE_ANNOTATION.to_string(),
                "../../etc/passwd".to_string(),
            )]),
        };
        assert_eq!(layer_file_name(&layer).unwrap(), "passwd");
        let untitled = Descriptor {
            digest: "sha256:abcd".to_string(),
            annotations: BTreeMap::new(),
        };
        assert_eq!(layer_file_name(&untitled).unwrap(), "abcd");
    }

    #[test]
    fn layer_digest_must_follow_digest_grammar() {
        for digest in ["sha512:../../escaped.txt", "sha256:a/b", "sha256:", "abcd", ":abcd"] {
            let layer = Descriptor {
                digest: digest.to_string(),
                annotations: BTreeMap::new(),
            };
            assert!(layer_file_name(&layer).is_err(), "{digest}");
        }
        let unverifiable = Descriptor {
            digest: "md5:d41d8cd98f00b204e9800998ecf8427e".to_string(),
            annotations: BTreeMap::new(),
        };
        let err = layer_file_name(&unverifiable).unwrap_err();
        assert!(err.to_string().contains("Unsupported digest algorithm"), "{err}");
    }

    #[test]
    fn sha512_digests_are_verified() {
        let encoded = hex::encode(Sha512::digest(b"layer"));
        assert_eq!(hex_digest("sha512", b"layer").as_deref(), Some(encoded.as_str()));
        assert!(hex_digest("md5", b"layer").is_none());
    }

    fn manifest_for(layer: &[u8]) -> serde_json::Value {
        json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "layers": [{
                "mediaType": "application/vnd.oci.image.layer.v1.tar",
                "digest": sha256_digest(layer),
                "size": layer.len(),
                "annotations": { "org.opencontainers.image.title": "policy.tar.gz" }
            }]
        })
    }

    #[tokio::test]
    async fn pulls_manifest_and_layers() {
        let server = MockServer::start_async().await;
        let layer = b"layer-bytes".as_slice();
        let manifest = manifest_for(layer);

        let manifest_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/org/policy/manifests/v1");
                then.status(200)
                    .header("content-type", "application/vnd.oci.image.manifest.v1+json")
                    .header("docker-content-digest", "sha256:feedface")
                    .json_body(manifest.clone());
            })
            .await;
        let blob_path = format!("/v2/org/policy/blobs/{}", sha256_digest(layer));
        server
            .mock_async(|when, then| {
                when.method(GET).path(blob_path.as_str());
                then.status(200).body(layer);
            })
            .await;

        let tmp = TempDir::new().unwrap();
        let source = format!("oci::{}/org/policy:v1", server.address());
        let metadata = gatherer()
            .gather(&GatherContext::new(), &source, tmp.path())
            .await
            .unwrap();

        manifest_mock.assert_async().await;
        assert!(tmp.path().join("manifest.json").exists());
        assert_eq!(std::fs::read(tmp.path().join("policy.tar.gz")).unwrap(), layer);
        assert_eq!(metadata.get()["digest"], "sha256:feedface");
        assert_eq!(
            metadata.pinned_url().unwrap(),
            format!("oci::{}/org/policy:v1@sha256:feedface", server.address())
        );
    }

    #[tokio::test]
    async fn digest_falls_back_to_manifest_hash() {
        let server = MockServer::start_async().await;
        let body = r#"{"schemaVersion":2,"layers":[]}"#;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/org/empty/manifests/latest");
                then.status(200).body(body);
            })
            .await;

        let tmp = TempDir::new().unwrap();
        let metadata = gatherer()
            .gather(
                &GatherContext::new(),
                &format!("oci::{}/org/empty", server.address()),
                tmp.path(),
            )
            .await
            .unwrap();
        assert_eq!(
            metadata.as_oci().unwrap().digest(),
            sha256_digest(body.as_bytes())
        );
    }

    #[tokio::test]
    async fn answers_anonymous_bearer_challenge() {
        let server = MockServer::start_async().await;
        let body = r#"{"schemaVersion":2,"layers":[]}"#;

        let authorized = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/private/app/manifests/1.0")
                    .header("authorization", "Bearer anon-token");
                then.status(200)
                    .header("docker-content-digest", "sha256:0123")
                    .body(body);
            })
            .await;
        let challenge = format!(
            "Bearer realm=\"{}\",service=\"registry\",scope=\"repository:private/app:pull\"",
            server.url("/token")
        );
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/private/app/manifests/1.0");
                then.status(401).header("www-authenticate", challenge.as_str());
            })
            .await;
        let token = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/token")
                    .query_param("service", "registry")
                    .query_param("scope", "repository:private/app:pull");
                then.status(200).json_body(json!({ "token": "anon-token" }));
            })
            .await;

        let tmp = TempDir::new().unwrap();
        let metadata = gatherer()
            .gather(
                &GatherContext::new(),
                &format!("oci::{}/private/app:1.0", server.address()),
                tmp.path(),
            )
            .await
            .unwrap();

        token.assert_async().await;
        authorized.assert_async().await;
        assert_eq!(metadata.as_oci().unwrap().digest(), "sha256:0123");
    }

    #[tokio::test]
    async fn missing_manifest_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/org/gone/manifests/latest");
                then.status(404);
            })
            .await;

        let tmp = TempDir::new().unwrap();
        let err = gatherer()
            .gather(
                &GatherContext::new(),
                &format!("oci::{}/org/gone", server.address()),
                tmp.path(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
    }

    #[tokio::test]
    async fn corrupt_blob_is_rejected() {
        let server = MockServer::start_async().await;
        let manifest = manifest_for(b"expected");
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/org/bad/manifests/latest");
                then.status(200).json_body(manifest.clone());
            })
            .await;
        let blob_path = format!("/v2/org/bad/blobs/{}", sha256_digest(b"expected"));
        server
            .mock_async(|when, then| {
                when.method(GET).path(blob_path.as_str());
                then.status(200).body("tampered");
            })
            .await;

        let tmp = TempDir::new().unwrap();
        let err = gatherer()
            .gather(
                &GatherContext::new(),
                &format!("oci::{}/org/bad", server.address()),
                tmp.path(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("digest mismatch"), "{err}");
    }

    #[tokio::test]
    async fn registry_digest_cannot_place_blobs_outside_destination() {
        let server = MockServer::start_async().await;
        let manifest = json!({
            "schemaVersion": 2,
            "layers": [{ "digest": "sha512:../../escaped.txt", "size": 7 }]
        });
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/org/evil/manifests/latest");
                then.status(200).json_body(manifest.clone());
            })
            .await;
        let blob = server
            .mock_async(|when, then| {
                when.method(GET).path_includes("/blobs/");
                then.status(200).body("escaped");
            })
            .await;

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("a").join("b");
        let err = gatherer()
            .gather(
                &GatherContext::new(),
                &format!("oci::{}/org/evil", server.address()),
                &dest,
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Invalid digest"), "{err}");
        assert_eq!(blob.hits_async().await, 0);
        assert!(!tmp.path().join("escaped.txt").exists());
    }
}
