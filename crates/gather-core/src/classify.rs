//! Protocol classification of resolved sources.
//!
//! Classification is a pure inspection of the string's lexical form: no
//! network access and no filesystem stat.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GatherError, Result};

/// Prefix of the cluster-indirection pseudo-protocol.
pub const CLUSTER_PREFIX: &str = "k8s*::";

/// The closed set of fetch families a resolved source can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    File,
    Git,
    Http,
    Oci,
    Cluster,
}

impl Protocol {
    /// Every protocol the classifier can produce.
    pub const ALL: [Protocol; 5] = [
        Protocol::File,
        Protocol::Git,
        Protocol::Http,
        Protocol::Oci,
        Protocol::Cluster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::File => "file",
            Protocol::Git => "git",
            Protocol::Http => "http",
            Protocol::Oci => "oci",
            Protocol::Cluster => "k8s",
        }
    }

    /// Whether a gather of this protocol yields content rather than another reference.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Protocol::Cluster)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const GIT_PREFIXES: &[&str] = &["git::", "git://", "git+ssh://", "git+https://", "ssh://"];
const OCI_PREFIXES: &[&str] = &["oci::", "oci://"];
const HTTP_PREFIXES: &[&str] = &["http::", "http://", "https://"];
const FILE_PREFIXES: &[&str] = &["file::", "file://", "/", "./", "../", "~/"];

/// Classify a resolved source string. First matching rule wins.
pub fn classify(source: &str) -> Result<Protocol> {
    let source = source.trim();

    if source.starts_with(CLUSTER_PREFIX) {
        return Ok(Protocol::Cluster);
    }

    if has_prefix(source, GIT_PREFIXES) || is_scp_like(source) || has_git_suffix(source) {
        return Ok(Protocol::Git);
    }

    if has_prefix(source, OCI_PREFIXES) {
        return Ok(Protocol::Oci);
    }

    if has_prefix(source, HTTP_PREFIXES) {
        return Ok(Protocol::Http);
    }

    if has_prefix(source, FILE_PREFIXES) || is_windows_path(source) {
        return Ok(Protocol::File);
    }

    match scheme_token(source) {
        Some(token) => Err(GatherError::UnsupportedProtocol {
            token: token.to_string(),
        }),
        None if source.is_empty() => Err(GatherError::UnsupportedProtocol {
            token: String::new(),
        }),
        // No scheme at all: a relative filesystem path.
        None => Ok(Protocol::File),
    }
}

fn has_prefix(source: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| source.starts_with(p))
}

/// `user@host:path` SSH shorthand, as accepted by `git clone`.
pub(crate) fn is_scp_like(source: &str) -> bool {
    let Some((user_host, path)) = source.split_once(':') else {
        return false;
    };
    let Some((user, host)) = user_host.split_once('@') else {
        return false;
    };
    !user.is_empty()
        && !host.is_empty()
        && !path.is_empty()
        && !path.starts_with("//")
        && !user_host.contains('/')
        && !host.contains(|c: char| c.is_whitespace())
}

/// Web URLs whose repository path ends in `.git`. A forced `http::` is
/// left to the HTTP rule.
fn has_git_suffix(source: &str) -> bool {
    if !has_prefix(source, &["http://", "https://"]) {
        return false;
    }
    let without_query = source.split('?').next().unwrap_or(source);
    let after_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let repo_path = after_scheme.split("//").next().unwrap_or(after_scheme);
    repo_path.trim_end_matches('/').ends_with(".git")
}

fn is_windows_path(source: &str) -> bool {
    let bytes = source.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

/// The leading `scheme:` token, if the string has one.
fn scheme_token(source: &str) -> Option<&str> {
    let (token, _) = source.split_once(':')?;
    let valid = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '*'));
    valid.then_some(token)
}
