//! Metadata returned by gatherers and the pinned references derived from it.
//!
//! Every variant exposes a flat attribute map for display and audit
//! ([`Metadata::get`]) and a canonical pinned reference
//! ([`Metadata::pinned_url`]). Pinning is a pure function of the stored
//! fields: no I/O and the same output on every call.

mod cluster;
mod file;
mod git;
mod http;
mod oci;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::Protocol;
use crate::error::PinError;

pub use cluster::ClusterMetadata;
pub use file::FileMetadata;
pub use git::GitMetadata;
pub use http::HttpMetadata;
pub use oci::OciMetadata;

/// Flat attribute map exposed by [`Metadata::get`].
pub type Attributes = BTreeMap<String, Value>;

/// Protocol-specific record of a successful gather.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum Metadata {
    File(FileMetadata),
    Git(GitMetadata),
    Http(HttpMetadata),
    Oci(OciMetadata),
    Cluster(ClusterMetadata),
}

impl Metadata {
    pub fn protocol(&self) -> Protocol {
        match self {
            Metadata::File(_) => Protocol::File,
            Metadata::Git(_) => Protocol::Git,
            Metadata::Http(_) => Protocol::Http,
            Metadata::Oci(_) => Protocol::Oci,
            Metadata::Cluster(_) => Protocol::Cluster,
        }
    }

    /// Protocol-relevant attributes with embedded credentials removed.
    pub fn get(&self) -> Attributes {
        match self {
            Metadata::File(m) => m.get(),
            Metadata::Git(m) => m.get(),
            Metadata::Http(m) => m.get(),
            Metadata::Oci(m) => m.get(),
            Metadata::Cluster(m) => m.get(),
        }
    }

    /// The canonical reference to exactly what was fetched.
    pub fn pinned_url(&self) -> Result<String, PinError> {
        match self {
            Metadata::File(m) => m.pinned_url(),
            Metadata::Git(m) => m.pinned_url(),
            Metadata::Http(m) => m.pinned_url(),
            Metadata::Oci(m) => m.pinned_url(),
            Metadata::Cluster(m) => m.pinned_url(),
        }
    }

    pub fn as_git(&self) -> Option<&GitMetadata> {
        match self {
            Metadata::Git(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_oci(&self) -> Option<&OciMetadata> {
        match self {
            Metadata::Oci(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_cluster(&self) -> Option<&ClusterMetadata> {
        match self {
            Metadata::Cluster(m) => Some(m),
            _ => None,
        }
    }

    /// Commit id for git metadata.
    pub fn latest_commit(&self) -> Option<&str> {
        self.as_git().map(GitMetadata::latest_commit)
    }

    /// The reference a cluster-indirection result points at.
    pub fn remote_ref(&self) -> Option<&str> {
        self.as_cluster().map(ClusterMetadata::remote_ref)
    }
}

impl From<FileMetadata> for Metadata {
    fn from(m: FileMetadata) -> Self {
        Metadata::File(m)
    }
}

impl From<GitMetadata> for Metadata {
    fn from(m: GitMetadata) -> Self {
        Metadata::Git(m)
    }
}

impl From<HttpMetadata> for Metadata {
    fn from(m: HttpMetadata) -> Self {
        Metadata::Http(m)
    }
}

impl From<OciMetadata> for Metadata {
    fn from(m: OciMetadata) -> Self {
        Metadata::Oci(m)
    }
}

impl From<ClusterMetadata> for Metadata {
    fn from(m: ClusterMetadata) -> Self {
        Metadata::Cluster(m)
    }
}

/// Remove userinfo (`user:password@`) from a URL-shaped string.
///
/// Handles a forced-protocol prefix such as `git::https://user:pw@host/x`.
/// Strings that do not parse as URLs, and URLs without credentials, are
/// returned unchanged.
pub fn scrub_credentials(raw: &str) -> String {
    if let Some((forced, rest)) = raw.split_once("::")
        && !forced.is_empty()
        && forced
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '*')
        && rest.contains("://")
    {
        return format!("{}::{}", forced, scrub_credentials(rest));
    }

    match url::Url::parse(raw) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            // Both setters only fail for cannot-be-a-base URLs, which have no userinfo.
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}

/// Strip any of `prefixes` from the front of `s` until none match.
pub(crate) fn strip_prefixes<'a>(mut s: &'a str, prefixes: &[&str]) -> &'a str {
    loop {
        match prefixes.iter().find_map(|p| s.strip_prefix(p)) {
            Some(rest) => s = rest,
            None => return s,
        }
    }
}
