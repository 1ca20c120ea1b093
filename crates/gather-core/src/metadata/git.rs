use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Attributes, strip_prefixes};
use crate::classify::is_scp_like;
use crate::error::PinError;

const GIT_SCHEMES: &[&str] = &["git://", "https://"];

/// Result of a git gather: the source URL and the checked-out commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    /// Source the repository was cloned from, as resolved
    pub url: String,
    /// Full commit id of the checked-out HEAD
    pub latest_commit: String,
}

impl GitMetadata {
    pub fn new(url: impl Into<String>, latest_commit: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            latest_commit: latest_commit.into(),
        }
    }

    pub fn latest_commit(&self) -> &str {
        &self.latest_commit
    }

    pub fn get(&self) -> Attributes {
        Attributes::from([(
            "latest_commit".to_string(),
            Value::String(self.latest_commit.clone()),
        )])
    }

    /// `git::<location>?ref=<commit>`.
    ///
    /// Scheme prefixes and `user@` of the SSH shorthand are dropped (a
    /// scheme is kept when its URL would otherwise read as SSH shorthand), any
    /// existing `ref` query parameter is replaced, and a `//subdir` suffix is
    /// kept as-is.
    pub fn pinned_url(&self) -> Result<String, PinError> {
        if self.url.is_empty() {
            return Err(PinError::EmptyUrl);
        }
        if self.latest_commit.is_empty() {
            return Err(PinError::LatestCommitNotSet);
        }

        let forced = strip_prefixes(&self.url, &["git::"]);
        let stripped = strip_prefixes(forced, GIT_SCHEMES);
        let had_scheme = stripped.len() != forced.len();
        let location = match (had_scheme, is_scp_like(stripped)) {
            // git@host:org/repo -> host/org/repo
            (false, true) => {
                let (user_host, path) = stripped.split_once(':').unwrap_or((stripped, ""));
                let host = user_host.split_once('@').map_or(user_host, |(_, h)| h);
                format!("{}/{}", host, path)
            }
            // user@host:port/path would read back as SSH shorthand without its scheme.
            (true, true) => forced.to_string(),
            (_, false) => stripped.to_string(),
        };

        let (path, query) = match location.split_once('?') {
            Some((path, query)) => (path, query),
            None => (location.as_str(), ""),
        };
        let kept: Vec<&str> = query
            .split('&')
            .filter(|kv| !kv.is_empty() && *kv != "ref" && !kv.starts_with("ref="))
            .collect();

        let mut pinned = format!("git::{}?", path);
        for kv in kept {
            pinned.push_str(kv);
            pinned.push('&');
        }
        pinned.push_str("ref=");
        pinned.push_str(&self.latest_commit);
        Ok(pinned)
    }
}
