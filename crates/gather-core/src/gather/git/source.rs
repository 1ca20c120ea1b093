//! Git source specification types.

use crate::classify::is_scp_like;

/// A parsed git source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    /// URL or SSH shorthand handed to `git clone`
    pub repo_url: String,
    /// Git reference (branch, tag, or commit SHA)
    pub reference: Option<String>,
    /// Subdirectory within the repository
    pub subdir: Option<String>,
    /// Shallow clone depth
    pub depth: Option<u32>,
}

impl GitSource {
    /// Parse a git source string.
    ///
    /// Supports formats:
    /// - `git::https://github.com/org/repo.git`
    /// - `git::https://github.com/org/repo.git//sub/dir?ref=v1.0.0`
    /// - `git@github.com:org/repo.git?ref=main`
    /// - `git+ssh://git@host/org/repo`, `git://host/org/repo`
    /// - `https://host/org/repo.git?depth=1`
    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let raw = source.trim();
        let raw = raw.strip_prefix("git::").unwrap_or(raw);
        let raw = raw.strip_prefix("git+").unwrap_or(raw);
        if raw.is_empty() {
            anyhow::bail!("Empty git source: {:?}", source);
        }

        let (location, query) = raw.split_once('?').unwrap_or((raw, ""));

        let mut reference = None;
        let mut depth = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "ref" if !value.is_empty() => reference = Some(value.to_string()),
                "depth" => {
                    let parsed = value
                        .parse::<u32>()
                        .map_err(|_| anyhow::anyhow!("Invalid depth {:?} in {}", value, source))?;
                    depth = Some(parsed);
                }
                _ => {}
            }
        }

        if let Some(reference) = &reference
            && reference.starts_with('-')
        {
            anyhow::bail!("Git reference must not start with '-': {:?}", reference);
        }

        let (repo_url, subdir) = Self::split_subdir(location);
        if let Some(subdir) = &subdir
            && subdir.split('/').any(|part| part == "..")
        {
            anyhow::bail!("Git subdirectory must stay inside the repository: {:?}", subdir);
        }
        if repo_url.is_empty() {
            anyhow::bail!("Git source has no repository: {:?}", source);
        }
        if repo_url.contains("://") || is_scp_like(repo_url) || repo_url.starts_with('/') {
            Ok(Self {
                repo_url: repo_url.to_string(),
                reference,
                subdir,
                depth,
            })
        } else {
            // Scheme-less host/path after `git::`.
            Ok(Self {
                repo_url: format!("https://{}", repo_url),
                reference,
                subdir,
                depth,
            })
        }
    }

    /// Split `repo//sub/dir` into the repository and subdirectory.
    fn split_subdir(location: &str) -> (&str, Option<String>) {
        let scheme_end = location.find("://").map_or(0, |i| i + 3);
        // Skip the leading slash of file:///abs/path style URLs.
        let search_from = if location[scheme_end..].starts_with('/') {
            scheme_end + 1
        } else {
            scheme_end
        };
        match location[search_from..].find("//") {
            Some(idx) => {
                let split = search_from + idx;
                let subdir = location[split + 2..].trim_matches('/');
                let subdir = (!subdir.is_empty()).then(|| subdir.to_string());
                (&location[..split], subdir)
            }
            None => (location, None),
        }
    }
}
