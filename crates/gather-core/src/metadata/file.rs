use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Attributes, strip_prefixes};
use crate::error::PinError;

const FILE_SCHEMES: &[&str] = &["file::", "file://"];

/// Result of a local filesystem copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Source path as given
    pub url: String,
    /// Where the content was copied to
    pub path: PathBuf,
    /// Total bytes copied
    pub size: u64,
    /// Modification time of the source
    pub timestamp: Option<DateTime<Utc>>,
    /// blake3 hash of the copied content (see `fs::hash_path`)
    pub tree_hash: String,
}

impl FileMetadata {
    pub fn get(&self) -> Attributes {
        Attributes::from([
            (
                "path".to_string(),
                Value::String(self.path.display().to_string()),
            ),
            ("size".to_string(), json!(self.size)),
            (
                "timestamp".to_string(),
                self.timestamp
                    .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
            ),
            ("tree_hash".to_string(), Value::String(self.tree_hash.clone())),
        ])
    }

    /// `file::<path>`.
    pub fn pinned_url(&self) -> Result<String, PinError> {
        if self.url.is_empty() {
            return Err(PinError::EmptyUrl);
        }
        Ok(format!("file::{}", strip_prefixes(&self.url, FILE_SCHEMES)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> FileMetadata {
        FileMetadata {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn pins_local_paths() {
        assert_eq!(with_url("/policies/main").pinned_url().unwrap(), "file::/policies/main");
        assert_eq!(
            with_url("file:///policies/main").pinned_url().unwrap(),
            "file::/policies/main"
        );
        assert_eq!(
            with_url("file::./rel").pinned_url().unwrap(),
            "file::./rel"
        );
    }

    #[test]
    fn empty_url_fails() {
        assert_eq!(with_url("").pinned_url(), Err(PinError::EmptyUrl));
    }

    #[test]
    fn get_formats_timestamp() {
        let m = FileMetadata {
            url: "/src".to_string(),
            path: PathBuf::from("/dst"),
            size: 3,
            timestamp: DateTime::from_timestamp(0, 0),
            tree_hash: "abc".to_string(),
        };
        let attrs = m.get();
        assert_eq!(attrs["timestamp"], "1970-01-01T00:00:00+00:00");
        assert_eq!(attrs["size"], 3);
        assert_eq!(attrs["path"], "/dst");
        assert_eq!(attrs["tree_hash"], "abc");
    }
}
