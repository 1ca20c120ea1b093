use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Attributes, scrub_credentials};
use crate::error::PinError;

/// Result of a cluster-indirection gather: a pointer to another source.
///
/// Nothing is written to the destination. The reference is pinned by
/// whatever it ultimately resolves to, so [`pinned_url`](Self::pinned_url)
/// passes it through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    /// The `k8s*::` source that was looked up
    pub url: String,
    /// The reference stored in the cluster object
    pub remote_ref: String,
}

impl ClusterMetadata {
    pub fn new(url: impl Into<String>, remote_ref: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            remote_ref: remote_ref.into(),
        }
    }

    pub fn remote_ref(&self) -> &str {
        &self.remote_ref
    }

    pub fn get(&self) -> Attributes {
        Attributes::from([(
            "remote_ref".to_string(),
            Value::String(scrub_credentials(&self.remote_ref)),
        )])
    }

    pub fn pinned_url(&self) -> Result<String, PinError> {
        if self.remote_ref.is_empty() {
            return Err(PinError::EmptyUrl);
        }
        Ok(self.remote_ref.clone())
    }
}
