use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Attributes, strip_prefixes};
use crate::error::PinError;

const OCI_SCHEMES: &[&str] = &["oci::", "oci://", "https://"];

/// Result of an OCI artifact pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciMetadata {
    pub url: String,
    /// Manifest digest, e.g. `sha256:...`
    pub digest: String,
}

impl OciMetadata {
    pub fn new(url: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            digest: digest.into(),
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn get(&self) -> Attributes {
        Attributes::from([("digest".to_string(), Value::String(self.digest.clone()))])
    }

    /// `oci::<location>@<digest>`; an existing digest suffix is discarded.
    pub fn pinned_url(&self) -> Result<String, PinError> {
        if self.url.is_empty() {
            return Err(PinError::EmptyUrl);
        }
        if self.digest.is_empty() {
            return Err(PinError::DigestNotSet);
        }
        let location = strip_prefixes(&self.url, OCI_SCHEMES);
        let location = location.split('@').next().unwrap_or(location);
        Ok(format!("oci::{}@{}", location, self.digest))
    }
}
