use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Attributes, strip_prefixes};
use crate::error::PinError;

const HTTP_SCHEMES: &[&str] = &["http://", "https://", "http::"];

/// Response headers whose values never appear in attribute maps.
const REDACTED_HEADERS: &[&str] = &["authorization", "proxy-authorization", "set-cookie"];

/// Result of an HTTP download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMetadata {
    pub url: String,
    pub status_code: u16,
    /// Bytes written to the destination
    pub content_length: u64,
    pub destination: PathBuf,
    /// Response headers, keyed by lower-cased name
    pub headers: BTreeMap<String, Vec<String>>,
}

impl HttpMetadata {
    pub fn get(&self) -> Attributes {
        let headers: BTreeMap<&str, Vec<&str>> = self
            .headers
            .iter()
            .map(|(name, values)| {
                let values = if REDACTED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                    vec!["[redacted]"; values.len()]
                } else {
                    values.iter().map(String::as_str).collect()
                };
                (name.as_str(), values)
            })
            .collect();

        Attributes::from([
            ("statusCode".to_string(), json!(self.status_code)),
            ("contentLength".to_string(), json!(self.content_length)),
            (
                "destination".to_string(),
                Value::String(self.destination.display().to_string()),
            ),
            ("headers".to_string(), json!(headers)),
        ])
    }

    /// `http::<location>`.
    pub fn pinned_url(&self) -> Result<String, PinError> {
        if self.url.is_empty() {
            return Err(PinError::EmptyUrl);
        }
        Ok(format!("http::{}", strip_prefixes(&self.url, HTTP_SCHEMES)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> HttpMetadata {
        HttpMetadata {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn pins_web_urls() {
        assert_eq!(
            with_url("https://example.com/x").pinned_url().unwrap(),
            "http::example.com/x"
        );
        assert_eq!(
            with_url("http://example.com/x?y=1").pinned_url().unwrap(),
            "http::example.com/x?y=1"
        );
        assert_eq!(
            with_url("http::example.com/x").pinned_url().unwrap(),
            "http::example.com/x"
        );
    }

    #[test]
    fn pinning_is_canonical_for_already_pinned_input() {
        let once = with_url("http::https://example.com/x").pinned_url().unwrap();
        assert_eq!(once, "http::example.com/x");
        assert_eq!(with_url(&once).pinned_url().unwrap(), once);
    }

    #[test]
    fn empty_url_fails() {
        assert_eq!(with_url("").pinned_url(), Err(PinError::EmptyUrl));
    }

    #[test]
    fn get_reports_response_details() {
        let m = HttpMetadata {
            url: "https://example.com/x".to_string(),
            status_code: 200,
            content_length: 11,
            destination: PathBuf::from("/tmp/out"),
            headers: BTreeMap::from([(
                "content-type".to_string(),
                vec!["text/plain".to_string()],
            )]),
        };
        let attrs = m.get();
        assert_eq!(attrs["statusCode"], 200);
        assert_eq!(attrs["contentLength"], 11);
        assert_eq!(attrs["destination"], "/tmp/out");
        assert_eq!(attrs["headers"]["content-type"][0], "text/plain");
    }

    #[test]
    fn get_redacts_sensitive_headers() {
        let m = HttpMetadata {
            url: "https://example.com/x".to_string(),
            headers: BTreeMap::from([(
                "set-cookie".to_string(),
                vec!["session=abc".to_string(), "other=def".to_string()],
            )]),
            ..Default::default()
        };
        let attrs = m.get();
        assert_eq!(attrs["headers"]["set-cookie"], json!(["[redacted]", "[redacted]"]));
    }
}
