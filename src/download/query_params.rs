//! Download URL preparation: parsing plus configured query-parameter injection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::DownloadError;

/// Query parameters added to every download URL containing `host_wildcard`.
///
/// Typically used to attach API keys or tokens for specific hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Substring matched against the raw URL.
    pub host_wildcard: String,
    /// Parameters set on the query, replacing existing values for the same key.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Parses `raw` into an http(s) URL and applies every matching rule.
///
/// A URL without a scheme is treated as `http://`.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] if `raw` is not a valid http(s) URL.
pub fn prepare_download_url(raw: &str, rules: &[QueryParams]) -> Result<Url, DownloadError> {
    let raw = raw.trim();
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("http://{raw}"))
            .map_err(|_| DownloadError::invalid_url(raw))?,
        Err(_) => return Err(DownloadError::invalid_url(raw)),
    };

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(DownloadError::invalid_url(raw));
    }

    let matching: Vec<&QueryParams> = rules
        .iter()
        .filter(|rule| raw.contains(&rule.host_wildcard))
        .collect();
    if matching.is_empty() {
        return Ok(url);
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    for (key, value) in matching.iter().flat_map(|rule| rule.params.iter()) {
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1.clone_from(value),
            None => pairs.push((key.clone(), value.clone())),
        }
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rule(host: &str, params: &[(&str, &str)]) -> QueryParams {
        QueryParams {
            host_wildcard: host.to_string(),
            params: params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_prepare_without_rules_keeps_url() {
        let url = prepare_download_url("https://example.com/a.bin?x=1", &[]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/a.bin?x=1");
    }

    #[test]
    fn test_prepare_adds_params_for_matching_host() {
        let rules = [rule("files.example.com", &[("token", "abc")])];
        let url = prepare_download_url("https://files.example.com/a.bin", &rules).unwrap();
        assert_eq!(url.query(), Some("token=abc"));
    }

    #[test]
    fn test_prepare_overwrites_existing_key() {
        let rules = [rule("example.com", &[("token", "new")])];
        let url = prepare_download_url("https://example.com/a.bin?token=old&x=1", &rules).unwrap();
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("token".to_string(), "new".to_string()),
                ("x".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn test_prepare_ignores_non_matching_rules() {
        let rules = [rule("other.org", &[("token", "abc")])];
        let url = prepare_download_url("https://example.com/a.bin", &rules).unwrap();
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_prepare_defaults_to_http_scheme() {
        let url = prepare_download_url("example.com/a.bin", &[]).unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_prepare_rejects_invalid_urls() {
        for raw in ["", "ftp://example.com/a.bin", "http://", "file:///etc/passwd"] {
            assert!(
                matches!(
                    prepare_download_url(raw, &[]),
                    Err(DownloadError::InvalidUrl { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }
}
