//! URL handling for the media API.
//!
//! The API base is parsed once; endpoint URLs are built by appending a path
//! to the base path and attaching the canonical query string. Media URLs
//! returned by the listing may be absolute or relative to the base.

use gallery_core::cache::encode_query;

/// Error type for URL handling failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for gallery_core::Error {
    fn from(err: UrlError) -> Self {
        gallery_core::Error::InvalidUrl(err.to_string())
    }
}

fn check_scheme(url: &url::Url) -> Result<(), UrlError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }
}

/// Parse the API base URL.
///
/// Trims whitespace, lowercases the host and drops any query or fragment.
pub fn parse_base(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = url::Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    check_scheme(&parsed)?;

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed)
}

/// `base` + `path`, with `pairs` as the query string.
///
/// `path` is appended to the base path rather than replacing it, so a base
/// of `http://host/api` and path `/gallery` give `http://host/api/gallery`.
pub fn endpoint_url(base: &url::Url, path: &str, pairs: &[(String, String)]) -> url::Url {
    let mut url = base.clone();
    let joined = format!("{}/{}", base.path().trim_end_matches('/'), path.trim_start_matches('/'));
    url.set_path(&joined);
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&encode_query(pairs)));
    }
    url
}

/// Resolve a media URL from the listing against the API base.
pub fn media_url(base: &url::Url, raw: &str) -> Result<url::Url, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = if trimmed.contains("://") {
        url::Url::parse(trimmed)
    } else {
        base.join(trimmed)
    }
    .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    check_scheme(&parsed)?;
    Ok(parsed)
}
