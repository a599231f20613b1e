use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FeedUrlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
}

/// Check that a feed URL can be polled: absolute, http(s), with a host.
///
/// The URL is returned in `url`'s serialized form, which is what gets stored
/// as the feed's unique key.
pub fn validate_feed_url(url_str: &str) -> Result<Url, FeedUrlError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(FeedUrlError::MissingHost);
    }

    Ok(url)
}
