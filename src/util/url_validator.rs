use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons a subscription URL is refused before it is sent to the service.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Only http and https feeds can be fetched by the remote service.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    /// The remote service cannot reach hosts on our local network.
    #[error("Local address not allowed: {0}")]
    LocalAddress(String),
}

/// Validate and canonicalise a feed URL typed by the user.
///
/// `feed://` and `feed:https://` forms produced by browsers are rewritten to
/// plain http(s). Loopback, private, link-local and unspecified addresses are
/// refused because the aggregation service would fetch them, not us.
///
/// ```
/// use readersync::util::validate_feed_url;
///
/// assert_eq!(
///     validate_feed_url("feed://example.com/rss").unwrap(),
///     "http://example.com/rss"
/// );
/// assert!(validate_feed_url("http://192.168.1.1/rss").is_err());
/// ```
pub fn validate_feed_url(input: &str) -> Result<String, UrlValidationError> {
    let trimmed = input.trim();
    let rewritten = if let Some(rest) = trimmed.strip_prefix("feed:") {
        if rest.starts_with("http://") || rest.starts_with("https://") {
            rest.to_string()
        } else {
            format!("http:{}", rest)
        }
    } else {
        trimmed.to_string()
    };

    let url = Url::parse(&rewritten)?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if host.eq_ignore_ascii_case("localhost") {
        return Err(UrlValidationError::LocalAddress(host.to_owned()));
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_local_ip(&ip) {
            return Err(UrlValidationError::LocalAddress(ip.to_string()));
        }
    }

    Ok(url.to_string())
}

fn is_local_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_https_accepted() {
        assert_eq!(
            validate_feed_url(" https://example.com/feed.xml ").unwrap(),
            "https://example.com/feed.xml"
        );
    }

    #[test]
    fn test_feed_scheme_rewritten() {
        assert_eq!(
            validate_feed_url("feed://example.com/rss").unwrap(),
            "http://example.com/rss"
        );
        assert_eq!(
            validate_feed_url("feed:https://example.com/rss").unwrap(),
            "https://example.com/rss"
        );
    }

    #[test]
    fn test_other_schemes_rejected() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("ftp://example.com/rss").is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validate_feed_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_local_hosts_rejected() {
        for url in [
            "http://localhost/rss",
            "http://LOCALHOST:8080/rss",
            "http://127.0.0.1/rss",
            "http://10.0.0.1/rss",
            "http://172.16.0.1/rss",
            "http://192.168.1.1:8080/rss",
            "http://169.254.1.1/rss",
            "http://0.0.0.0/rss",
            "http://[::1]/rss",
            "http://[fe80::1]/rss",
            "http://[fd00::1]/rss",
        ] {
            assert!(
                matches!(validate_feed_url(url), Err(UrlValidationError::LocalAddress(_))),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn test_public_ip_accepted() {
        assert!(validate_feed_url("http://93.184.216.34/rss").is_ok());
    }
}
