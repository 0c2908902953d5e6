//! Per-request context types.
//!
//! These live in the request's extension map and are read back by the
//! middleware chain: the client type is stamped by an upstream collaborator
//! (the API gateway or auth layer), the authenticated user by whatever handler
//! or middleware resolved credentials. Nothing here is shared across requests.

use std::fmt;
use std::net::SocketAddr;

use http::HeaderMap;

/// Header carrying the correlation identifier on requests and responses.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Which kind of client issued a request.
///
/// Resolved from a request extension set earlier in the chain; requests
/// without one are attributed to the web client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    /// Browser traffic
    Web,
    /// iOS application
    MobileIos,
    /// Android application
    MobileAndroid,
    /// A collaborator stamped a value this layer does not recognize
    Unknown,
}

impl ClientType {
    /// Stable label used in metrics and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::MobileIos => "mobile-ios",
            Self::MobileAndroid => "mobile-android",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a collaborator-provided label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "web" => Self::Web,
            "mobile-ios" => Self::MobileIos,
            "mobile-android" => Self::MobileAndroid,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of the authenticated user, inserted into the response
/// extensions by the auth collaborator when credentials resolved.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// Best-effort client IP: first entry of `X-Forwarded-For`, falling back to
/// the direct peer address.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_client_type_labels_round_trip() {
        for ct in [
            ClientType::Web,
            ClientType::MobileIos,
            ClientType::MobileAndroid,
        ] {
            assert_eq!(ClientType::from_label(ct.as_str()), ct);
        }
        assert_eq!(ClientType::from_label("smart-fridge"), ClientType::Unknown);
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.7:443".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.7");
    }

    #[test]
    fn test_client_ip_unknown_when_nothing_available() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None), "unknown");
    }

    #[test]
    fn test_client_ip_empty_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        let peer: SocketAddr = "192.0.2.7:443".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.7");
    }
}
