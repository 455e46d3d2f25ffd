//! Header rewriting shared by the reverse proxy and the tunnel.
use std::net::SocketAddr;

use http::{HeaderMap, HeaderName, HeaderValue, header};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Hop-by-hop headers (RFC 9110 §7.6.1 plus the legacy proxy ones).
static HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Append the client IP to the `X-Forwarded-For` chain, or start one.
///
/// Every existing field line is folded into a single comma separated value.
/// Without a known peer address the headers are left untouched.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_addr: Option<SocketAddr>) {
    let Some(client_addr) = client_addr else {
        return;
    };
    let client_ip = client_addr.ip().to_string();

    let chain: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    let value = if chain.is_empty() {
        client_ip
    } else {
        format!("{}, {client_ip}", chain.join(", "))
    };

    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(X_FORWARDED_FOR, value);
        }
        Err(e) => tracing::debug!("Skipping unrepresentable X-Forwarded-For {value:?}: {e}"),
    }
}

/// Strip connection-scoped headers before a message crosses the proxy.
///
/// Headers named by `Connection` go too. `TE: trailers` is kept on requests
/// since it is end-to-end in practice.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    let keep_trailers = headers
        .get_all(header::TE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("trailers"));

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }

    if keep_trailers {
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Option<SocketAddr> {
        Some("192.0.2.10:51234".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_is_set_when_absent() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, client());
        assert_eq!(headers[&X_FORWARDED_FOR], "192.0.2.10");
    }

    #[test]
    fn test_forwarded_for_chain_is_extended() {
        let mut headers = HeaderMap::new();
        headers.append(&X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.1"));
        headers.append(&X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.7"));

        append_forwarded_for(&mut headers, client());

        let values: Vec<_> = headers.get_all(&X_FORWARDED_FOR).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "203.0.113.1, 198.51.100.7, 192.0.2.10");
    }

    #[test]
    fn test_forwarded_for_ipv6_has_no_brackets() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, Some("[::1]:8080".parse().unwrap()));
        assert_eq!(headers[&X_FORWARDED_FOR], "::1");
    }

    #[test]
    fn test_unknown_peer_leaves_headers_alone() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, None);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        remove_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_te_trailers_survives() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TE, HeaderValue::from_static("gzip, trailers"));

        remove_hop_by_hop(&mut headers);

        assert_eq!(headers[header::TE], "trailers");
    }
}
