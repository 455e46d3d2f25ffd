use http::{HeaderMap, header};

/// Classify a request as a WebSocket upgrade handshake.
///
/// True when a `Connection` token equals `upgrade` and an `Upgrade` token
/// equals `websocket`. Tokens are comma separated, trimmed and compared
/// case-insensitively across every field line of each header.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    header_has_token(headers, header::CONNECTION, "upgrade")
        && header_has_token(headers, header::UPGRADE, "websocket")
}

fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_keep_alive_upgrade_is_detected() {
        let h = headers(&[("connection", "keep-alive, Upgrade"), ("upgrade", "websocket")]);
        assert!(is_upgrade_request(&h));
    }

    #[test]
    fn test_token_match_is_case_insensitive() {
        let h = headers(&[("connection", "UPGRADE"), ("upgrade", "WebSocket")]);
        assert!(is_upgrade_request(&h));
    }

    #[test]
    fn test_single_header_is_not_enough() {
        assert!(!is_upgrade_request(&headers(&[("connection", "upgrade")])));
        assert!(!is_upgrade_request(&headers(&[("upgrade", "websocket")])));
        assert!(!is_upgrade_request(&HeaderMap::new()));
    }

    #[test]
    fn test_other_upgrade_protocols_are_ignored() {
        let h = headers(&[("connection", "upgrade"), ("upgrade", "h2c")]);
        assert!(!is_upgrade_request(&h));
    }

    #[test]
    fn test_tokens_across_multiple_field_lines() {
        let h = headers(&[
            ("connection", "keep-alive"),
            ("connection", " upgrade "),
            ("upgrade", "h2c, websocket"),
        ]);
        assert!(is_upgrade_request(&h));
    }

    #[test]
    fn test_substring_does_not_match() {
        let h = headers(&[("connection", "upgrade-insecure"), ("upgrade", "websockets")]);
        assert!(!is_upgrade_request(&h));
    }
}
