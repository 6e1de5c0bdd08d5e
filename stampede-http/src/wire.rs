//! HTTP/1.1 framing sizes. hyper does not expose wire counts, so they are estimated from the
//! request and response heads.

pub(super) const CRLF: u64 = 2;
const VERSION: &str = "HTTP/1.1";

pub(super) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

/// `host[:port]`, keeping an explicit port even when it is the scheme default.
pub(super) fn host_header_value(url: &url::Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// `name: value` plus line terminator.
pub(super) fn header_line_bytes(name: &[u8], value: &[u8]) -> u64 {
    (name.len() + ": ".len() + value.len()) as u64 + CRLF
}

/// `METHOD path HTTP/1.1` plus line terminator.
pub(super) fn request_line_bytes(method: &http::Method, path_and_query: &str) -> u64 {
    (method.as_str().len() + 1 + path_and_query.len() + 1 + VERSION.len()) as u64 + CRLF
}

/// Status line, every header line and the blank line ending the head.
pub(super) fn response_head_bytes(status: http::StatusCode, headers: &http::HeaderMap) -> u64 {
    let reason = status.canonical_reason().map_or(0, str::len);
    let status_line = (VERSION.len() + 1 + 3 + 1 + reason) as u64 + CRLF;
    headers
        .iter()
        .map(|(name, value)| header_line_bytes(name.as_str().as_bytes(), value.as_bytes()))
        .fold(status_line, u64::saturating_add)
        .saturating_add(CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_port_is_kept_in_host() {
        let with_port = url::Url::parse("http://127.0.0.1:8080/x").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(host_header_value(&with_port).as_deref(), Some("127.0.0.1:8080"));

        let bare = url::Url::parse("https://example.com/x").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(host_header_value(&bare).as_deref(), Some("example.com"));
    }

    #[test]
    fn get_root_request_line() {
        // "GET / HTTP/1.1\r\n"
        assert_eq!(request_line_bytes(&http::Method::GET, "/"), 16);
    }

    #[test]
    fn response_head_includes_terminating_blank_line() {
        let mut headers = http::HeaderMap::new();
        headers.insert("content-length", http::HeaderValue::from_static("12"));
        // "HTTP/1.1 200 OK\r\n" + "content-length: 12\r\n" + "\r\n"
        assert_eq!(
            response_head_bytes(http::StatusCode::OK, &headers),
            17 + 20 + 2
        );
    }
}
