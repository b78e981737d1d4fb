//! HTTP/1.1 request-head parser.
//!
//! Grounded on the teacher's `memchr`-driven scanning style
//! (`http/query.rs`, `http/request.rs`) but generalized from a fixed
//! preallocated buffer transmuted to `'static` references into a
//! growable read buffer whose lifetime is scoped to one parse call —
//! the returned [`RequestHead`] owns its data so it can outlive the
//! buffer once the connection loop reuses it for the next request.

use super::types::{slice_to_usize, HeaderMap, Method, Version};
use super::url::Url;
use crate::config::ReqLimits;
use crate::errors::ErrorKind;
use memchr::memchr;

/// A fully parsed request line + header block.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: Method,
    pub url: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub keep_alive: bool,
}

impl RequestHead {
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.header(b"transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case(b"chunked"))
            .unwrap_or(false)
    }

    pub fn expects_continue(&self) -> bool {
        self.header(b"expect")
            .map(|v| v.eq_ignore_ascii_case(b"100-continue"))
            .unwrap_or(false)
    }

    pub fn upgrade_to_websocket(&self) -> bool {
        self.header(b"upgrade")
            .map(|v| v.eq_ignore_ascii_case(b"websocket"))
            .unwrap_or(false)
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while bytes.first() == Some(&b' ') {
        bytes = &bytes[1..];
    }
    while bytes.last() == Some(&b' ') {
        bytes = &bytes[..bytes.len() - 1];
    }
    bytes
}

/// Parses a request head out of `buf`. Returns the head plus the byte
/// offset immediately after the terminating blank line (where the body,
/// if any, begins).
///
/// Returns `Ok(None)` when `buf` does not yet contain a full head (the
/// caller should read more bytes, if `max_header_size` hasn't been
/// exceeded).
pub(crate) fn parse_head(
    buf: &[u8],
    limits: &ReqLimits,
) -> Result<Option<(RequestHead, usize)>, ErrorKind> {
    let search_window = &buf[..buf.len().min(limits.max_header_size)];
    let head_end = match memchr::memmem::find(search_window, b"\r\n\r\n") {
        Some(pos) => pos + 4,
        None => {
            if buf.len() >= limits.max_header_size {
                return Err(ErrorKind::TooManyHeaders);
            }
            return Ok(None);
        }
    };

    let head = &buf[..head_end];

    let (method, method_len) = Method::from_bytes(head)?;
    let rest = &head[method_len..];

    let url_end = memchr(b' ', rest).ok_or(ErrorKind::InvalidUrl)?;
    let target = &rest[..url_end];
    if target.is_empty() || target[0] != b'/' {
        return Err(ErrorKind::InvalidUrl);
    }
    let url = Url::parse(target);

    let after_url = &rest[url_end + 1..];
    let line_end = memchr(b'\n', after_url).ok_or(ErrorKind::InvalidVersion)?;
    let mut version_slice = &after_url[..line_end];
    if version_slice.last() == Some(&b'\r') {
        version_slice = &version_slice[..version_slice.len() - 1];
    }
    let (version, default_keep_alive) = Version::from_bytes(version_slice)?;

    let mut headers = HeaderMap::new();
    let header_block_start = method_len + url_end + 1 + line_end + 1;
    let header_block = &head[header_block_start..];

    let mut keep_alive = default_keep_alive;
    let mut pos = 0usize;
    while pos < header_block.len() {
        let line_len = memchr(b'\n', &header_block[pos..]).ok_or(ErrorKind::InvalidHeader)?;
        let mut line = &header_block[pos..pos + line_len];
        pos += line_len + 1;
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            break;
        }

        if headers.headers.len() >= limits.max_header_count {
            return Err(ErrorKind::TooManyHeaders);
        }

        let colon = memchr(b':', line).ok_or(ErrorKind::InvalidHeader)?;
        let name = &line[..colon];
        if name.is_empty() {
            return Err(ErrorKind::InvalidHeader);
        }
        let mut value = &line[colon + 1..];
        while value.first() == Some(&b' ') {
            value = &value[1..];
        }

        let lowered = name.to_ascii_lowercase();

        if lowered == b"content-length" {
            let len = slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
            headers.content_length = Some(len);
        } else if lowered == b"connection" {
            // A comma-separated token list (RFC 7230 §6.1): WebSocket
            // handshakes send "Upgrade", some clients send "keep-alive,
            // Upgrade". Only "close" anywhere in the list overrides the
            // version default; any other recognized token leaves it as-is.
            for token in value.split(|&b| b == b',') {
                let token = trim_ascii(token);
                if token.eq_ignore_ascii_case(b"close") {
                    keep_alive = false;
                } else if token.eq_ignore_ascii_case(b"keep-alive") {
                    keep_alive = true;
                } else if token.eq_ignore_ascii_case(b"upgrade") {
                    // no-op: upgrade requests carry their own handling
                } else {
                    return Err(ErrorKind::InvalidConnection);
                }
            }
        }

        headers.append(lowered, value.to_vec().into_boxed_slice());
    }

    Ok(Some((
        RequestHead {
            method,
            url,
            version,
            headers,
            keep_alive,
        },
        head_end,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ReqLimits {
        ReqLimits::default()
    }

    #[test]
    fn parses_simple_get() {
        let raw = b"GET /users/42?x=1 HTTP/1.1\r\nHost: example\r\nConnection: keep-alive\r\n\r\n";
        let (head, consumed) = parse_head(raw, &limits()).unwrap().unwrap();

        assert_eq!(head.method, Method::Get);
        assert_eq!(head.url.path(), b"/users/42");
        assert_eq!(head.url.query(b"x"), Some(b"1".as_slice()));
        assert_eq!(head.version, Version::Http11);
        assert!(head.keep_alive);
        assert_eq!(head.header(b"host"), Some(b"example".as_slice()));
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn incomplete_head_returns_none() {
        let raw = b"GET / HTTP/1.1\r\nHost: example\r\n";
        assert!(parse_head(raw, &limits()).unwrap().is_none());
    }

    #[test]
    fn default_keep_alive_depends_on_version() {
        let http11 = b"GET / HTTP/1.1\r\n\r\n";
        let (head, _) = parse_head(http11, &limits()).unwrap().unwrap();
        assert!(head.keep_alive);

        let http10 = b"GET / HTTP/1.0\r\n\r\n";
        let (head, _) = parse_head(http10, &limits()).unwrap().unwrap();
        assert!(!head.keep_alive);
    }

    #[test]
    fn connection_close_overrides_default() {
        let raw = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let (head, _) = parse_head(raw, &limits()).unwrap().unwrap();
        assert!(!head.keep_alive);
    }

    #[test]
    fn connection_upgrade_is_tolerated_for_websocket_handshakes() {
        let raw = b"GET /ws HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\nUpgrade: websocket\r\n\r\n";
        let (head, _) = parse_head(raw, &limits()).unwrap().unwrap();
        assert!(head.keep_alive);
        assert!(head.upgrade_to_websocket());
    }

    #[test]
    fn content_length_is_parsed() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        let (head, _) = parse_head(raw, &limits()).unwrap().unwrap();
        assert_eq!(head.content_length(), Some(5));
    }

    #[test]
    fn invalid_method_is_rejected() {
        let raw = b"GARBAGE / HTTP/1.1\r\n\r\n";
        assert_eq!(parse_head(raw, &limits()), Err(ErrorKind::InvalidMethod));
    }

    #[test]
    fn oversized_header_block_is_rejected() {
        let mut limits = limits();
        limits.max_header_size = 16;
        let raw = b"GET /a-long-path-here HTTP/1.1\r\n\r\n";
        assert_eq!(parse_head(raw, &limits), Err(ErrorKind::TooManyHeaders));
    }
}
