//! Response builder: status + header map + body buffer + wire
//! serializer, generalized from the teacher's `'static`-backed
//! `set_status_codes!` macro table to owned, per-request buffers.

use super::types::{HeaderMap, StatusCode, Version};
use crate::config::RespLimits;

/// The response under construction for one request. Lives on the
/// [`crate::context::Context`] and is serialized exactly once, at the
/// end of the connection loop's dispatch step.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
}

impl Response {
    pub(crate) fn new(limits: &RespLimits, version: Version, keep_alive: bool) -> Self {
        Self {
            status: StatusCode::Ok,
            headers: HeaderMap::new(),
            body: Vec::with_capacity(limits.default_capacity.min(limits.max_capacity)),
            version,
            keep_alive,
        }
    }

    /// Resets status, headers, and body to their defaults, preserving
    /// the protocol version/keep-alive negotiated for this connection.
    pub fn reset(&mut self) {
        self.status = StatusCode::Ok;
        self.headers.reset();
        self.body.clear();
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_header(&mut self, name: impl Into<Box<[u8]>>, value: impl Into<Box<[u8]>>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Appends a header without removing prior entries of the same
    /// name — used for `Set-Cookie`.
    pub fn add_header(&mut self, name: impl Into<Box<[u8]>>, value: impl Into<Box<[u8]>>) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// Appends raw bytes to the body.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.body.extend_from_slice(data.as_ref());
        self
    }

    /// Sets the body to `text`, replacing any previous content.
    pub fn body(&mut self, text: impl AsRef<[u8]>) -> &mut Self {
        self.body.clear();
        self.write(text)
    }

    /// Serializes `value` as the body and sets
    /// `Content-Type: application/json; charset=utf-8`.
    pub fn write_json<T: serde::Serialize>(&mut self, value: &T) -> Result<&mut Self, serde_json::Error> {
        self.body.clear();
        serde_json::to_writer(&mut self.body, value)?;
        self.set_header(
            &b"content-type"[..],
            &b"application/json; charset=utf-8"[..],
        );
        Ok(self)
    }

    /// Serializes the HTTP/1.1 response onto `out`: status line,
    /// `Content-Length`, `Connection`, a `Server` banner, the remaining
    /// headers in insertion order, the blank line, then the body.
    pub(crate) fn write_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.status.into_first_line(self.version));
        out.extend_from_slice(b"content-length: ");
        out.extend_from_slice(self.body.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"connection: ");
        out.extend_from_slice(if self.keep_alive { b"keep-alive" } else { b"close" });
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(b"server: barrier_web\r\n");

        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case(b"content-length")
                || name.eq_ignore_ascii_case(b"connection")
                || name.eq_ignore_ascii_case(b"server")
            {
                continue;
            }
            out.extend_from_slice(name);
            out.extend_from_slice(b": ");
            out.extend_from_slice(value);
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_includes_content_length_and_keep_alive() {
        let limits = RespLimits::default();
        let mut resp = Response::new(&limits, Version::Http11, true);
        resp.status(StatusCode::Ok).body("hello");

        let mut out = Vec::new();
        resp.write_wire(&mut out);
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn write_json_sets_content_type() {
        let limits = RespLimits::default();
        let mut resp = Response::new(&limits, Version::Http11, false);
        resp.write_json(&serde_json::json!({"id": "42"})).unwrap();

        assert_eq!(
            resp.headers.get(b"content-type"),
            Some(&b"application/json; charset=utf-8"[..])
        );
        assert_eq!(resp.body, br#"{"id":"42"}"#);
    }

    #[test]
    fn reset_clears_status_headers_and_body() {
        let limits = RespLimits::default();
        let mut resp = Response::new(&limits, Version::Http11, true);
        resp.status(StatusCode::NotFound).set_header(&b"x"[..], &b"y"[..]).body("x");
        resp.reset();

        assert_eq!(resp.status, StatusCode::Ok);
        assert!(resp.body.is_empty());
        assert_eq!(resp.headers.get(b"x"), None);
    }
}
