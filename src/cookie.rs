//! Cookie jar: lazy parse of the request's `Cookie` header, and
//! `Set-Cookie` construction for outgoing responses.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    values: HashMap<String, String>,
}

impl CookieJar {
    /// Parses a raw `Cookie: a=1; b=2` header value. Malformed pairs
    /// (no `=`) are skipped rather than failing the whole jar.
    pub(crate) fn parse(header: &[u8]) -> Self {
        let text = String::from_utf8_lossy(header);
        let mut values = HashMap::new();
        for part in text.split(';') {
            let part = part.trim();
            if let Some((name, value)) = part.split_once('=') {
                values.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }
}

/// Attributes for a `Set-Cookie` header, built from [`crate::config::SessionConfig`]
/// or ad hoc by handler code.
#[derive(Debug, Clone)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<&'static str>,
    pub path: &'static str,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
            path: "/",
        }
    }

    pub(crate) fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            out.push_str(&format!("; SameSite={}", same_site));
        }
        out
    }

    /// A cookie whose immediate expiry clears it from the client.
    pub(crate) fn expired(name: impl Into<String>) -> Self {
        Self {
            max_age: Some(0),
            ..Self::new(name, "")
        }
    }
}
