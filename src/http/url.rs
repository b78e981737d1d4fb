//! Parsed request target: path segments plus the query string.

use super::query::Query;
use memchr::memchr_iter;

/// A parsed URL, owning its bytes rather than borrowing the connection's
/// read buffer — segments outlive the request (router params, logging,
/// context accessors all need that).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct Url {
    pub(crate) target: Box<[u8]>,
    pub(crate) path: Box<[u8]>,
    pub(crate) parts: Vec<Box<[u8]>>,
    pub(crate) query: Option<Box<[u8]>>,
    pub(crate) query_parts: Vec<(Box<[u8]>, Box<[u8]>)>,
}

impl Url {
    /// Parses `target` (the raw request-line target, e.g.
    /// `/api/users/123?sort=name`) into path segments and query pairs.
    pub(crate) fn parse(target: &[u8]) -> Self {
        let (path, query) = match memchr::memchr(b'?', target) {
            Some(pos) => (&target[..pos], Some(&target[pos + 1..])),
            None => (target, None),
        };

        let mut parts = Vec::new();
        let mut last = 0;
        for index in memchr_iter(b'/', path) {
            if index > last {
                parts.push(path[last..index].to_vec().into_boxed_slice());
            }
            last = index + 1;
        }
        if last < path.len() {
            parts.push(path[last..].to_vec().into_boxed_slice());
        }

        let query_parts: Vec<(&[u8], &[u8])> = query
            .and_then(|q| Query::parse(q, q.len()).ok())
            .unwrap_or_default();
        let query_parts = query_parts
            .into_iter()
            .map(|(k, v)| (k.to_vec().into_boxed_slice(), v.to_vec().into_boxed_slice()))
            .collect();

        Url {
            target: target.to_vec().into_boxed_slice(),
            path: path.to_vec().into_boxed_slice(),
            parts,
            query: query.map(|q| q.to_vec().into_boxed_slice()),
            query_parts,
        }
    }

    pub fn target(&self) -> &[u8] {
        &self.target
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn path_segment(&self, index: usize) -> Option<&[u8]> {
        self.parts.get(index).map(|p| p.as_ref())
    }

    pub fn path_segments(&self) -> impl Iterator<Item = &[u8]> {
        self.parts.iter().map(|p| p.as_ref())
    }

    pub fn query_full(&self) -> Option<&[u8]> {
        self.query.as_deref()
    }

    /// First value for `key`, case-sensitive, per RFC 3986 query semantics.
    pub fn query(&self, key: &[u8]) -> Option<&[u8]> {
        self.query_parts
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let url = Url::parse(b"/api/users/123?sort=name&debug");
        assert_eq!(url.path(), b"/api/users/123");
        assert_eq!(
            url.path_segments().collect::<Vec<_>>(),
            vec![b"api".as_slice(), b"users".as_slice(), b"123".as_slice()]
        );
        assert_eq!(url.query(b"sort"), Some(b"name".as_slice()));
        assert_eq!(url.query(b"debug"), Some(b"".as_slice()));
        assert_eq!(url.query(b"missing"), None);
    }

    #[test]
    fn root_path_has_no_segments() {
        let url = Url::parse(b"/");
        assert!(url.path_segments().next().is_none());
    }

    #[test]
    fn ignores_empty_segments() {
        let url = Url::parse(b"//a//b/");
        assert_eq!(
            url.path_segments().collect::<Vec<_>>(),
            vec![b"a".as_slice(), b"b".as_slice()]
        );
    }
}
