//! Trie router: literal/param/wildcard edges, per-route middleware
//! chains. Grounded on `kowito-chopin/chopin/src/router.rs`'s child-list
//! structure, adapted to own `String` segments (the source's `RouteMatch`
//! borrows from the router and caps params in a fixed array; this
//! version returns an owned params map and a real multi-segment
//! wildcard, since sessions/logging need params to outlive the route
//! match) and to collapse a second param child into the first instead
//! of erroring (spec.md §4.2 edge cases).

use crate::errors::RouterError;
use crate::http::types::Method;
use crate::middleware::Middleware;
use std::collections::HashMap;
use std::sync::Arc;

/// A matched route: its handler plus the middleware chain registered
/// for it at `add_route` time.
pub struct Route<H: ?Sized> {
    pub handler: Arc<H>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl<H: ?Sized> Clone for Route<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            middlewares: self.middlewares.clone(),
        }
    }
}

struct RouteNode<H: ?Sized> {
    literal_children: HashMap<String, RouteNode<H>>,
    param_child: Option<Box<RouteNode<H>>>,
    param_name: Option<String>,
    wildcard_child: Option<Box<RouteNode<H>>>,
    wildcard_name: Option<String>,
    terminal: HashMap<Method, Route<H>>,
}

impl<H: ?Sized> RouteNode<H> {
    fn new() -> Self {
        Self {
            literal_children: HashMap::new(),
            param_child: None,
            param_name: None,
            wildcard_child: None,
            wildcard_name: None,
            terminal: HashMap::new(),
        }
    }
}

impl<H: ?Sized> Default for RouteNode<H> {
    fn default() -> Self {
        Self::new()
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str),
    Wildcard(&'a str),
}

fn segments(path: &str) -> impl Iterator<Item = Segment<'_>> {
    path.split('/').filter(|s| !s.is_empty()).map(|s| {
        if let Some(name) = s.strip_prefix(':') {
            Segment::Param(name)
        } else if let Some(name) = s.strip_prefix('*') {
            Segment::Wildcard(name)
        } else {
            Segment::Literal(s)
        }
    })
}

/// A radix tree of path segments, one per HTTP method at each terminal.
pub struct Router<H: ?Sized> {
    root: RouteNode<H>,
}

impl<H: ?Sized> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> Router<H> {
    pub fn new() -> Self {
        Self {
            root: RouteNode::new(),
        }
    }

    /// Registers `handler` for `method` at `path`. A wildcard segment
    /// must be the last segment. `path` must be non-empty: use `"/"` for
    /// the root route.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        handler: Arc<H>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Result<(), RouterError> {
        if path.is_empty() {
            return Err(RouterError::EmptyPattern);
        }

        let mut node = &mut self.root;
        let mut iter = segments(path).peekable();

        while let Some(segment) = iter.next() {
            let is_last = iter.peek().is_none();
            match segment {
                Segment::Literal(literal) => {
                    node = node
                        .literal_children
                        .entry(literal.to_string())
                        .or_insert_with(RouteNode::new);
                }
                Segment::Param(name) => {
                    if node.param_child.is_none() {
                        node.param_child = Some(Box::new(RouteNode::new()));
                        node.param_name = Some(name.to_string());
                    }
                    // A second `:other` at the same position collapses
                    // onto the existing param child (spec.md §4.2).
                    node = node.param_child.as_mut().unwrap();
                }
                Segment::Wildcard(name) => {
                    if !is_last {
                        return Err(RouterError::WildcardNotTerminal);
                    }
                    let child = node
                        .wildcard_child
                        .get_or_insert_with(|| Box::new(RouteNode::new()));
                    node.wildcard_name = Some(name.to_string());
                    node = child;
                }
            }
        }

        node.terminal.insert(
            method,
            Route {
                handler,
                middlewares,
            },
        );
        Ok(())
    }

    /// Looks up a handler for `method`/`path`, returning it plus the
    /// bound param map. `None` covers both "no such path" and "path
    /// exists but not for this method" (404 semantics either way).
    pub fn find(&self, method: Method, path: &str) -> Option<(Route<H>, HashMap<String, String>)> {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();
        let route = self.match_node(&self.root, method, &segs, &mut params)?;
        Some((route, params))
    }

    fn match_node(
        &self,
        node: &RouteNode<H>,
        method: Method,
        segs: &[&str],
        params: &mut HashMap<String, String>,
    ) -> Option<Route<H>> {
        let Some((head, tail)) = segs.split_first() else {
            return node.terminal.get(&method).cloned();
        };

        if let Some(child) = node.literal_children.get(*head) {
            if let Some(route) = self.match_node(child, method, tail, params) {
                return Some(route);
            }
        }

        if let Some(child) = &node.param_child {
            let name = node.param_name.clone().unwrap_or_default();
            let previous = params.insert(name.clone(), (*head).to_string());
            if let Some(route) = self.match_node(child, method, tail, params) {
                return Some(route);
            }
            match previous {
                Some(value) => {
                    params.insert(name, value);
                }
                None => {
                    params.remove(&name);
                }
            }
        }

        if let Some(child) = &node.wildcard_child {
            let name = node.wildcard_name.clone().unwrap_or_default();
            params.insert(name, segs.join("/"));
            return child.terminal.get(&method).cloned();
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    fn router() -> Router<NoopHandler> {
        Router::new()
    }

    #[test]
    fn matches_literal_path() {
        let mut r = router();
        r.add_route(Method::Get, "/hello/world", Arc::new(NoopHandler), vec![]).unwrap();

        assert!(r.find(Method::Get, "/hello/world").is_some());
        assert!(r.find(Method::Get, "/hello").is_none());
        assert!(r.find(Method::Post, "/hello/world").is_none());
    }

    #[test]
    fn root_matches_empty_path() {
        let mut r = router();
        r.add_route(Method::Get, "/", Arc::new(NoopHandler), vec![]).unwrap();
        assert!(r.find(Method::Get, "/").is_some());
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let mut r = router();
        let err = r.add_route(Method::Get, "", Arc::new(NoopHandler), vec![]).unwrap_err();
        assert_eq!(err, RouterError::EmptyPattern);
    }

    #[test]
    fn binds_param_segments() {
        let mut r = router();
        r.add_route(Method::Get, "/users/:id", Arc::new(NoopHandler), vec![]).unwrap();

        let (_, params) = r.find(Method::Get, "/users/42").unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn literal_takes_precedence_over_param() {
        let mut r = router();
        r.add_route(Method::Get, "/users/:id", Arc::new(NoopHandler), vec![]).unwrap();
        r.add_route(Method::Get, "/users/me", Arc::new(NoopHandler), vec![]).unwrap();

        let (_, params) = r.find(Method::Get, "/users/me").unwrap();
        assert!(params.is_empty(), "literal match should not bind a param");

        let (_, params) = r.find(Method::Get, "/users/42").unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn wildcard_consumes_remainder() {
        let mut r = router();
        r.add_route(Method::Get, "/assets/*path", Arc::new(NoopHandler), vec![]).unwrap();

        let (_, params) = r.find(Method::Get, "/assets/js/app.js").unwrap();
        assert_eq!(params.get("path"), Some(&"js/app.js".to_string()));
    }

    #[test]
    fn wildcard_must_be_terminal() {
        let mut r = router();
        let err = r
            .add_route(Method::Get, "/assets/*path/more", Arc::new(NoopHandler), vec![])
            .unwrap_err();
        assert!(matches!(err, RouterError::WildcardNotTerminal));
    }

    #[test]
    fn second_param_child_collapses_onto_first() {
        let mut r = router();
        r.add_route(Method::Get, "/a/:id", Arc::new(NoopHandler), vec![]).unwrap();
        r.add_route(Method::Post, "/a/:other", Arc::new(NoopHandler), vec![]).unwrap();

        let (_, params) = r.find(Method::Get, "/a/1").unwrap();
        assert_eq!(params.get("id"), Some(&"1".to_string()));
        let (_, params) = r.find(Method::Post, "/a/1").unwrap();
        assert_eq!(params.get("id"), Some(&"1".to_string()));
    }

    #[test]
    fn most_recently_added_handler_for_same_route_wins() {
        let mut r = router();
        r.add_route(Method::Get, "/x", Arc::new(NoopHandler), vec![]).unwrap();
        r.add_route(Method::Get, "/x", Arc::new(NoopHandler), vec![]).unwrap();
        assert!(r.find(Method::Get, "/x").is_some());
    }
}
