//! Middleware pipeline: an ordered list of virtual-dispatched processors
//! that each get a chance to observe/mutate the request before the
//! handler runs, and may short-circuit the pipeline.

use crate::context::Context;
use std::future::Future;
use std::pin::Pin;

/// Result of running one middleware's `process` step.
pub enum Outcome {
    /// Proceed to the next middleware (or the handler).
    Continue,
    /// Stop the pipeline; the response currently staged on the context
    /// is serialized as-is.
    Respond,
    /// Stop the pipeline and log/report `message` at error level; the
    /// connection loop maps this to a 500 JSON response if the handler
    /// hasn't already written one.
    Error(String),
}

/// A pipeline stage. Implementors observe and may mutate `ctx` (most
/// commonly its `Response`) before returning an [`Outcome`].
///
/// `destroy` gives the server a virtual teardown hook so it can drop
/// heterogeneous middleware objects it owns through `Arc<dyn Middleware>`
/// without needing a concrete type — mirrors the capability split in
/// spec.md §4.3. The default no-op is correct for middleware with no
/// resources beyond what `Drop` already handles.
pub trait Middleware: Send + Sync {
    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

    fn destroy(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReqLimits, RespLimits};
    use crate::http::request::RequestHead;
    use crate::http::types::{Method, Version};
    use crate::http::url::Url;

    struct RejectAll;

    impl Middleware for RejectAll {
        fn process<'a>(
            &'a self,
            ctx: &'a mut Context,
        ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
            Box::pin(async move {
                ctx.response.status = crate::http::types::StatusCode::Unauthorized;
                Outcome::Respond
            })
        }
    }

    fn sample_head() -> RequestHead {
        RequestHead {
            method: Method::Get,
            url: Url::parse(b"/protected"),
            version: Version::Http11,
            headers: Default::default(),
            keep_alive: true,
        }
    }

    #[tokio::test]
    async fn short_circuit_sets_response() {
        let limits = ReqLimits::default();
        let resp_limits = RespLimits::default();
        let mut ctx = Context::new(sample_head(), Vec::new(), Default::default(), &limits, &resp_limits);
        let mw = RejectAll;
        let outcome = mw.process(&mut ctx).await;
        assert!(matches!(outcome, Outcome::Respond));
        assert_eq!(ctx.response.status, crate::http::types::StatusCode::Unauthorized);
    }
}
