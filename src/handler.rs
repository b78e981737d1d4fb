//! Route handlers: the terminal stage of the middleware pipeline.
//!
//! Mirrors [`crate::middleware::Middleware`]'s dyn-compatible shape so a
//! [`Router`](crate::router::Router) can hold `Arc<dyn Handler>` across
//! heterogeneous handlers, the way `Route::middlewares` already holds
//! `Arc<dyn Middleware>`.

use crate::context::Context;
use std::future::Future;
use std::pin::Pin;

/// Handles a matched request by writing into `ctx.response`.
pub trait Handler: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Adapts a closure returning a boxed future into a [`Handler`], so
/// routes don't need a hand-written trait impl for the common case.
/// Callers box their own async block, the same way `Middleware` impls
/// do (`FnHandler(|ctx| Box::pin(async move { ... }))`).
pub struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        (self.0)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReqLimits, RespLimits};
    use crate::http::request::RequestHead;
    use crate::http::types::{Method, StatusCode, Version};
    use crate::http::url::Url;

    fn sample_head() -> RequestHead {
        RequestHead {
            method: Method::Get,
            url: Url::parse(b"/"),
            version: Version::Http11,
            headers: Default::default(),
            keep_alive: true,
        }
    }

    #[tokio::test]
    async fn fn_handler_adapts_an_async_closure() {
        let limits = ReqLimits::default();
        let resp_limits = RespLimits::default();
        let mut ctx = Context::new(sample_head(), Vec::new(), Default::default(), &limits, &resp_limits);
        fn set_created(ctx: &mut Context) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                ctx.response.status = StatusCode::Created;
            })
        }
        let handler = FnHandler(set_created);
        handler.call(&mut ctx).await;
        assert_eq!(ctx.response.status, StatusCode::Created);
    }
}
