//! `Server`/`ServerBuilder`: the accept loop, builder-style wiring of
//! router/middleware/sessions, and graceful shutdown. Grounded on the
//! teacher's `Server::builder()`/`ServerBuilder` shape
//! (`examples/AmakeSashaDev-maker_web/src/server/server_impl.rs`),
//! adapted from its fixed connection-queue + worker-pool launch loop to
//! a plain accept-and-spawn loop (see DESIGN.md Open Question (d)).

use crate::config::ServerConfig;
use crate::connection::{self, ConnectionDeps};
use crate::handler::Handler;
use crate::http::types::Method;
use crate::middleware::Middleware;
use crate::router::Router;
use crate::session::SessionManager;
use crate::sync::{Condvar, Mutex};
use crate::ws;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for a [`Server`]. The router, global middleware, and
/// WebSocket path allowlist are assembled here before `build()` freezes
/// them into the `Arc<ConnectionDeps>` every connection task shares.
pub struct ServerBuilder {
    config: ServerConfig,
    router: Router<dyn Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
    ws_routes: HashSet<String>,
    session_manager: Option<SessionManager>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            middleware: Vec::new(),
            ws_routes: HashSet::new(),
            session_manager: None,
        }
    }

    /// Registers `handler` for `method`/`path`, with any per-route
    /// middleware. Panics on a malformed route pattern (a non-terminal
    /// wildcard) — a programmer error caught at startup, same as the
    /// teacher's `.handler()` builder step failing fast.
    pub fn route(mut self, method: Method, path: &str, handler: impl Handler + 'static) -> Self {
        self.router
            .add_route(method, path, Arc::new(handler), Vec::new())
            .unwrap_or_else(|err| panic!("invalid route {path}: {err}"));
        self
    }

    /// Registers `handler` for `method`/`path` behind `middlewares`, run
    /// after the global middleware chain and before the handler.
    pub fn route_with_middleware(
        mut self,
        method: Method,
        path: &str,
        handler: impl Handler + 'static,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        self.router
            .add_route(method, path, Arc::new(handler), middlewares)
            .unwrap_or_else(|err| panic!("invalid route {path}: {err}"));
        self
    }

    /// Appends a global middleware, run for every request ahead of any
    /// per-route middleware.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Marks `path` as a WebSocket endpoint (spec.md §4.9's "map `path
    /// → handler`" — the handler itself is the echo loop in
    /// [`connection::run_websocket`](crate::connection)).
    pub fn websocket(mut self, path: impl Into<String>) -> Self {
        self.ws_routes.insert(path.into());
        self
    }

    /// Enables session cooperation on `Context`, backed by
    /// `config.session`.
    pub fn with_sessions(mut self) -> Self {
        self.session_manager = Some(SessionManager::new(self.config.session.clone()));
        self
    }

    /// Installs the per-client rate limiter (`config.rate_limit`) as a
    /// global middleware, ahead of any other middleware registered so far.
    pub fn with_rate_limit(mut self) -> Self {
        self.middleware.insert(
            0,
            Arc::new(crate::ratelimit::RateLimitMiddleware::new(self.config.rate_limit.clone())),
        );
        self
    }

    pub fn build(self) -> Server {
        if self.config.enable_logging {
            crate::logging::init_tracing(&self.config.log_level);
        }

        let deps = Arc::new(ConnectionDeps {
            router: self.router,
            middleware: self.middleware,
            ws_routes: self.ws_routes,
            conn_limits: self.config.conn.clone(),
            req_limits: self.config.req.clone(),
            resp_limits: self.config.resp.clone(),
            session_manager: self.session_manager,
            ws_registry: Arc::new(ws::registry::Registry::new()),
            active_connections: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            drain: Condvar::new(),
            drain_lock: Mutex::new(()),
        });
        Server {
            host: self.config.host,
            port: self.config.port,
            deps,
        }
    }
}

/// A server ready to bind, built from a [`ServerBuilder`].
pub struct Server {
    host: std::net::IpAddr,
    port: u16,
    deps: Arc<ConnectionDeps>,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Binds the listening socket. Separated from [`BoundServer::serve`]
    /// so callers (and tests) can read back the bound address, e.g.
    /// after requesting an ephemeral port with `config.port = 0`.
    ///
    /// Sets `SO_REUSEADDR` before binding so a restarted process doesn't
    /// have to wait out `TIME_WAIT` on the previous listener.
    pub async fn bind(self) -> io::Result<BoundServer> {
        let addr = std::net::SocketAddr::new(self.host, self.port);
        let domain = socket2::Domain::for_address(addr);
        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        let listener = TcpListener::from_std(socket.into())?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        Ok(BoundServer {
            listener,
            deps: self.deps,
        })
    }

    /// Binds and immediately serves, the common case for a running
    /// process that doesn't need the bound address back.
    pub async fn serve(self) -> io::Result<()> {
        self.bind().await?.serve().await
    }
}

/// A bound-but-not-yet-serving HTTP server. `serve()` runs the accept
/// loop until a Ctrl-C signal triggers graceful shutdown.
pub struct BoundServer {
    listener: TcpListener,
    deps: Arc<ConnectionDeps>,
}

impl BoundServer {
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> io::Result<()> {
        if let Some(manager) = &self.deps.session_manager {
            manager.spawn_reaper();
        }

        tokio::select! {
            _ = accept_loop(self.listener, self.deps.clone()) => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::warn!(%err, "failed to listen for ctrl-c");
                }
                tracing::info!("shutdown requested, draining connections");
                self.deps.shutdown.store(true, Ordering::Release);
                wait_for_drain(self.deps.clone()).await;
            }
        }

        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, deps: Arc<ConnectionDeps>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let deps = deps.clone();
                tokio::spawn(async move {
                    connection::handle(stream, peer_addr, deps).await;
                });
            }
            Err(err) => {
                tracing::warn!(%err, "accept failed");
            }
        }
    }
}

/// Blocks (on a dedicated thread, via `spawn_blocking`) until
/// `active_connections` reaches zero, bounded by
/// `conn.shutdown_drain_timeout`. The crate's own [`Condvar`] is a
/// genuine blocking primitive (futex parking on Linux), so it must not
/// run directly on the async executor.
async fn wait_for_drain(deps: Arc<ConnectionDeps>) {
    let timeout_dur = deps.conn_limits.shutdown_drain_timeout;
    let handle = tokio::task::spawn_blocking(move || {
        let mut guard = deps.drain_lock.lock();
        while deps.active_connections.load(Ordering::Acquire) > 0 {
            guard = deps.drain.wait(guard, &deps.drain_lock);
        }
    });

    if tokio::time::timeout(timeout_dur, handle).await.is_err() {
        tracing::warn!("graceful shutdown timed out waiting for connections to drain");
    }
}
