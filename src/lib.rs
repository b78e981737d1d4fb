//! barrier_web - async HTTP/1.1 server core: connection lifecycle, trie
//! router, middleware pipeline, and WebSocket upgrade.

pub mod config;
pub(crate) mod connection;
pub mod context;
pub mod cookie;
pub(crate) mod errors;
pub mod handler;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod multipart;
pub mod pool;
pub mod ratelimit;
pub mod router;
pub mod server;
pub mod session;
pub mod sync;
pub mod ws;

pub use config::ServerConfig;
pub use context::Context;
pub use handler::{FnHandler, Handler};
pub use middleware::{Middleware, Outcome};
pub use multipart::{MultipartError, MultipartField};
pub use pool::ConnectionPool;
pub use ratelimit::RateLimiter;
pub use router::Router;
pub use server::{BoundServer, Server, ServerBuilder};
pub use session::SessionManager;
pub use sync::{Condvar, Mutex, ReentrantMutex, RwLock, SpinLock};
pub use ws::Frame;
