//! Per-connection state machine: head parse, body ingestion, WebSocket
//! diversion, middleware pipeline + handler dispatch, response
//! serialization, keep-alive loop. One Tokio task per accepted
//! connection, grounded on the teacher's `HttpConnection::impl_run`
//! loop (`examples/AmakeSashaDev-maker_web/src/server/connection.rs`)
//! but generalized from the teacher's fixed worker pool to a
//! spawned-per-connection task (see DESIGN.md Open Question (d)).

use crate::config::{ConnLimits, ReqLimits, RespLimits};
use crate::context::Context;
use crate::errors::ErrorKind;
use crate::handler::Handler;
use crate::http::request::{parse_head, RequestHead};
use crate::http::types::StatusCode;
use crate::middleware::{Middleware, Outcome};
use crate::router::Router;
use crate::session::SessionManager;
use crate::ws;
use memchr::memchr;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Shared, per-server state every connection task reads from. Built
/// once by [`crate::server::Server`] and handed to each spawned task
/// as an `Arc`.
pub(crate) struct ConnectionDeps {
    pub(crate) router: Router<dyn Handler>,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) ws_routes: HashSet<String>,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) session_manager: Option<SessionManager>,
    pub(crate) ws_registry: Arc<ws::registry::Registry>,
    pub(crate) active_connections: AtomicUsize,
    pub(crate) shutdown: AtomicBool,
    pub(crate) drain: crate::sync::Condvar,
    pub(crate) drain_lock: crate::sync::Mutex<()>,
}

impl ConnectionDeps {
    pub(crate) fn mark_closed(&self) {
        let _guard = self.drain_lock.lock();
        self.active_connections.fetch_sub(1, Ordering::AcqRel);
        self.drain.broadcast();
    }
}

/// Handles one accepted connection end to end. Protocol errors (malformed
/// head, oversized headers/body, bad `Connection`/`Transfer-Encoding`)
/// get a wire response per spec.md §7 before the socket closes; a
/// connection that never produced a parseable head (or whose peer just
/// hung up) closes silently, same as the teacher.
pub(crate) async fn handle(mut stream: TcpStream, peer_addr: SocketAddr, deps: Arc<ConnectionDeps>) {
    deps.active_connections.fetch_add(1, Ordering::AcqRel);
    if let Err((err, version)) = run(&mut stream, peer_addr, &deps).await {
        tracing::debug!(error = %err, peer = %peer_addr, "connection closed with error");
        if err.closes_connection() {
            let _ = stream.write_all(err.as_http(version, true)).await;
        }
    }
    deps.mark_closed();
}

async fn run(stream: &mut TcpStream, peer_addr: SocketAddr, deps: &ConnectionDeps) -> Result<(), (ErrorKind, crate::http::types::Version)> {
    use crate::http::types::Version;
    let mut buf: Vec<u8> = Vec::new();

    loop {
        // connection_timeout bounds the idle wait for the next request's
        // head on this keep-alive connection; it is not a request-body or
        // response-write bound.
        let idle_wait = timeout(deps.conn_limits.connection_timeout, read_head(stream, &mut buf, &deps.req_limits, deps.conn_limits.read_buffer_size));
        let Some((head, head_end)) = (match idle_wait.await {
            Ok(result) => result.map_err(|err| (err, Version::Http11))?,
            Err(_) => return Err((ErrorKind::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "connection idle timed out")), Version::Http11)),
        }) else {
            return Ok(());
        };
        let mut consumed = head_end;

        if deps.shutdown.load(Ordering::Acquire) {
            return Err((ErrorKind::ServiceUnavailable, head.version));
        }

        if head.upgrade_to_websocket() && deps.ws_routes.contains(path_str(&head)) {
            return run_websocket(stream, &head, &buf[consumed..], deps)
                .await
                .map_err(|err| (err, head.version));
        }

        let version = head.version;
        let keep_alive_requested = head.keep_alive;

        // request_timeout bounds the whole request from here (head already
        // received) through the response being flushed to the socket.
        let request_deadline = timeout(deps.conn_limits.request_timeout, async {
            let body = read_body(stream, &mut buf, &mut consumed, &head, &deps.req_limits).await?;
            buf.drain(..consumed);
            let response_bytes = dispatch(peer_addr, head, body, deps).await;
            write_all(stream, &response_bytes).await
        });

        match request_deadline.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err((err, version)),
            Err(_) => return Err((ErrorKind::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "request timed out")), version)),
        }

        if !keep_alive_requested || deps.shutdown.load(Ordering::Acquire) {
            return Ok(());
        }
    }
}

fn path_str(head: &RequestHead) -> &str {
    std::str::from_utf8(head.url.path()).unwrap_or("")
}

/// Reads bytes into `buf` until a full head is parsed or the peer
/// closes the connection before one arrives.
async fn read_head(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    limits: &ReqLimits,
    read_buffer_size: usize,
) -> Result<Option<(RequestHead, usize)>, ErrorKind> {
    loop {
        if let Some(result) = parse_head(buf, limits)? {
            return Ok(Some(result));
        }
        let mut chunk = vec![0u8; read_buffer_size];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Reads the request body per spec.md §4.6: `100-continue` interim,
/// chunked transfer-encoding, fixed `Content-Length`, or none.
async fn read_body(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    consumed: &mut usize,
    head: &RequestHead,
    limits: &ReqLimits,
) -> Result<Vec<u8>, ErrorKind> {
    if head.expects_continue() {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
    }

    if head.is_chunked() {
        read_chunked_body(stream, buf, consumed, limits).await
    } else if let Some(len) = head.content_length() {
        if len == 0 {
            return Ok(Vec::new());
        }
        if len > limits.max_body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        read_fixed_body(stream, buf, consumed, len).await
    } else {
        Ok(Vec::new())
    }
}

async fn read_fixed_body(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    consumed: &mut usize,
    len: usize,
) -> Result<Vec<u8>, ErrorKind> {
    while buf.len() - *consumed < len {
        fill_more(stream, buf).await?;
    }
    let body = buf[*consumed..*consumed + len].to_vec();
    *consumed += len;
    Ok(body)
}

/// Reads `hex-size[;ext]\r\n<bytes>\r\n` chunks until a zero-sized
/// chunk, discarding any trailing headers that follow it.
async fn read_chunked_body(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    consumed: &mut usize,
    limits: &ReqLimits,
) -> Result<Vec<u8>, ErrorKind> {
    let mut body = Vec::new();

    loop {
        let line_end = loop {
            if let Some(pos) = memchr(b'\n', &buf[*consumed..]) {
                break *consumed + pos;
            }
            fill_more(stream, buf).await?;
        };
        let mut line = &buf[*consumed..line_end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        let size_str = line.split(|&b| b == b';').next().unwrap_or(line);
        let size_str = std::str::from_utf8(size_str).map_err(|_| ErrorKind::InvalidContentLength)?;
        let size = usize::from_str_radix(size_str.trim(), 16).map_err(|_| ErrorKind::InvalidContentLength)?;
        *consumed = line_end + 1;

        if size == 0 {
            skip_trailers(stream, buf, consumed).await?;
            break;
        }

        if body.len() + size > limits.max_body_size {
            return Err(ErrorKind::BodyTooLarge);
        }

        while buf.len() - *consumed < size + 2 {
            fill_more(stream, buf).await?;
        }
        body.extend_from_slice(&buf[*consumed..*consumed + size]);
        *consumed += size + 2;
    }

    Ok(body)
}

async fn skip_trailers(stream: &mut TcpStream, buf: &mut Vec<u8>, consumed: &mut usize) -> Result<(), ErrorKind> {
    loop {
        let Some(pos) = memchr(b'\n', &buf[*consumed..]) else {
            fill_more(stream, buf).await?;
            continue;
        };
        let line_end = *consumed + pos;
        let blank = line_end == *consumed || (buf[*consumed] == b'\r' && line_end == *consumed + 1);
        *consumed = line_end + 1;
        if blank {
            return Ok(());
        }
    }
}

async fn fill_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<(), ErrorKind> {
    let mut chunk = [0u8; 8 * 1024];
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
        return Err(ErrorKind::from(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid-body",
        )));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

async fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), ErrorKind> {
    stream.write_all(bytes).await?;
    Ok(())
}

/// Finds the route, runs the middleware pipeline then the handler, and
/// serializes the response to bytes.
async fn dispatch(peer_addr: SocketAddr, head: RequestHead, body: Vec<u8>, deps: &ConnectionDeps) -> Vec<u8> {
    let path = String::from_utf8_lossy(head.url.path()).into_owned();
    let method = head.method;
    let matched = deps.router.find(method, &path);

    let version = head.version;
    let mut ctx = Context::new(
        head,
        body,
        matched.as_ref().map(|(_, p)| p.clone()).unwrap_or_default(),
        &deps.req_limits,
        &deps.resp_limits,
    );
    ctx.peer_addr = Some(peer_addr.to_string());
    if let Some(manager) = &deps.session_manager {
        ctx.attach_session_manager(manager.clone());
    }

    let Some((route, _)) = matched else {
        ctx.response.status(StatusCode::NotFound);
        let _ = ctx.response.write_json(&serde_json::json!({
            "error": "not found",
            "code": "NOT_FOUND",
        }));
        ctx.flush_cookies();
        let mut out = Vec::new();
        ctx.response.write_wire(&mut out);
        return out;
    };

    let mut short_circuited = false;
    for mw in deps.middleware.iter().chain(route.middlewares.iter()) {
        match mw.process(&mut ctx).await {
            Outcome::Continue => {}
            Outcome::Respond => {
                short_circuited = true;
                break;
            }
            Outcome::Error(message) => {
                tracing::error!(%message, "middleware error");
                ctx.write_internal_error(&message);
                short_circuited = true;
                break;
            }
        }
    }

    if !short_circuited {
        route.handler.call(&mut ctx).await;
    }

    ctx.flush_cookies();
    let _ = version;
    let mut out = Vec::new();
    ctx.response.write_wire(&mut out);
    out
}

/// Upgrades to WebSocket and runs an echo frame loop per spec.md §4.9/S5:
/// text/binary frames are echoed back, pings answered with pongs, and a
/// close frame gets a matching close reply before the socket shuts down.
async fn run_websocket(
    stream: &mut TcpStream,
    head: &RequestHead,
    leftover: &[u8],
    deps: &ConnectionDeps,
) -> Result<(), ErrorKind> {
    let Some(key) = head.header(b"sec-websocket-key") else {
        return Err(ErrorKind::InvalidHeader);
    };
    stream.write_all(&ws::handshake_response(key)).await?;

    let (id, mut outbound) = deps.ws_registry.register();
    let mut buf = leftover.to_vec();

    let result = loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break Ok(()); };
                if stream.write_all(&frame.encode()).await.is_err() {
                    break Ok(());
                }
            }
            read = read_some(stream) => {
                let Some(chunk) = read? else { break Ok(()); };
                buf.extend_from_slice(&chunk);
                loop {
                    match ws::decode_masked(&buf) {
                        Ok(Some((frame, consumed))) => {
                            buf.drain(..consumed);
                            match frame.opcode {
                                ws::Opcode::Ping => {
                                    let _ = stream.write_all(&ws::Frame::pong(frame.payload).encode()).await;
                                }
                                ws::Opcode::Close => {
                                    let _ = stream.write_all(&ws::Frame::close(frame.close_code()).encode()).await;
                                    deps.ws_registry.unregister(id);
                                    return Ok(());
                                }
                                ws::Opcode::Text | ws::Opcode::Binary => {
                                    deps.ws_registry.broadcast(frame);
                                }
                                ws::Opcode::Pong | ws::Opcode::Continuation => {}
                            }
                        }
                        Ok(None) => break,
                        Err(_) => {
                            deps.ws_registry.unregister(id);
                            return Ok(());
                        }
                    }
                }
            }
        }
    };

    deps.ws_registry.unregister(id);
    result
}

async fn read_some(stream: &mut TcpStream) -> Result<Option<Vec<u8>>, ErrorKind> {
    let mut chunk = [0u8; 4 * 1024];
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(chunk[..n].to_vec()))
}
