//! End-to-end scenarios over a real bound socket, one per spec.md §8
//! case (S6's pool-reuse scenario is covered at the unit level in
//! `src/pool/mod.rs`, which doesn't need a live HTTP server).

use barrier_web::http::types::{Method, StatusCode};
use barrier_web::middleware::{Middleware, Outcome};
use barrier_web::{Context, FnHandler, Server, ServerConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = vec![0u8; 64 * 1024];
    let n = stream.read(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

fn fn_handler(
    f: fn(&mut Context) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>,
) -> FnHandler<fn(&mut Context) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>> {
    FnHandler(f)
}

#[tokio::test]
async fn s1_keep_alive_pair_reuses_the_connection() {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let server = Server::builder(config)
        .route(
            Method::Get,
            "/ping",
            fn_handler(|ctx| {
                Box::pin(async move {
                    ctx.response.status(StatusCode::Ok).body("pong");
                })
            }),
        )
        .build();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    tokio::spawn(bound.serve());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    for _ in 0..2 {
        stream
            .write_all(b"GET /ping HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap();
        let response = read_response(&mut stream).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("connection: keep-alive"), "{response}");
        assert!(response.ends_with("pong"), "{response}");
    }
}

#[tokio::test]
async fn s2_param_route_binds_and_echoes_the_id() {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let server = Server::builder(config)
        .route(
            Method::Get,
            "/users/:id",
            fn_handler(|ctx| {
                Box::pin(async move {
                    let id = ctx.param("id").unwrap().to_string();
                    ctx.response
                        .status(StatusCode::Ok)
                        .write_json(&serde_json::json!({ "id": id }))
                        .unwrap();
                })
            }),
        )
        .build();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    tokio::spawn(bound.serve());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /users/42 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("{\"id\":\"42\"}"), "{response}");
}

use barrier_web::Handler;

struct ProtectedHandler {
    handler_ran: Arc<AtomicUsize>,
}

impl Handler for ProtectedHandler {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.handler_ran.fetch_add(1, Ordering::SeqCst);
            ctx.response.status(StatusCode::Ok);
        })
    }
}

struct RequireAuth {
    rejections: Arc<AtomicUsize>,
}

impl Middleware for RequireAuth {
    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send + 'a>> {
        Box::pin(async move {
            if ctx.header(b"authorization").is_none() {
                self.rejections.fetch_add(1, Ordering::SeqCst);
                ctx.response.status(StatusCode::Unauthorized);
                return Outcome::Respond;
            }
            Outcome::Continue
        })
    }
}

#[tokio::test]
async fn s3_middleware_short_circuit_skips_the_handler() {
    let handler_ran = Arc::new(AtomicUsize::new(0));
    let rejections = Arc::new(AtomicUsize::new(0));

    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let server = Server::builder(config)
        .middleware(RequireAuth {
            rejections: rejections.clone(),
        })
        .route(
            Method::Get,
            "/protected",
            ProtectedHandler {
                handler_ran: handler_ran.clone(),
            },
        )
        .build();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    tokio::spawn(bound.serve());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /protected HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 401"), "{response}");
    assert_eq!(handler_ran.load(Ordering::SeqCst), 0);
    assert_eq!(rejections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s4_chunked_upload_reassembles_the_full_body() {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let server = Server::builder(config)
        .route(
            Method::Post,
            "/upload",
            fn_handler(|ctx| {
                Box::pin(async move {
                    let len = ctx.body().len();
                    ctx.response
                        .status(StatusCode::Ok)
                        .write_json(&serde_json::json!({ "len": len }))
                        .unwrap();
                })
            }),
        )
        .build();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    tokio::spawn(bound.serve());

    let payload = vec![b'x'; 5000];
    let mut request = b"POST /upload HTTP/1.1\r\nHost: x\r\nConnection: close\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for chunk in payload.chunks(1000) {
        request.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        request.extend_from_slice(chunk);
        request.extend_from_slice(b"\r\n");
    }
    request.extend_from_slice(b"0\r\n\r\n");

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&request).await.unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("{\"len\":5000}"), "{response}");
}

fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mask = [0x11, 0x22, 0x33, 0x44];
    let mut out = vec![0x80 | opcode];
    let len = payload.len();
    assert!(len < 126, "test helper only handles short payloads");
    out.push(0x80 | len as u8);
    out.extend_from_slice(&mask);
    for (i, byte) in payload.iter().enumerate() {
        out.push(byte ^ mask[i % 4]);
    }
    out
}

async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.unwrap();
    let opcode = header[0] & 0x0F;
    let len = (header[1] & 0x7F) as usize;
    assert!(len < 126, "test helper only handles short payloads");
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await.unwrap();
    }
    (opcode, payload)
}

#[tokio::test]
async fn malformed_request_line_gets_a_400_and_the_connection_closes() {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let server = Server::builder(config)
        .route(
            Method::Get,
            "/ping",
            fn_handler(|ctx| {
                Box::pin(async move {
                    ctx.response.status(StatusCode::Ok).body("pong");
                })
            }),
        )
        .build();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    tokio::spawn(bound.serve());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"NOTAVERB /ping SOUP/9.9\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");
    assert!(response.contains("connection: close"), "{response}");

    let mut trailing = [0u8; 16];
    let n = stream.read(&mut trailing).await.unwrap();
    assert_eq!(n, 0, "server should have closed the connection");
}

#[tokio::test]
async fn s5_websocket_echoes_text_answers_ping_and_closes() {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let server = Server::builder(config).websocket("/ws/echo").build();
    let bound = server.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    tokio::spawn(bound.serve());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /ws/echo HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let mut header_buf = vec![0u8; 4096];
    let n = stream.read(&mut header_buf).await.unwrap();
    let header_text = String::from_utf8_lossy(&header_buf[..n]);
    assert!(header_text.starts_with("HTTP/1.1 101"), "{header_text}");

    stream.write_all(&masked_frame(0x1, b"hello")).await.unwrap();
    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"hello");

    stream.write_all(&masked_frame(0x9, b"p")).await.unwrap();
    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0xA);
    assert_eq!(payload, b"p");

    stream
        .write_all(&masked_frame(0x8, &1000u16.to_be_bytes()))
        .await
        .unwrap();
    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, 0x8);
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1000);
}
