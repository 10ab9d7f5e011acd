//! HTTP/1.1 surface for the shared session.
//!
//! Routes:
//! - `POST /start_tracking`, `POST /stop_tracking`
//! - `POST /sync_stats` with a JSON body
//! - `GET /get_stats`, `GET /health`
//!
//! One request per connection; the response always closes it.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::sync::{SharedSession, SyncError};

const MAX_REQUEST_BYTES: usize = 8192;

const ROUTES: [&str; 5] = [
    "/health",
    "/start_tracking",
    "/stop_tracking",
    "/sync_stats",
    "/get_stats",
];

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    session: SharedSession,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, session: SharedSession) -> Self {
        Self { cfg, session }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|err| anyhow!("invalid api address '{}': {}", self.cfg.addr, err))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let session = self.session;
        let join = std::thread::Builder::new()
            .name("stats-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, session, shutdown_thread) {
                    log::error!("stats api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, session: SharedSession, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &session) {
                    log::warn!("stats api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, session: &SharedSession) -> Result<()> {
    // Accepted sockets can inherit the listener's non-blocking flag.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_json_response(&mut stream, 413, &json!({"error": "request_too_large"}))?;
            return Ok(());
        }
        Err(RequestError::Malformed(reason)) => {
            log::debug!("malformed request from {}: {}", peer, reason);
            write_json_response(
                &mut stream,
                400,
                &json!({"error": "bad_request", "message": reason}),
            )?;
            return Ok(());
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };

    let (status, body) = route(&request, session);
    log::debug!("{} {} -> {}", request.method, request.path, status);
    write_json_response(&mut stream, status, &body)
}

/// Maps a parsed request to a status code and JSON body. The session guard is
/// only held inside the `SharedSession` calls, never across socket I/O.
fn route(request: &HttpRequest, session: &SharedSession) -> (u16, Value) {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => (200, json!({"status": "ok"})),
        ("POST", "/start_tracking") => {
            session.start();
            (200, json!({"status": "started"}))
        }
        ("POST", "/stop_tracking") => {
            session.stop();
            (200, json!({"status": "stopped"}))
        }
        ("POST", "/sync_stats") => {
            let payload: Value = match serde_json::from_slice(&request.body) {
                Ok(payload) => payload,
                Err(err) => {
                    return sync_error_response(&SyncError::InvalidPayload(err.to_string()));
                }
            };
            match session.push_json(&payload) {
                Ok(_) => (200, json!({"status": "synced"})),
                Err(err) => {
                    log::info!("sync_stats rejected: {}", err);
                    sync_error_response(&err)
                }
            }
        }
        ("GET", "/get_stats") => match serde_json::to_value(session.view()) {
            Ok(view) => (200, view),
            Err(err) => {
                log::error!("failed to serialize stats: {}", err);
                (500, json!({"error": "internal"}))
            }
        },
        (_, path) if ROUTES.contains(&path) => (405, json!({"error": "method_not_allowed"})),
        _ => (404, json!({"error": "not_found"})),
    }
}

fn sync_error_response(err: &SyncError) -> (u16, Value) {
    match err {
        SyncError::InvalidField { field, reason } => (
            400,
            json!({"error": err.kind(), "field": field, "message": reason}),
        ),
        SyncError::InvalidPayload(reason) => (400, json!({"error": err.kind(), "message": reason})),
        SyncError::NotTracking => (409, json!({"error": err.kind()})),
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err)
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let head_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("incomplete request head".to_string()));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_REQUEST_BYTES {
            return Err(RequestError::TooLarge);
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".to_string()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".to_string()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => match value.parse::<usize>() {
            Ok(len) => len,
            // All digits but out of range for usize.
            Err(_) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                return Err(RequestError::TooLarge)
            }
            Err(_) => {
                return Err(RequestError::Malformed("invalid content-length".to_string()))
            }
        },
        None => 0,
    };
    let body_start = head_end + 4;
    let request_end = match body_start.checked_add(content_length) {
        Some(end) if end <= MAX_REQUEST_BYTES => end,
        _ => return Err(RequestError::TooLarge),
    };
    while data.len() < request_end {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("truncated body".to_string()));
        }
        data.extend_from_slice(&buf[..n]);
    }
    data.truncate(request_end);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body: data.split_off(body_start),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
