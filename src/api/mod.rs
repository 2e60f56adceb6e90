//! Loopback HTTP surface.
//!
//! Routes:
//! - `GET /cv2_stream`: `multipart/x-mixed-replace` MJPEG of the latest frame
//! - `GET /get-obj-count`: `{"detectedCount": n}`
//! - `POST /update-settings`: partial settings JSON, merged atomically
//! - `GET /settings.json`: current settings
//! - `GET /health`: `{"status":"ok","streamActive":bool}`
//!
//! The accept loop only accepts: every connection is served on its own
//! thread, and reading a request is bounded by one overall deadline. Video
//! viewers keep their thread and pull the latest snapshot at their own pace,
//! so a slow client never holds up the supervisor or other clients.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::settings::{LiveSettings, SettingsUpdate};
use crate::shutdown::Shutdown;
use crate::store::SharedFrameStore;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 16 * 1024;
const MJPEG_BOUNDARY: &str = "frame";
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Deadline for receiving a complete request (headers and body).
    pub request_timeout: Duration,
    /// How often a viewer checks for a new snapshot.
    pub viewer_poll: Duration,
    /// Give up on a viewer whose socket does not drain within this time.
    pub viewer_write_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            request_timeout: Duration::from_secs(5),
            viewer_poll: Duration::from_millis(30),
            viewer_write_timeout: Duration::from_secs(5),
        }
    }
}

/// State the routes read and write.
#[derive(Clone, Debug)]
pub struct ApiState {
    pub store: Arc<SharedFrameStore>,
    pub settings: Arc<LiveSettings>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Wait for the accept loop and every connection thread to exit. Trigger
    /// the shared `Shutdown` first.
    pub fn stop(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self, shutdown: Shutdown) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address {}", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind api listener on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let join = std::thread::Builder::new()
            .name("api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, self.cfg, self.state, shutdown) {
                    log::error!("api server stopped: {:#}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: ApiState,
    shutdown: Shutdown,
) -> Result<()> {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if shutdown.is_triggered() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let state = state.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("api-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &cfg, &state, &shutdown) {
                            log::warn!("api request from {} rejected: {:#}", peer, err);
                        }
                    });
                match spawned {
                    Ok(join) => connections.push(join),
                    Err(err) => log::error!("failed to spawn api connection thread: {}", err),
                }
                connections.retain(|c| !c.is_finished());
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                shutdown.wait_timeout(ACCEPT_POLL);
            }
            Err(err) => return Err(err.into()),
        }
    }
    for connection in connections {
        if connection.join().is_err() {
            log::warn!("api connection thread panicked");
        }
    }
    Ok(())
}

/// Serve one connection: a single request, or a video stream until the
/// viewer leaves or shutdown.
fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: &Shutdown,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = read_request(&mut stream, Instant::now() + cfg.request_timeout)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/cv2_stream") => {
            stream.set_write_timeout(Some(cfg.viewer_write_timeout))?;
            log::info!("viewer {} connected", peer);
            match serve_viewer(stream, &state.store, shutdown, cfg.viewer_poll) {
                Ok(()) => log::info!("viewer {} closed", peer),
                Err(err) => log::debug!("viewer {} dropped: {:#}", peer, err),
            }
            Ok(())
        }
        ("GET", "/get-obj-count") => {
            let count = state.store.detected_count();
            write_json_response(&mut stream, 200, &json!({ "detectedCount": count }))?;
            Ok(())
        }
        ("GET", "/settings.json") => {
            let settings = state.settings.current();
            write_json_response(&mut stream, 200, &serde_json::to_value(&*settings)?)?;
            Ok(())
        }
        ("GET", "/health") => {
            let active = state.store.stream_active();
            write_json_response(
                &mut stream,
                200,
                &json!({"status": "ok", "streamActive": active}),
            )?;
            Ok(())
        }
        ("POST", "/update-settings") => {
            let applied = SettingsUpdate::from_json(&request.body)
                .and_then(|update| state.settings.update(&update));
            match applied {
                Ok(_) => write_json_response(
                    &mut stream,
                    200,
                    &json!({"status": "Settings updated and sent to backend"}),
                )?,
                Err(err) => {
                    log::warn!("settings update rejected: {:#}", err);
                    write_json_response(
                        &mut stream,
                        400,
                        &json!({"error": format!("{:#}", err)}),
                    )?;
                }
            }
            Ok(())
        }
        (_, "/cv2_stream" | "/get-obj-count" | "/settings.json" | "/health" | "/update-settings") => {
            write_json_response(&mut stream, 405, &json!({"error": "method_not_allowed"}))?;
            Ok(())
        }
        _ => {
            write_json_response(&mut stream, 404, &json!({"error": "not_found"}))?;
            Ok(())
        }
    }
}

/// Push the latest snapshot to one viewer whenever it changes.
fn serve_viewer(
    mut stream: TcpStream,
    store: &SharedFrameStore,
    shutdown: &Shutdown,
    poll: Duration,
) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-cache, no-store, must-revalidate\r\nPragma: no-cache\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let mut last_sequence = None;
    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }
        let snapshot = store.current();
        if last_sequence != Some(snapshot.sequence) {
            write_part(&mut stream, &snapshot.jpeg)?;
            last_sequence = Some(snapshot.sequence);
        }
        if shutdown.wait_timeout(poll) {
            return Ok(());
        }
    }
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    let part_header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );
    stream.write_all(part_header.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

fn read_request(stream: &mut TcpStream, deadline: Instant) -> Result<HttpRequest> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = read_before(stream, &mut buf, deadline)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request headers ended"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = read_before(stream, &mut buf, deadline)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request body ended"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

/// One `read` that gives up once `deadline` has passed.
fn read_before(stream: &mut TcpStream, buf: &mut [u8], deadline: Instant) -> Result<usize> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(anyhow!("request not received before deadline"));
    }
    stream.set_read_timeout(Some(remaining))?;
    match stream.read(buf) {
        Ok(n) => Ok(n),
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut =>
        {
            Err(anyhow!("request not received before deadline"))
        }
        Err(err) => Err(err.into()),
    }
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
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

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
