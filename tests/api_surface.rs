use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use countwatch::{
    ApiConfig, ApiHandle, ApiServer, ApiState, FeedStatus, FrameUpdate, LiveSettings, Settings,
    SharedFrameStore, Shutdown,
};

struct Fixture {
    shutdown: Shutdown,
    store: Arc<SharedFrameStore>,
    settings: Arc<LiveSettings>,
    handle: ApiHandle,
}

impl Fixture {
    fn start() -> Self {
        Self::start_with(ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            viewer_poll: Duration::from_millis(10),
            ..ApiConfig::default()
        })
    }

    fn start_with(config: ApiConfig) -> Self {
        let shutdown = Shutdown::new();
        let store = Arc::new(SharedFrameStore::new(
            b"placeholder".to_vec(),
            FeedStatus::Connecting,
        ));
        let settings = Arc::new(LiveSettings::default());
        let handle = ApiServer::new(
            config,
            ApiState {
                store: store.clone(),
                settings: settings.clone(),
            },
        )
        .spawn(shutdown.clone())
        .expect("spawn api");
        Self {
            shutdown,
            store,
            settings,
            handle,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.handle.addr
    }

    fn stop(self) {
        self.shutdown.trigger();
        self.handle.stop().expect("stop api");
    }
}

fn request(addr: SocketAddr, method: &str, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let raw = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
        method = method,
        path = path,
        len = body.len(),
        body = body
    );
    stream.write_all(raw.as_bytes()).expect("write request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).expect("json body")
}

fn publish(store: &SharedFrameStore, jpeg: &[u8], count: u32) {
    store.publish(FrameUpdate {
        jpeg: jpeg.to_vec(),
        detected_count: count,
        stream_active: true,
        status: FeedStatus::Streaming,
        from_camera: true,
    });
}

fn read_until(stream: &mut TcpStream, buffer: &mut Vec<u8>, needle: &[u8]) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut chunk = [0u8; 1024];
    while Instant::now() < deadline {
        if buffer.windows(needle.len()).any(|w| w == needle) {
            return true;
        }
        match stream.read(&mut chunk) {
            Ok(0) => return false,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => return false,
        }
    }
    buffer.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn object_count_and_health_follow_the_store() {
    let fixture = Fixture::start();

    let (status, body) = request(fixture.addr(), "GET", "/get-obj-count", "");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["detectedCount"], 0);

    let (_, body) = request(fixture.addr(), "GET", "/health", "");
    assert_eq!(json(&body)["status"], "ok");
    assert_eq!(json(&body)["streamActive"], false);

    publish(&fixture.store, b"frame", 3);

    let (_, body) = request(fixture.addr(), "GET", "/get-obj-count", "");
    assert_eq!(json(&body)["detectedCount"], 3);
    let (_, body) = request(fixture.addr(), "GET", "/health", "");
    assert_eq!(json(&body)["streamActive"], true);

    fixture.stop();
}

#[test]
fn settings_updates_merge_and_invalid_ones_are_rejected() {
    let fixture = Fixture::start();

    let (status, body) = request(
        fixture.addr(),
        "POST",
        "/update-settings",
        r#"{"debounceThresh": 5, "minCount": 1, "maxCount": 4}"#,
    );
    assert_eq!(status, 200);
    assert_eq!(json(&body)["status"], "Settings updated and sent to backend");
    assert_eq!(
        *fixture.settings.current(),
        Settings {
            notify_enabled: true,
            settle_seconds: 5.0,
            min_count: 1,
            max_count: 4,
        }
    );

    let (status, _) = request(
        fixture.addr(),
        "POST",
        "/update-settings",
        r#"{"minCount": 9}"#,
    );
    assert_eq!(status, 400);
    let (status, _) = request(
        fixture.addr(),
        "POST",
        "/update-settings",
        r#"{"telegramNotif": "yes"}"#,
    );
    assert_eq!(status, 400);
    let (status, _) = request(fixture.addr(), "POST", "/update-settings", r#"{"volume": 11}"#);
    assert_eq!(status, 400);

    let (status, body) = request(fixture.addr(), "GET", "/settings.json", "");
    assert_eq!(status, 200);
    let current = json(&body);
    assert_eq!(current["telegramNotif"], true);
    assert_eq!(current["debounceThresh"], 5.0);
    assert_eq!(current["minCount"], 1);
    assert_eq!(current["maxCount"], 4);

    fixture.stop();
}

#[test]
fn unknown_routes_and_wrong_methods() {
    let fixture = Fixture::start();

    let (status, _) = request(fixture.addr(), "GET", "/nope", "");
    assert_eq!(status, 404);
    let (status, _) = request(fixture.addr(), "GET", "/update-settings", "");
    assert_eq!(status, 405);
    let (status, _) = request(fixture.addr(), "POST", "/get-obj-count", "");
    assert_eq!(status, 405);

    fixture.stop();
}

#[test]
fn video_stream_pushes_new_snapshots() {
    let fixture = Fixture::start();
    publish(&fixture.store, b"first-frame", 1);

    let mut stream = TcpStream::connect(fixture.addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_millis(200)))
        .expect("read timeout");
    stream
        .write_all(b"GET /cv2_stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("write request");

    let mut received = Vec::new();
    assert!(read_until(&mut stream, &mut received, b"first-frame"));
    let text = String::from_utf8_lossy(&received).into_owned();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=frame\r\n"));
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 11\r\n\r\nfirst-frame"));

    publish(&fixture.store, b"second-frame", 2);
    assert!(read_until(&mut stream, &mut received, b"second-frame"));
    let text = String::from_utf8_lossy(&received).into_owned();
    assert_eq!(text.matches("first-frame").count(), 1);

    fixture.stop();
}

#[test]
fn slow_viewer_does_not_block_other_requests() {
    let fixture = Fixture::start();

    // never reads its stream
    let mut idle_viewer = TcpStream::connect(fixture.addr()).expect("connect");
    idle_viewer
        .write_all(b"GET /cv2_stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("write request");
    for n in 0..50u32 {
        publish(&fixture.store, &vec![n as u8; 64 * 1024], n);
    }

    let (status, body) = request(fixture.addr(), "GET", "/get-obj-count", "");
    assert_eq!(status, 200);
    assert_eq!(json(&body)["detectedCount"], 49);

    fixture.stop();
}

#[test]
fn trickling_client_does_not_stall_other_requests() {
    let fixture = Fixture::start_with(ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        request_timeout: Duration::from_secs(1),
        viewer_poll: Duration::from_millis(10),
        ..ApiConfig::default()
    });
    publish(&fixture.store, b"frame", 7);

    let addr = fixture.addr();
    let trickler = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("connect");
        for byte in b"GET /get-obj-count HTTP/1.1\r\nHost: localhost\r\n\r\n" {
            if stream.write_all(&[*byte]).is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    });
    std::thread::sleep(Duration::from_millis(150));

    let started = Instant::now();
    let (status, body) = request(fixture.addr(), "GET", "/get-obj-count", "");
    assert!(started.elapsed() < Duration::from_millis(800));
    assert_eq!(status, 200);
    assert_eq!(json(&body)["detectedCount"], 7);

    let started = Instant::now();
    let mut viewer = TcpStream::connect(fixture.addr()).expect("connect");
    viewer
        .set_read_timeout(Some(Duration::from_millis(200)))
        .expect("read timeout");
    viewer
        .write_all(b"GET /cv2_stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("write request");
    let mut received = Vec::new();
    assert!(read_until(&mut viewer, &mut received, b"frame"));
    assert!(started.elapsed() < Duration::from_millis(800));

    fixture.stop();
    trickler.join().expect("trickler thread");
}

#[test]
fn incomplete_request_is_dropped_at_deadline() {
    let fixture = Fixture::start_with(ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        request_timeout: Duration::from_millis(300),
        ..ApiConfig::default()
    });

    let mut stream = TcpStream::connect(fixture.addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(3)))
        .expect("read timeout");
    stream
        .write_all(b"GET /get-obj-count HTTP/1.1\r\n")
        .expect("write partial request");

    let started = Instant::now();
    let mut buf = [0u8; 64];
    match stream.read(&mut buf) {
        Ok(n) => assert_eq!(n, 0, "no response expected for an incomplete request"),
        Err(err) => assert!(
            err.kind() != std::io::ErrorKind::WouldBlock
                && err.kind() != std::io::ErrorKind::TimedOut,
            "connection was not closed: {}",
            err
        ),
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    fixture.stop();
}
