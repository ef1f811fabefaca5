use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};

use mjpeg_ingest::{
    ConnectionState, FnHooks, FrameDecoder, JpegDecoder, StreamConfig, StreamReceiver,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 85)
        .encode(image.as_raw(), width, height, ExtendedColorType::Rgb8)
        .expect("encode jpeg");
    out
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

// ----------------------------------------------------------------------------
// Test camera
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct Script {
    head: String,
    boundary: String,
    parts: Vec<Vec<u8>>,
    content_length: bool,
    /// Keep the connection open after the last part until the client leaves.
    hold_open: bool,
}

impl Script {
    fn new(parts: Vec<Vec<u8>>) -> Self {
        Self {
            head: "HTTP/1.0 200 OK\r\n\
                   Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n"
                .to_string(),
            boundary: "frame".to_string(),
            parts,
            content_length: true,
            hold_open: true,
        }
    }
}

struct TestCamera {
    port: u16,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestCamera {
    fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        {
            let connections = connections.clone();
            let requests = requests.clone();
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let script = script.clone();
                    let requests = requests.clone();
                    thread::spawn(move || serve(stream, &script, &requests));
                }
            });
        }
        Self {
            port,
            connections,
            requests,
        }
    }

    fn config(&self) -> StreamConfig {
        StreamConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            request_path: "/mjpg/video.mjpg".to_string(),
            ..StreamConfig::default()
        }
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn serve(mut stream: TcpStream, script: &Script, requests: &Mutex<Vec<String>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    requests
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&request).into_owned());

    let mut body = script.head.clone().into_bytes();
    for part in &script.parts {
        body.extend_from_slice(format!("--{}\r\nContent-Type: image/jpeg\r\n", script.boundary).as_bytes());
        if script.content_length {
            body.extend_from_slice(format!("Content-Length: {}\r\n", part.len()).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part);
        body.extend_from_slice(b"\r\n");
    }
    if !script.content_length {
        // Without lengths the last payload ends at the next delimiter.
        body.extend_from_slice(format!("--{}\r\n", script.boundary).as_bytes());
    }
    if stream.write_all(&body).is_err() {
        return;
    }

    if script.hold_open {
        while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
    }
}

// ----------------------------------------------------------------------------
// Hook recorder
// ----------------------------------------------------------------------------

#[derive(Clone, Default)]
struct HookLog {
    frames: Arc<Mutex<Vec<usize>>>,
    ended: Arc<AtomicUsize>,
}

impl HookLog {
    fn hooks(&self) -> FnHooks {
        let frames = self.frames.clone();
        let ended = self.ended.clone();
        FnHooks::new()
            .with_frame_read(move |jpeg| frames.lock().unwrap().push(jpeg.len()))
            .with_stream_ended(move || {
                ended.fetch_add(1, Ordering::SeqCst);
            })
    }

    fn frame_sizes(&self) -> Vec<usize> {
        self.frames.lock().unwrap().clone()
    }

    fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[test]
fn latest_frame_wins_across_size_change() {
    let parts = vec![
        jpeg(320, 240, [255, 0, 0]),
        jpeg(320, 240, [0, 255, 0]),
        jpeg(640, 480, [0, 0, 255]),
    ];
    let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
    let expected = JpegDecoder.decode(&parts[2]).expect("decode reference");
    let camera = TestCamera::spawn(Script::new(parts));
    let hooks_log = HookLog::default();
    let receiver = StreamReceiver::new(camera.config()).with_hooks(hooks_log.hooks());

    receiver.start().expect("start");
    // The hook runs after the frame is published.
    assert!(wait_until(|| hooks_log.frame_sizes().len() == 3));
    assert_eq!(receiver.stats().frames_decoded, 3);
    assert_eq!(receiver.state(), ConnectionState::Streaming);
    assert!(receiver.is_streaming());

    let exchange = receiver.exchange();
    assert!(exchange.new_image_available());
    {
        let image = exchange.current_image().expect("frame");
        assert_eq!(image.dimensions(), (640, 480));
        assert_eq!(image.len(), 640 * 480 * 4);
        assert_eq!(image.pixels(), expected.pixels());
    }
    assert_eq!(exchange.current_size(), (640, 480));
    assert!(!exchange.new_image_available());
    assert_eq!(hooks_log.frame_sizes(), sizes);

    let request = camera.requests.lock().unwrap()[0].clone();
    assert!(request.starts_with("GET /mjpg/video.mjpg HTTP/1.0\r\n"));

    receiver.stop();
    assert_eq!(receiver.state(), ConnectionState::Idle);
    assert_eq!(hooks_log.ended(), 1);
}

#[test]
fn undecodable_part_keeps_previous_frame() {
    let good = jpeg(64, 48, [10, 200, 30]);
    let expected = JpegDecoder.decode(&good).expect("decode reference");
    let camera = TestCamera::spawn(Script::new(vec![good, b"not a jpeg at all".to_vec()]));
    let hooks_log = HookLog::default();
    let receiver = StreamReceiver::new(camera.config()).with_hooks(hooks_log.hooks());

    receiver.start().expect("start");
    assert!(wait_until(|| receiver.stats().frames_dropped == 1));
    let stats = receiver.stats();
    assert_eq!(stats.frames_decoded, 1);
    assert!(receiver.is_streaming());

    let image = receiver.exchange().current_image().expect("frame");
    assert_eq!(image.dimensions(), (64, 48));
    assert_eq!(image.pixels(), expected.pixels());
    drop(image);
    // The failed part never reached the frame hook.
    assert_eq!(hooks_log.frame_sizes().len(), 1);
}

#[test]
fn parts_without_length_and_undeclared_boundary() {
    let parts = vec![jpeg(32, 16, [1, 2, 3]), jpeg(16, 32, [4, 5, 6])];
    let mut script = Script::new(parts);
    script.head = "HTTP/1.0 200 OK\r\nContent-Type: multipart/x-mixed-replace\r\n\r\n".to_string();
    script.boundary = "camframe".to_string();
    script.content_length = false;
    let camera = TestCamera::spawn(script);

    let mut config = camera.config();
    config.boundary = "camframe".to_string();
    let receiver = StreamReceiver::new(config);

    receiver.start().expect("start");
    assert!(wait_until(|| receiver.stats().frames_decoded == 2));
    assert_eq!(receiver.exchange().current_image().unwrap().dimensions(), (16, 32));
}

#[test]
fn start_is_idempotent_while_streaming() {
    let camera = TestCamera::spawn(Script::new(vec![jpeg(8, 8, [0, 0, 0])]));
    let receiver = StreamReceiver::new(camera.config());

    receiver.start().expect("start");
    receiver.start().expect("second start");
    assert!(wait_until(|| receiver.stats().frames_decoded == 1));
    receiver.start().expect("third start");

    thread::sleep(Duration::from_millis(100));
    assert_eq!(camera.connections(), 1);
    assert_eq!(receiver.stats().sessions_started, 1);
}

#[test]
fn stop_while_streaming_returns_to_idle() {
    let camera = TestCamera::spawn(Script::new(vec![jpeg(8, 8, [9, 9, 9])]));
    let hooks_log = HookLog::default();
    let receiver = StreamReceiver::new(camera.config()).with_hooks(hooks_log.hooks());

    receiver.start().expect("start");
    assert!(wait_until(|| receiver.stats().frames_decoded == 1));

    receiver.stop();
    assert!(!receiver.is_streaming());
    assert_eq!(receiver.state(), ConnectionState::Idle);
    assert_eq!(hooks_log.ended(), 1);

    receiver.stop();
    assert_eq!(hooks_log.ended(), 1);
    // The last frame outlives the session.
    assert!(receiver.exchange().current_image().is_some());
}

#[test]
fn stop_while_connecting_returns_to_idle() {
    // Non-routable address; the connect either hangs or fails fast.
    let config = StreamConfig {
        host: "10.255.255.1".to_string(),
        port: 81,
        ..StreamConfig::default()
    };
    let hooks_log = HookLog::default();
    let receiver = StreamReceiver::new(config).with_hooks(hooks_log.hooks());

    receiver.start().expect("start");
    receiver.stop();

    assert!(!receiver.is_streaming());
    assert_eq!(receiver.state(), ConnectionState::Idle);
    assert_eq!(hooks_log.ended(), 1);
    assert!(receiver.exchange().current_image().is_none());
}

#[test]
fn refused_connection_ends_session() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let hooks_log = HookLog::default();
    let receiver = StreamReceiver::new(StreamConfig {
        port,
        ..StreamConfig::default()
    })
    .with_hooks(hooks_log.hooks());

    receiver.start().expect("start");
    assert!(wait_until(|| hooks_log.ended() == 1));
    assert_eq!(receiver.state(), ConnectionState::Idle);
}

#[test]
fn error_status_ends_session() {
    let mut script = Script::new(vec![jpeg(8, 8, [1, 1, 1])]);
    script.head = "HTTP/1.0 404 Not Found\r\n\r\n".to_string();
    let camera = TestCamera::spawn(script);
    let hooks_log = HookLog::default();
    let receiver = StreamReceiver::new(camera.config()).with_hooks(hooks_log.hooks());

    receiver.start().expect("start");
    assert!(wait_until(|| hooks_log.ended() == 1));
    assert_eq!(receiver.stats().frames_decoded, 0);
    assert!(!receiver.is_streaming());
}

#[test]
fn server_disconnect_ends_session_and_restart_works() {
    let mut script = Script::new(vec![jpeg(8, 8, [1, 2, 3]), jpeg(8, 8, [3, 2, 1])]);
    script.hold_open = false;
    let camera = TestCamera::spawn(script);
    let hooks_log = HookLog::default();
    let receiver = StreamReceiver::new(camera.config()).with_hooks(hooks_log.hooks());

    receiver.start().expect("start");
    assert!(wait_until(|| hooks_log.ended() == 1));
    assert_eq!(receiver.state(), ConnectionState::Idle);
    assert_eq!(receiver.stats().frames_decoded, 2);

    receiver.start().expect("restart");
    assert!(wait_until(|| hooks_log.ended() == 2));
    assert_eq!(camera.connections(), 2);
    assert_eq!(receiver.stats().frames_decoded, 4);
    assert_eq!(receiver.stats().sessions_started, 2);
}

#[test]
fn stop_from_frame_hook_does_not_deadlock() {
    let parts = vec![
        jpeg(8, 8, [1, 1, 1]),
        jpeg(8, 8, [2, 2, 2]),
        jpeg(8, 8, [3, 3, 3]),
    ];
    let camera = TestCamera::spawn(Script::new(parts));
    let ended = Arc::new(AtomicUsize::new(0));
    let slot: Arc<OnceLock<Weak<StreamReceiver>>> = Arc::new(OnceLock::new());
    let hooks = {
        let slot = slot.clone();
        let ended = ended.clone();
        FnHooks::new()
            .with_frame_read(move |_| {
                if let Some(receiver) = slot.get().and_then(Weak::upgrade) {
                    receiver.stop();
                }
            })
            .with_stream_ended(move || {
                ended.fetch_add(1, Ordering::SeqCst);
            })
    };
    let receiver = Arc::new(StreamReceiver::new(camera.config()).with_hooks(hooks));
    slot.set(Arc::downgrade(&receiver)).ok();

    receiver.start().expect("start");
    assert!(wait_until(|| ended.load(Ordering::SeqCst) == 1));
    assert_eq!(receiver.stats().frames_decoded, 1);
    assert_eq!(receiver.state(), ConnectionState::Idle);

    // A later stop from the owner still completes.
    receiver.stop();
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[test]
fn snapshot_of_latest_frame() {
    let camera = TestCamera::spawn(Script::new(vec![jpeg(24, 12, [90, 90, 90])]));
    let receiver = StreamReceiver::new(camera.config());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("latest.png");

    assert!(receiver.save_current_image(&path).is_err());

    receiver.start().expect("start");
    assert!(wait_until(|| receiver.stats().frames_decoded == 1));
    receiver.save_current_image(&path).expect("snapshot");
    receiver.stop();

    let saved = image::open(&path).expect("reopen").into_rgba8();
    assert_eq!(saved.dimensions(), (24, 12));
}
