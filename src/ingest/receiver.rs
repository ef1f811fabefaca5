//! MJPEG stream receiver.
//!
//! `StreamReceiver` owns the connection lifecycle. `start()` launches a
//! receive thread that connects, sends one request, splits the multipart body
//! and publishes each decoded frame to the shared `FrameExchange`. `stop()`
//! cancels the session and joins the thread, so no frame is published after it
//! returns.
//!
//! The receiver does not reconnect on its own. After the stream ends, the
//! owner decides whether to call `start()` again.

use std::convert::Infallible;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{anyhow, Context, Result};
use mio::net::TcpStream;
use mio::Interest;
use url::Url;

use super::connector::{CancelToken, Connector, Readiness};
use super::decode::{FrameDecoder, JpegDecoder};
use super::multipart::{MultipartSplitter, Part};
use crate::error::{ConnectError, SessionEnd, SnapshotError, SocketError};
use crate::exchange::FrameExchange;
use crate::hooks::{NoopHooks, StreamHooks};

const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Boundary assumed when the server does not declare one.
pub const DEFAULT_BOUNDARY: &str = "boundarydonotcross";

/// Where and how to fetch the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    /// Resource requested from the camera, e.g. "/mjpg/video.mjpg".
    pub request_path: String,
    /// Fallback multipart boundary, without leading dashes.
    pub boundary: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 80,
            request_path: "/mjpg/video.mjpg".to_string(),
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

impl StreamConfig {
    /// Builds a config from an `http://host[:port]/path[?query]` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).context("parse stream url")?;
        if parsed.scheme() != "http" {
            return Err(anyhow!(
                "unsupported stream scheme '{}'; expected http",
                parsed.scheme()
            ));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("stream url missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(80);
        let mut request_path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            request_path.push('?');
            request_path.push_str(query);
        }
        Ok(Self {
            host,
            port,
            request_path,
            ..Self::default()
        })
    }

    fn request(&self) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.0\r\nHost: {}:{}\r\nConnection: close\r\n\r\n",
            self.request_path, self.host, self.port
        )
        .into_bytes()
    }
}

// ----------------------------------------------------------------------------
// Connection state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Streaming = 2,
    Stopping = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Streaming,
            3 => ConnectionState::Stopping,
            _ => ConnectionState::Idle,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters accumulated across sessions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub frames_decoded: u64,
    /// Payloads that failed to decode or exceeded the size cap.
    pub frames_dropped: u64,
    pub bytes_received: u64,
    pub sessions_started: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    frames_decoded: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_received: AtomicU64,
    sessions_started: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// StreamReceiver
// ----------------------------------------------------------------------------

struct Session {
    cancel: Arc<CancelToken>,
    join: JoinHandle<()>,
}

impl Session {
    fn is_current_thread(&self) -> bool {
        self.join.thread().id() == thread::current().id()
    }

    /// Waits for the loop thread unless we are running on it.
    fn finish(self) {
        if self.is_current_thread() {
            return;
        }
        if self.join.join().is_err() {
            log::error!("StreamReceiver: receive thread panicked");
        }
    }
}

pub struct StreamReceiver {
    config: StreamConfig,
    exchange: Arc<FrameExchange>,
    hooks: Arc<dyn StreamHooks>,
    decoder: Arc<dyn FrameDecoder>,
    state: Arc<StateCell>,
    stats: Arc<StatsCounters>,
    /// Serializes `start` and `stop`.
    session: Mutex<Option<Session>>,
    /// Loop thread and its token, readable without the session lock so that
    /// hooks can stop the stream.
    active: Arc<Mutex<Option<(ThreadId, Arc<CancelToken>)>>>,
}

impl StreamReceiver {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            exchange: Arc::new(FrameExchange::new()),
            hooks: Arc::new(NoopHooks),
            decoder: Arc::new(JpegDecoder),
            state: Arc::new(StateCell::new()),
            stats: Arc::new(StatsCounters::default()),
            session: Mutex::new(None),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_hooks(mut self, hooks: impl StreamHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_decoder(mut self, decoder: impl FrameDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Publishes into an exchange owned by the caller.
    pub fn with_exchange(mut self, exchange: Arc<FrameExchange>) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn exchange(&self) -> &Arc<FrameExchange> {
        &self.exchange
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self.state.get(),
            ConnectionState::Connecting | ConnectionState::Streaming
        )
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats.snapshot()
    }

    /// Launches the receive thread. Does nothing unless the receiver is idle.
    ///
    /// Must not be called from a hook.
    pub fn start(&self) -> std::io::Result<()> {
        let mut session = lock(&self.session);
        if self.state.get() != ConnectionState::Idle {
            return Ok(());
        }
        // A session that ended on its own may still be running its ended hook.
        if let Some(previous) = session.take() {
            previous.finish();
        }

        let connector = Connector::new()?;
        let cancel = connector.cancel_token();
        self.state.set(ConnectionState::Connecting);

        let receive_loop = ReceiveLoop {
            config: self.config.clone(),
            connector,
            cancel: cancel.clone(),
            exchange: self.exchange.clone(),
            hooks: self.hooks.clone(),
            decoder: self.decoder.clone(),
            state: self.state.clone(),
            stats: self.stats.clone(),
            active: self.active.clone(),
        };
        let spawned = thread::Builder::new()
            .name("mjpeg-receive".to_string())
            .spawn(move || receive_loop.run());
        let join = match spawned {
            Ok(join) => join,
            Err(err) => {
                self.state.set(ConnectionState::Idle);
                return Err(err);
            }
        };

        self.stats.sessions_started.fetch_add(1, Ordering::Relaxed);
        *session = Some(Session { cancel, join });
        Ok(())
    }

    /// Cancels the session and waits for the receive thread to exit.
    /// Does nothing when idle.
    ///
    /// From a hook this only signals the session; the loop exits after the
    /// hook returns.
    pub fn stop(&self) {
        {
            let active = lock(&self.active);
            if let Some((thread_id, cancel)) = active.as_ref() {
                if *thread_id == thread::current().id() {
                    self.state.transition(ConnectionState::Streaming, ConnectionState::Stopping);
                    cancel.cancel();
                    return;
                }
            }
        }

        let mut session = lock(&self.session);
        let Some(active) = session.take() else {
            return;
        };
        if self.state.get() != ConnectionState::Idle {
            self.state.set(ConnectionState::Stopping);
        }
        active.cancel.cancel();
        active.finish();
        self.state.set(ConnectionState::Idle);
        log::info!("StreamReceiver: stopped");
    }

    /// Saves the latest decoded frame. Format follows the file extension.
    pub fn save_current_image(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        crate::snapshot::save_latest(&self.exchange, path.as_ref())
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Receive loop
// ----------------------------------------------------------------------------

struct ReceiveLoop {
    config: StreamConfig,
    connector: Connector,
    cancel: Arc<CancelToken>,
    exchange: Arc<FrameExchange>,
    hooks: Arc<dyn StreamHooks>,
    decoder: Arc<dyn FrameDecoder>,
    state: Arc<StateCell>,
    stats: Arc<StatsCounters>,
    active: Arc<Mutex<Option<(ThreadId, Arc<CancelToken>)>>>,
}

impl ReceiveLoop {
    fn run(mut self) {
        *lock(&self.active) = Some((thread::current().id(), self.cancel.clone()));
        let end = match self.stream() {
            Ok(never) => match never {},
            Err(end) => end,
        };
        match &end {
            SessionEnd::Cancelled => log::info!("StreamReceiver: session cancelled"),
            SessionEnd::Socket(SocketError::Disconnected) => {
                log::info!("StreamReceiver: camera closed the stream")
            }
            err => log::warn!("StreamReceiver: stream ended: {}", err),
        }

        self.state
            .transition(ConnectionState::Streaming, ConnectionState::Stopping);
        self.state.set(ConnectionState::Idle);
        self.hooks.on_stream_ended();

        let mut active = lock(&self.active);
        if active
            .as_ref()
            .is_some_and(|(_, cancel)| Arc::ptr_eq(cancel, &self.cancel))
        {
            *active = None;
        }
    }

    fn stream(&mut self) -> Result<Infallible, SessionEnd> {
        log::info!(
            "StreamReceiver: connecting to {}:{}",
            self.config.host,
            self.config.port
        );
        let mut socket = match self.connector.connect(&self.config.host, self.config.port) {
            Ok(socket) => socket,
            Err(ConnectError::Cancelled) => return Err(SessionEnd::Cancelled),
            Err(err) => return Err(err.into()),
        };
        if !self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Streaming)
        {
            return Err(SessionEnd::Cancelled);
        }
        log::info!(
            "StreamReceiver: connected, requesting {}",
            self.config.request_path
        );

        self.send_request(&mut socket)?;

        let mut splitter = MultipartSplitter::new(&self.config.boundary);
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            if self.cancel.is_cancelled() {
                return Err(SessionEnd::Cancelled);
            }
            match socket.read(&mut chunk) {
                Ok(0) => return Err(SocketError::Disconnected.into()),
                Ok(read) => {
                    self.stats
                        .bytes_received
                        .fetch_add(read as u64, Ordering::Relaxed);
                    splitter.push(&chunk[..read]);
                    while let Some(part) = splitter.next_part()? {
                        self.handle_part(part);
                        if self.cancel.is_cancelled() {
                            return Err(SessionEnd::Cancelled);
                        }
                    }
                }
                Err(err) => match SocketError::classify(err) {
                    SocketError::NotReady => self.wait(Interest::READABLE)?,
                    other => return Err(other.into()),
                },
            }
        }
    }

    fn send_request(&mut self, socket: &mut TcpStream) -> Result<(), SessionEnd> {
        let request = self.config.request();
        let mut written = 0;
        while written < request.len() {
            match socket.write(&request[written..]) {
                Ok(0) => return Err(SocketError::Disconnected.into()),
                Ok(n) => written += n,
                Err(err) => match SocketError::classify(err) {
                    SocketError::NotReady => self.wait(Interest::WRITABLE)?,
                    other => return Err(other.into()),
                },
            }
        }
        Ok(())
    }

    fn wait(&mut self, interest: Interest) -> Result<(), SessionEnd> {
        match self.connector.wait(interest)? {
            Readiness::Ready => Ok(()),
            Readiness::Cancelled => Err(SessionEnd::Cancelled),
        }
    }

    fn handle_part(&self, part: Part) {
        match part {
            Part::Payload(payload) => match self.decoder.decode(&payload) {
                Ok(frame) => {
                    self.exchange.publish(frame);
                    self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    self.hooks.on_frame_read(&payload);
                }
                Err(err) => {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("StreamReceiver: image failed to load: {}", err);
                }
            },
            Part::Oversized { bytes } => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("StreamReceiver: discarded oversized part ({} bytes)", bytes);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_url() -> Result<()> {
        let cfg = StreamConfig::from_url("http://10.35.12.11:8080/mjpg/video.mjpg?fps=15")?;
        assert_eq!(cfg.host, "10.35.12.11");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.request_path, "/mjpg/video.mjpg?fps=15");
        assert_eq!(cfg.boundary, DEFAULT_BOUNDARY);
        Ok(())
    }

    #[test]
    fn url_without_port_defaults_to_80() -> Result<()> {
        let cfg = StreamConfig::from_url("http://camera.local/stream")?;
        assert_eq!(cfg.port, 80);
        assert_eq!(cfg.request_path, "/stream");
        Ok(())
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(StreamConfig::from_url("rtsp://camera/stream").is_err());
    }

    #[test]
    fn request_is_a_single_get() {
        let cfg = StreamConfig {
            host: "cam".to_string(),
            port: 81,
            request_path: "/stream".to_string(),
            ..StreamConfig::default()
        };
        let request = String::from_utf8(cfg.request()).unwrap();
        assert!(request.starts_with("GET /stream HTTP/1.0\r\n"));
        assert!(request.contains("Host: cam:81\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn idle_receiver_reports_not_streaming() {
        let receiver = StreamReceiver::new(StreamConfig::default());
        assert_eq!(receiver.state(), ConnectionState::Idle);
        assert!(!receiver.is_streaming());
        receiver.stop();
        receiver.stop();
        assert_eq!(receiver.state(), ConnectionState::Idle);
    }

    #[test]
    fn state_cell_transitions_only_from_expected_state() {
        let cell = StateCell::new();
        assert!(!cell.transition(ConnectionState::Connecting, ConnectionState::Streaming));
        cell.set(ConnectionState::Connecting);
        assert!(cell.transition(ConnectionState::Connecting, ConnectionState::Streaming));
        assert_eq!(cell.get(), ConnectionState::Streaming);
    }
}
