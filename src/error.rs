//! Error taxonomy for the ingestion engine.
//!
//! Connector errors end a single `start()` attempt. Socket errors end a
//! streaming session. Decode errors are recovered inside the receive loop.

use std::io;

/// Failure to establish the camera connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The cancel token fired before the connect completed.
    #[error("connect cancelled")]
    Cancelled,

    /// The host name did not resolve to any address.
    #[error("could not resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: Option<io::Error>,
    },

    /// Unclassified failure, with the underlying socket error when known.
    #[error("connect failed: {0}")]
    Generic(#[source] io::Error),
}

/// Classification of socket I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// The operation would block; retry after the next readiness event.
    #[error("socket not ready")]
    NotReady,

    /// Peer closed, reset, or timed out.
    #[error("peer disconnected")]
    Disconnected,

    #[error("socket error: {0}")]
    Generic(#[source] io::Error),
}

impl SocketError {
    /// Maps an I/O error onto the engine's three-way classification.
    pub fn classify(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => SocketError::NotReady,
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::TimedOut
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => SocketError::Disconnected,
            _ => SocketError::Generic(err),
        }
    }
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        SocketError::classify(err)
    }
}

/// A JPEG payload that could not be turned into a frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed image payload: {0}")]
    Malformed(#[from] image::ImageError),

    #[error("decoded image has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Violation of the frame buffer invariant.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame dimensions {width}x{height} overflow")]
    Overflow { width: u32, height: u32 },

    #[error("pixel buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// The server did not speak the expected multipart protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed status line: {0:?}")]
    StatusLine(String),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("response header exceeds {0} bytes")]
    HeaderTooLarge(usize),
}

/// Why a streaming session ended. Passed to the log, not to hooks.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SessionEnd {
    #[error("stopped")]
    Cancelled,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Failure to write a snapshot to disk.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("no frame has been received yet")]
    NoFrame,

    #[error("unsupported snapshot format for {0:?}; expected .png, .bmp or .tga")]
    UnsupportedFormat(String),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] image::ImageError),
}
