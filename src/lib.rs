//! MJPEG stream ingestion engine
//!
//! This crate pulls a Motion-JPEG stream from a network camera over plain HTTP
//! and keeps the most recent decoded frame available to any number of readers.
//!
//! # Architecture
//!
//! The engine has three parts:
//!
//! 1. **Connector**: non-blocking TCP connect that a cancel token can abort.
//! 2. **StreamReceiver**: start/stop lifecycle around a receive thread that
//!    splits the multipart body and decodes each JPEG part.
//! 3. **FrameExchange**: latest-frame-wins handoff from the receive thread to
//!    consumers, with a freshness flag for polling.
//!
//! Hooks (`StreamHooks`) notify the owner of each decoded frame and of the end
//! of a session. The receiver never reconnects on its own.
//!
//! # Module Structure
//!
//! - `ingest`: connector, multipart splitter, decoder, receiver
//! - `exchange`: producer/consumer frame slots
//! - `frame`: the RGBA8 `Frame` type
//! - `relay`: polling forwarder into a `FrameSink`
//! - `snapshot`: writing frames to disk
//! - `config`: JSON file plus environment configuration

pub mod config;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod hooks;
pub mod ingest;
pub mod relay;
pub mod snapshot;

pub use config::ClientConfig;
pub use error::{
    ConnectError, DecodeError, FrameError, ProtocolError, SnapshotError, SocketError,
};
pub use exchange::{CurrentImage, FrameExchange};
pub use frame::{Frame, BYTES_PER_PIXEL};
pub use hooks::{FnHooks, NoopHooks, StreamHooks};
pub use ingest::{
    CancelToken, ConnectionState, Connector, FrameDecoder, JpegDecoder, PixelFormat,
    ReceiverStats, StreamConfig, StreamReceiver,
};
pub use relay::{FrameRelay, FrameSink, RelayConfig, RelayHandle};
