//! MJPEG-over-HTTP ingestion.
//!
//! The ingestion path is layered:
//! - `connector`: cancellable non-blocking TCP connect and readiness waits
//! - `multipart`: HTTP response and `multipart/x-mixed-replace` splitting
//! - `decode`: JPEG payload to RGBA8 `Frame`
//! - `receiver`: the start/stop lifecycle and the receive loop tying them together
//!
//! The ingestion layer MUST NOT log raw frame content.

pub mod connector;
pub mod decode;
pub mod multipart;
pub mod normalize;
pub mod receiver;

pub use connector::{CancelToken, Connector, Readiness};
pub use decode::{FrameDecoder, JpegDecoder};
pub use multipart::{MultipartSplitter, Part, MAX_HEADER_BYTES, MAX_JPEG_BYTES};
pub use normalize::{convert_rgba, PixelFormat};
pub use receiver::{
    ConnectionState, ReceiverStats, StreamConfig, StreamReceiver, DEFAULT_BOUNDARY,
};
