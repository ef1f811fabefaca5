//! Notification points fired by the receive loop.
//!
//! Hooks run on the receive thread. A slow hook delays the next read. Calling
//! `StreamReceiver::stop()` from a hook signals the session without joining.

use std::sync::Arc;

/// Strategy injected into a `StreamReceiver` to react to stream events.
pub trait StreamHooks: Send + Sync {
    /// A payload decoded successfully and is now the latest frame.
    /// `jpeg` is the raw payload as received.
    fn on_frame_read(&self, jpeg: &[u8]) {
        let _ = jpeg;
    }

    /// The receive loop exited; the receiver is back to idle.
    fn on_stream_ended(&self) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl StreamHooks for NoopHooks {}

type FrameReadFn = dyn Fn(&[u8]) + Send + Sync;
type StreamEndedFn = dyn Fn() + Send + Sync;

/// Closure-backed hooks.
///
/// ```ignore
/// let hooks = FnHooks::new()
///     .with_frame_read(|jpeg| log::debug!("{} bytes", jpeg.len()))
///     .with_stream_ended(|| log::info!("stream ended"));
/// ```
#[derive(Clone, Default)]
pub struct FnHooks {
    frame_read: Option<Arc<FrameReadFn>>,
    stream_ended: Option<Arc<StreamEndedFn>>,
}

impl FnHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_read(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.frame_read = Some(Arc::new(f));
        self
    }

    pub fn with_stream_ended(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.stream_ended = Some(Arc::new(f));
        self
    }
}

impl StreamHooks for FnHooks {
    fn on_frame_read(&self, jpeg: &[u8]) {
        if let Some(f) = &self.frame_read {
            f(jpeg);
        }
    }

    fn on_stream_ended(&self) {
        if let Some(f) = &self.stream_ended {
            f();
        }
    }
}
