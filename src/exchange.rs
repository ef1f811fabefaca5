//! Coalescing frame handoff between the receive thread and consumers.
//!
//! The exchange holds two slots:
//! - the producer slot, replaced by the receive loop on every decoded frame
//! - the consumer slot, the copy most recently handed out by `current_image()`
//!
//! Only the latest frame is kept. A consumer that polls slower than the
//! stream decodes silently skips the intermediate frames.
//!
//! Lock order is always producer, then consumer. Both locks are released
//! before `current_image()` returns; a `CurrentImage` shares the consumer
//! buffer by reference count instead of holding a guard.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::frame::Frame;

#[derive(Default)]
struct ConsumerSlot {
    width: u32,
    height: u32,
    pixels: Option<Arc<[u8]>>,
}

impl ConsumerSlot {
    /// Overwrites the slot with `frame`. The buffer is reused in place when
    /// no `CurrentImage` still shares it and the size matches.
    fn refresh(&mut self, frame: &Frame) {
        let reusable = self
            .pixels
            .as_mut()
            .and_then(Arc::get_mut)
            .filter(|buf| buf.len() == frame.pixels().len());
        match reusable {
            Some(buf) => buf.copy_from_slice(frame.pixels()),
            None => self.pixels = Some(Arc::from(frame.pixels())),
        }
        self.width = frame.width();
        self.height = frame.height();
    }
}

/// Single-slot, latest-frame-wins buffer pair.
#[derive(Default)]
pub struct FrameExchange {
    producer: Mutex<Option<Frame>>,
    consumer: Mutex<ConsumerSlot>,
    fresh: AtomicBool,
}

impl FrameExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the producer slot. Called only by the receive loop.
    pub(crate) fn publish(&self, frame: Frame) {
        let previous = {
            let mut slot = lock(&self.producer);
            let previous = slot.replace(frame);
            self.fresh.store(true, Ordering::Release);
            previous
        };
        // The replaced frame is freed outside the critical section.
        drop(previous);
    }

    /// Runs `f` against the producer slot under its lock.
    pub(crate) fn with_latest<R>(&self, f: impl FnOnce(Option<&Frame>) -> R) -> R {
        let slot = lock(&self.producer);
        f(slot.as_ref())
    }

    /// Copies the latest frame into the consumer slot and returns a view of it.
    ///
    /// No lock is held once this returns. Returns `None` until the first
    /// frame has been published.
    pub fn current_image(&self) -> Option<CurrentImage> {
        let producer = lock(&self.producer);
        let mut consumer = lock(&self.consumer);

        if let Some(frame) = producer.as_ref() {
            consumer.refresh(frame);
            self.fresh.store(false, Ordering::Release);
        }
        drop(producer);

        let pixels = consumer.pixels.clone()?;
        Some(CurrentImage {
            width: consumer.width,
            height: consumer.height,
            pixels,
        })
    }

    /// Copies the latest frame into `out` and returns its dimensions.
    pub fn copy_current_image(&self, out: &mut Vec<u8>) -> Option<(u32, u32)> {
        let image = self.current_image()?;
        out.clear();
        out.extend_from_slice(image.pixels());
        Some(image.dimensions())
    }

    /// Dimensions of the last frame handed to a consumer; `(0, 0)` before any.
    pub fn current_size(&self) -> (u32, u32) {
        let consumer = lock(&self.consumer);
        (consumer.width, consumer.height)
    }

    /// Whether a frame was published since the last `current_image()` call.
    ///
    /// Best-effort, for polling cadence only.
    pub fn new_image_available(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }
}

/// Consumer view of a copied frame.
///
/// Holding one only pins its pixel buffer; later calls to `current_image()`
/// copy into a new buffer while it is alive.
#[derive(Clone)]
pub struct CurrentImage {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl CurrentImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl Deref for CurrentImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.pixels
    }
}

impl std::fmt::Debug for CurrentImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
