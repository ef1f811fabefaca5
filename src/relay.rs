//! Forwards fresh frames from an exchange to a downstream sink.
//!
//! The relay polls `new_image_available()` at a fixed interval, copies the
//! frame out, converts it to the sink's pixel layout and hands it over. Frames
//! published between two polls are coalesced; the sink only sees the latest.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::exchange::FrameExchange;
use crate::ingest::normalize::{convert_rgba, PixelFormat};

/// Destination for relayed frames, e.g. a texture upload or an encoder.
pub trait FrameSink: Send {
    fn serve_image(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(&[u8], u32, u32) -> Result<()> + Send,
{
    fn serve_image(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        self(pixels, width, height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub format: PixelFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(33),
            format: PixelFormat::Rgba8,
        }
    }
}

#[derive(Debug)]
pub struct RelayHandle {
    shutdown: Arc<AtomicBool>,
    served: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Frames handed to the sink so far.
    pub fn frames_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("frame relay thread panicked"))?;
        }
        Ok(())
    }
}

pub struct FrameRelay;

impl FrameRelay {
    pub fn spawn(
        exchange: Arc<FrameExchange>,
        sink: impl FrameSink + 'static,
        cfg: RelayConfig,
    ) -> Result<RelayHandle> {
        if cfg.poll_interval.is_zero() {
            return Err(anyhow!("relay poll interval must be greater than zero"));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let served = Arc::new(AtomicU64::new(0));
        let shutdown_thread = shutdown.clone();
        let served_thread = served.clone();
        let join = std::thread::Builder::new()
            .name("mjpeg-relay".to_string())
            .spawn(move || run_relay(exchange, sink, cfg, shutdown_thread, served_thread))?;

        Ok(RelayHandle {
            shutdown,
            served,
            join: Some(join),
        })
    }
}

fn run_relay(
    exchange: Arc<FrameExchange>,
    mut sink: impl FrameSink,
    cfg: RelayConfig,
    shutdown: Arc<AtomicBool>,
    served: Arc<AtomicU64>,
) {
    let mut scratch = Vec::new();
    while !shutdown.load(Ordering::SeqCst) {
        if !exchange.new_image_available() {
            std::thread::sleep(cfg.poll_interval);
            continue;
        }
        let Some((width, height)) = exchange.copy_current_image(&mut scratch) else {
            continue;
        };
        let pixels = match convert_rgba(&scratch, width, height, cfg.format) {
            Ok(pixels) => pixels,
            Err(err) => {
                log::warn!("frame relay: conversion failed: {}", err);
                continue;
            }
        };
        match sink.serve_image(&pixels, width, height) {
            Ok(()) => {
                served.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => log::warn!("frame relay: sink rejected frame: {}", err),
        }
    }
    log::debug!("frame relay: stopped");
}
