//! mjpeg_client - Pull an MJPEG stream and relay its frames.
//!
//! This client:
//! 1. Loads `ClientConfig` (MJPEG_CONFIG file plus MJPEG_* environment)
//! 2. Streams from the camera until Ctrl-C
//! 3. Logs each relayed frame and optionally restarts ended streams
//! 4. Writes a snapshot of the last frame on exit when asked to

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use mjpeg_ingest::{
    ClientConfig, FnHooks, FrameRelay, PixelFormat, StreamConfig, StreamReceiver,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Pull an MJPEG stream from a network camera and relay the latest frame"
)]
struct Args {
    /// Stream URL, e.g. http://10.35.12.11/mjpg/video.mjpg. Overrides the config file.
    #[arg(long)]
    url: Option<String>,

    /// Fallback multipart boundary when the camera does not declare one.
    #[arg(long)]
    boundary: Option<String>,

    /// Write the last frame here on exit (.png, .bmp or .tga).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Pixel layout handed to the sink: rgba, rgb or bgr.
    #[arg(long)]
    format: Option<PixelFormat>,

    /// Relay poll interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Restart the stream this many seconds after it ends. Off by default.
    #[arg(long, env = "MJPEG_RECONNECT_DELAY_SECS")]
    reconnect_delay_secs: Option<u64>,
}

enum Signal {
    Shutdown,
    StreamEnded,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ClientConfig::load()?;
    if let Some(url) = args.url.as_deref() {
        let boundary = std::mem::take(&mut config.stream.boundary);
        config.stream = StreamConfig {
            boundary,
            ..StreamConfig::from_url(url)?
        };
    }
    if let Some(boundary) = args.boundary {
        config.stream.boundary = boundary;
    }
    if let Some(format) = args.format {
        config.relay.format = format;
    }
    if let Some(millis) = args.interval_ms {
        config.relay.poll_interval = Duration::from_millis(millis.max(1));
    }
    let snapshot_path = args.snapshot.or(config.snapshot_path.clone());

    let (tx, rx) = mpsc::channel();
    let ended_tx = tx.clone();
    let payload_bytes = Arc::new(AtomicU64::new(0));
    let hooks = {
        let payload_bytes = payload_bytes.clone();
        FnHooks::new()
            .with_frame_read(move |jpeg| {
                payload_bytes.fetch_add(jpeg.len() as u64, Ordering::Relaxed);
            })
            .with_stream_ended(move || {
                let _ = ended_tx.send(Signal::StreamEnded);
            })
    };
    let receiver = StreamReceiver::new(config.stream.clone()).with_hooks(hooks);

    let sink = |pixels: &[u8], width: u32, height: u32| -> Result<()> {
        log::debug!("relayed {}x{} frame ({} bytes)", width, height, pixels.len());
        Ok(())
    };
    let relay = FrameRelay::spawn(receiver.exchange().clone(), sink, config.relay)?;

    ctrlc::set_handler(move || {
        let _ = tx.send(Signal::Shutdown);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "mjpeg_client streaming http://{}:{}{}",
        config.stream.host,
        config.stream.port,
        config.stream.request_path
    );
    receiver.start().context("failed to start stream receiver")?;

    let reconnect_delay = args.reconnect_delay_secs.map(Duration::from_secs);
    loop {
        match rx.recv() {
            Ok(Signal::StreamEnded) => {
                let Some(delay) = reconnect_delay else {
                    log::info!("stream ended; exiting");
                    break;
                };
                log::info!("stream ended; restarting in {}s", delay.as_secs());
                match rx.recv_timeout(delay) {
                    Ok(Signal::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Ok(Signal::StreamEnded) | Err(mpsc::RecvTimeoutError::Timeout) => {
                        receiver.start().context("failed to restart stream receiver")?;
                    }
                }
            }
            Ok(Signal::Shutdown) | Err(_) => {
                log::info!("shutdown signal received, stopping stream...");
                break;
            }
        }
    }

    receiver.stop();
    let served = relay.frames_served();
    relay.stop()?;

    let stats = receiver.stats();
    log::info!(
        "decoded {} frames, dropped {}, relayed {}, {} payload bytes over {} session(s)",
        stats.frames_decoded,
        stats.frames_dropped,
        served,
        payload_bytes.load(Ordering::Relaxed),
        stats.sessions_started
    );

    if let Some(path) = snapshot_path {
        receiver
            .save_current_image(&path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        log::info!("last frame written to {}", path.display());
    }

    Ok(())
}
