use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::normalize::PixelFormat;
use crate::ingest::receiver::StreamConfig;
use crate::relay::RelayConfig;

const DEFAULT_RELAY_INTERVAL_MS: u64 = 33;

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    stream: Option<StreamConfigFile>,
    relay: Option<RelayConfigFile>,
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    request_path: Option<String>,
    boundary: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    interval_ms: Option<u64>,
    format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub stream: StreamConfig,
    pub relay: RelayConfig,
    pub snapshot_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MJPEG_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Result<Self> {
        let stream_file = file.stream.unwrap_or_default();
        // A URL sets host, port and path; explicit fields refine it.
        let mut stream = match stream_file.url.as_deref() {
            Some(url) => StreamConfig::from_url(url)?,
            None => StreamConfig::default(),
        };
        if let Some(host) = stream_file.host {
            stream.host = host;
        }
        if let Some(port) = stream_file.port {
            stream.port = port;
        }
        if let Some(path) = stream_file.request_path {
            stream.request_path = path;
        }
        if let Some(boundary) = stream_file.boundary {
            stream.boundary = boundary;
        }

        let relay_file = file.relay.unwrap_or_default();
        let relay = RelayConfig {
            poll_interval: Duration::from_millis(
                relay_file.interval_ms.unwrap_or(DEFAULT_RELAY_INTERVAL_MS),
            ),
            format: match relay_file.format.as_deref() {
                Some(name) => name.parse().map_err(|e: String| anyhow!(e))?,
                None => PixelFormat::default(),
            },
        };

        Ok(Self {
            stream,
            relay,
            snapshot_path: file.snapshot_path,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("MJPEG_URL") {
            if !url.trim().is_empty() {
                let boundary = std::mem::take(&mut self.stream.boundary);
                self.stream = StreamConfig::from_url(url.trim())?;
                self.stream.boundary = boundary;
            }
        }
        if let Ok(host) = std::env::var("MJPEG_HOST") {
            if !host.trim().is_empty() {
                self.stream.host = host.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("MJPEG_PORT") {
            self.stream.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("MJPEG_PORT must be a TCP port number"))?;
        }
        if let Ok(path) = std::env::var("MJPEG_REQUEST_PATH") {
            if !path.trim().is_empty() {
                self.stream.request_path = path.trim().to_string();
            }
        }
        if let Ok(boundary) = std::env::var("MJPEG_BOUNDARY") {
            if !boundary.trim().is_empty() {
                self.stream.boundary = boundary.trim().to_string();
            }
        }
        if let Ok(interval) = std::env::var("MJPEG_RELAY_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("MJPEG_RELAY_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.relay.poll_interval = Duration::from_millis(millis);
        }
        if let Ok(path) = std::env::var("MJPEG_SNAPSHOT_PATH") {
            if !path.trim().is_empty() {
                self.snapshot_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.stream.host.trim().is_empty() {
            return Err(anyhow!("stream host must not be empty"));
        }
        if self.stream.port == 0 {
            return Err(anyhow!("stream port must be non-zero"));
        }
        if !self.stream.request_path.starts_with('/') {
            return Err(anyhow!(
                "request path '{}' must start with '/'",
                self.stream.request_path
            ));
        }
        if self.stream.boundary.trim().is_empty() {
            return Err(anyhow!("multipart boundary must not be empty"));
        }
        if self.relay.poll_interval.is_zero() {
            return Err(anyhow!("relay interval must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
