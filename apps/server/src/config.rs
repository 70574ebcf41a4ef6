//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use castpoint_core::{AudioFormat, MountpointSettings};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    /// Override: `CASTPOINT_BIND_ADDRESS`
    pub bind_address: IpAddr,

    /// Port to listen on.
    /// Override: `CASTPOINT_BIND_PORT`
    pub bind_port: u16,

    /// Listener limit. Only one listener is ever served; 0 refuses everyone.
    pub max_clients: usize,

    /// Stream bitrate in bits per second.
    pub bitrate: u32,

    pub channels: u16,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Station identity, metadata period and initial burst.
    pub mountpoint: MountpointSettings,

    /// Initial ICY stream title.
    /// Override: `CASTPOINT_STREAM_TITLE`
    pub stream_title: String,

    /// MP3 file streamed in a loop. Usually given with `--input`.
    pub source_file: Option<PathBuf>,

    /// Bytes per buffer handed to the server.
    pub chunk_size: usize,

    /// Buffers queued before the oldest is dropped.
    pub pool_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 8000,
            max_clients: 1,
            bitrate: 128_000,
            channels: 2,
            sample_rate: 44_100,
            mountpoint: MountpointSettings::default(),
            stream_title: String::new(),
            source_file: None,
            chunk_size: 4096,
            pool_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies overrides looked up by environment variable name.
    ///
    /// Values that fail to parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ip) = lookup("CASTPOINT_BIND_ADDRESS").and_then(|v| v.parse().ok()) {
            self.bind_address = ip;
        }

        if let Some(port) = lookup("CASTPOINT_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(title) = lookup("CASTPOINT_STREAM_TITLE") {
            self.stream_title = title;
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.bitrate, self.channels, self.sample_rate)
    }

    /// Mountpoint settings with the top-level client limit applied.
    pub fn to_mountpoint(&self) -> MountpointSettings {
        MountpointSettings {
            max_clients: self.max_clients,
            ..self.mountpoint.clone()
        }
    }
}
