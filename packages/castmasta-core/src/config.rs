//! Agent configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::DEFAULT_BRIDGE_PORT;
use crate::convert::{default_voice_dir, DEFAULT_FFMPEG_BIN, DEFAULT_PIPER_BIN};
use crate::credentials::default_credentials_path;
use crate::error::{CastError, CastResult};

/// Agent configuration loaded from YAML with environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default discovery window in seconds (clamped to 1..=30 per scan).
    /// Override: `CASTMASTA_SCAN_TIMEOUT`
    pub scan_timeout_secs: u64,

    /// Credential file location.
    /// Override: `CASTMASTA_STORAGE_PATH`
    pub storage_path: PathBuf,

    /// Port for the Cast media bridge; 0 picks a free port.
    /// Override: `CASTMASTA_FILE_SERVER_PORT`
    pub cast_file_server_port: u16,

    /// IP address to put in media bridge URLs.
    /// This should be an address Cast devices can reach.
    /// If not specified, auto-detection will be attempted.
    /// Override: `CASTMASTA_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// How long a Cast device may take to report active playback.
    pub playback_start_timeout_secs: u64,

    /// Override: `CASTMASTA_FFMPEG_BIN`
    pub ffmpeg_bin: PathBuf,

    /// Override: `CASTMASTA_PIPER_BIN`
    pub piper_bin: PathBuf,

    /// Directory holding piper voice models.
    pub piper_voice_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 5,
            storage_path: default_credentials_path(),
            cast_file_server_port: DEFAULT_BRIDGE_PORT,
            advertise_ip: None,
            playback_start_timeout_secs: 20,
            ffmpeg_bin: PathBuf::from(DEFAULT_FFMPEG_BIN),
            piper_bin: PathBuf::from(DEFAULT_PIPER_BIN),
            piper_voice_dir: default_voice_dir(),
        }
    }
}

impl AgentConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Configuration`] if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> CastResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> CastResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CastError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            CastError::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = lookup("CASTMASTA_SCAN_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.scan_timeout_secs = secs;
        }

        if let Some(path) = lookup("CASTMASTA_STORAGE_PATH").filter(|v| !v.is_empty()) {
            self.storage_path = PathBuf::from(path);
        }

        if let Some(port) = lookup("CASTMASTA_FILE_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.cast_file_server_port = port;
        }

        if let Some(ip) = lookup("CASTMASTA_ADVERTISE_IP").and_then(|v| v.parse().ok()) {
            self.advertise_ip = Some(ip);
        }

        if let Some(bin) = lookup("CASTMASTA_FFMPEG_BIN").filter(|v| !v.is_empty()) {
            self.ffmpeg_bin = PathBuf::from(bin);
        }

        if let Some(bin) = lookup("CASTMASTA_PIPER_BIN").filter(|v| !v.is_empty()) {
            self.piper_bin = PathBuf::from(bin);
        }
    }

    pub fn playback_start_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_start_timeout_secs.max(1))
    }
}
