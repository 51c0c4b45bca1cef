//! Device domain types shared by every backend.
//!
//! These types are protocol-neutral: discovery produces [`DeviceInfo`]
//! descriptors, and every backend reports playback through [`NowPlaying`]
//! so callers see one schema regardless of the device's wire protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CastError;

/// Sentinel reported for media type or device state when the provider lacks it.
pub const UNKNOWN: &str = "Unknown";

/// Wire protocol family a device speaks.
///
/// The first variant is the fallback when an identifier cannot be resolved
/// from the last scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Apple TV, HomePod, AirPlay receivers.
    #[default]
    AirPlay,
    /// Chromecast, Google Home, Cast-enabled TVs.
    GoogleCast,
}

impl DeviceType {
    /// All known device types, in registration order.
    pub const ALL: [DeviceType; 2] = [DeviceType::AirPlay, DeviceType::GoogleCast];

    /// Whether the device needs a pairing handshake before accepting control.
    #[must_use]
    pub fn supports_pairing(self) -> bool {
        matches!(self, Self::AirPlay)
    }

    /// Whether the device accepts remote-control key presses.
    #[must_use]
    pub fn supports_remote_keys(self) -> bool {
        matches!(self, Self::AirPlay)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AirPlay => "airplay",
            Self::GoogleCast => "googlecast",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "airplay" => Ok(Self::AirPlay),
            "googlecast" | "cast" => Ok(Self::GoogleCast),
            other => Err(CastError::Validation(format!(
                "Unknown device type '{}'. Allowed: airplay, googlecast",
                other
            ))),
        }
    }
}

/// Independently pairable channel within an AirPlay device.
///
/// The display form is the key used in the credential file
/// (`"{identifier}:{sub_protocol}"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubProtocol {
    /// Media streaming channel.
    #[default]
    AirPlay,
    /// Raw audio (RAOP) channel.
    #[serde(rename = "RAOP")]
    Raop,
    /// Remote-control channel.
    Companion,
}

impl SubProtocol {
    /// Channels whose stored credentials are loaded on connect.
    pub const ALL: [SubProtocol; 3] = [Self::AirPlay, Self::Raop, Self::Companion];

    /// Service port used to open a pairing handshake, if the channel pairs.
    #[must_use]
    pub fn pairing_port(self) -> Option<u16> {
        match self {
            Self::AirPlay => Some(7000),
            Self::Companion => Some(49153),
            Self::Raop => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AirPlay => "AirPlay",
            Self::Raop => "RAOP",
            Self::Companion => "Companion",
        }
    }
}

impl fmt::Display for SubProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubProtocol {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "airplay" => Ok(Self::AirPlay),
            "raop" => Ok(Self::Raop),
            "companion" => Ok(Self::Companion),
            other => Err(CastError::Validation(format!(
                "Unknown protocol '{}'. Allowed: airplay, companion, raop",
                other
            ))),
        }
    }
}

/// A discovered device.
///
/// Produced only by discovery. `identifier` is the stable cross-call key and
/// is namespaced per protocol, so descriptors from different protocols never
/// collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Friendly name.
    pub name: String,
    /// Network address (IP or host).
    pub address: String,
    /// Stable identifier.
    pub identifier: String,
    /// Protocol family this device was discovered through.
    pub device_type: DeviceType,
    /// Sub-protocols the device advertises.
    pub protocols: Vec<String>,
}

/// Normalized playback information.
///
/// Every field is always present. `media_type` and `device_state` fall back
/// to [`UNKNOWN`]; the rest serialize as `null` when the provider lacks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub media_type: String,
    pub device_state: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Elapsed position in seconds.
    pub position: Option<f64>,
    /// Track length in seconds.
    pub total_time: Option<f64>,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self {
            media_type: UNKNOWN.to_string(),
            device_state: UNKNOWN.to_string(),
            title: None,
            artist: None,
            album: None,
            position: None,
            total_time: None,
        }
    }
}

/// Remote-control keys accepted by AirPlay devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Select,
    Menu,
    Home,
    Play,
    Pause,
    PlayPause,
    Next,
    Previous,
}

impl RemoteKey {
    const NAMES: [(&'static str, RemoteKey); 12] = [
        ("up", Self::Up),
        ("down", Self::Down),
        ("left", Self::Left),
        ("right", Self::Right),
        ("select", Self::Select),
        ("menu", Self::Menu),
        ("home", Self::Home),
        ("play", Self::Play),
        ("pause", Self::Pause),
        ("play_pause", Self::PlayPause),
        ("next", Self::Next),
        ("previous", Self::Previous),
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, key)| *key == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

impl FromStr for RemoteKey {
    type Err = CastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, key)| *key)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::NAMES.iter().map(|(name, _)| *name).collect();
                CastError::Validation(format!(
                    "Unknown key '{}'. Allowed: {}",
                    s,
                    allowed.join(", ")
                ))
            })
    }
}

/// Options for handing a remote URL to a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayOptions {
    /// MIME type hint. Cast devices default to `video/mp4` when absent.
    pub content_type: Option<String>,
}

/// Options for establishing a device session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectOptions {
    /// Sub-protocol to prefer on AirPlay devices.
    pub sub_protocol: SubProtocol,
    /// Explicit device type. Overrides the last-scan lookup.
    pub device_type: Option<DeviceType>,
}
