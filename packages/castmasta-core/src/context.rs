//! Network context for the local media bridge.
//!
//! Devices fetch bridged files over the LAN, so URLs must carry an address
//! the device can reach rather than loopback. [`IpDetector`] abstracts how
//! that address is found; [`UrlBuilder`] turns it into media URLs.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use url::Url;

/// Address used when no LAN interface can be detected.
pub const LOOPBACK_FALLBACK: &str = "127.0.0.1";

/// Path prefix under which the bridge exposes its registered file.
pub const MEDIA_PATH_PREFIX: &str = "media";

/// Trait for detecting the local IP address.
///
/// Different environments may need different detection strategies.
/// This trait allows injecting the appropriate detector.
pub trait IpDetector: Send + Sync {
    /// Detects the local IP address.
    fn detect(&self) -> Result<String, NetworkError>;
}

/// Default IP detector using the system's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector;

impl LocalIpDetector {
    /// Creates a new `LocalIpDetector`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Creates a new `LocalIpDetector` wrapped in an Arc.
    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self::new())
    }
}

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

/// Detector that always reports the same address.
///
/// Used when the advertise address is configured explicitly, and in tests.
#[derive(Debug, Clone)]
pub struct FixedIpDetector(pub String);

impl IpDetector for FixedIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        Ok(self.0.clone())
    }
}

/// Detects the LAN address, falling back to loopback.
///
/// Loopback URLs only work for devices on the same host, so the fallback is
/// logged.
pub fn detect_or_loopback(detector: &dyn IpDetector) -> String {
    match detector.detect() {
        Ok(ip) => ip,
        Err(e) => {
            log::warn!(
                "[Bridge] {}; falling back to {} (devices on other hosts cannot fetch media)",
                e,
                LOOPBACK_FALLBACK
            );
            LOOPBACK_FALLBACK.to_string()
        }
    }
}

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),
}

/// Builder for constructing URLs served by the media bridge.
pub struct UrlBuilder {
    ip: String,
    port: u16,
}

impl UrlBuilder {
    /// Creates a new `UrlBuilder` for the given bridge address.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Returns the base URL for the bridge (e.g., `http://192.168.1.100:8089`).
    ///
    /// IPv6 hosts are bracketed (`http://[fe80::1]:8089`).
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.ip.parse::<IpAddr>() {
            Ok(ip) => format!("http://{}", SocketAddr::new(ip, self.port)),
            Err(_) => format!("http://{}:{}", self.ip, self.port),
        }
    }

    /// Returns the URL for a registered file name.
    ///
    /// The name becomes a single percent-encoded path segment, so spaces and
    /// reserved characters survive the round trip through the device.
    #[must_use]
    pub fn media_url(&self, file_name: &str) -> String {
        match Url::parse(&self.base_url()) {
            Ok(mut url) => {
                if let Ok(mut segments) = url.path_segments_mut() {
                    segments.clear().push(MEDIA_PATH_PREFIX).push(file_name);
                }
                url.to_string()
            }
            Err(_) => format!("{}/{}/{}", self.base_url(), MEDIA_PATH_PREFIX, file_name),
        }
    }
}
