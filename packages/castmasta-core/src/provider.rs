//! Trait abstractions for device-protocol capability providers.
//!
//! The protocol client libraries are external collaborators. Backends depend
//! on these traits rather than on concrete clients, which keeps the wire
//! protocols out of this crate and lets tests inject fakes.
//!
//! The two families deliberately differ in their concurrency model:
//!
//! - AirPlay providers are natively async ([`AirPlayProvider`], [`AirPlaySession`]).
//! - Cast providers are blocking ([`CastProvider`], [`CastSession`]). Backends
//!   must never call them from async context directly; see
//!   [`run_blocking`](crate::backend::run_blocking).

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::device::{NowPlaying, PlayOptions, RemoteKey, SubProtocol};
use crate::error::ProviderResult;

// ─────────────────────────────────────────────────────────────────────────────
// AirPlay (async)
// ─────────────────────────────────────────────────────────────────────────────

/// An AirPlay device as reported by the provider's scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct AirPlayTarget {
    pub name: String,
    pub address: String,
    pub identifier: String,
    /// Advertised sub-protocol service names.
    pub services: Vec<String>,
}

/// Everything needed to open a pairing handshake with one AirPlay channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingTarget {
    pub identifier: String,
    pub address: Ipv4Addr,
    pub name: String,
    pub sub_protocol: SubProtocol,
    /// Service port for the sub-protocol being paired.
    pub port: u16,
}

/// Async AirPlay client library entry point.
#[async_trait]
pub trait AirPlayProvider: Send + Sync {
    /// Scans for AirPlay devices.
    ///
    /// # Arguments
    /// * `timeout` - How long to browse
    /// * `hosts` - Restrict the scan to these addresses (empty = whole network)
    async fn scan(&self, timeout: Duration, hosts: &[String]) -> ProviderResult<Vec<AirPlayTarget>>;

    /// Opens a session to a scanned device using any stored credentials.
    async fn connect(
        &self,
        target: &AirPlayTarget,
        credentials: &[(SubProtocol, String)],
    ) -> ProviderResult<Arc<dyn AirPlaySession>>;

    /// Creates a pairing handshake. The handshake is not started yet.
    async fn pair(&self, target: &PairingTarget) -> ProviderResult<Box<dyn PairingHandshake>>;
}

/// One live AirPlay connection.
#[async_trait]
pub trait AirPlaySession: Send + Sync {
    /// Streams a local file. The provider reads the path itself.
    async fn stream_file(&self, path: &Path) -> ProviderResult<()>;

    async fn play_url(&self, url: &str, options: &PlayOptions) -> ProviderResult<()>;

    async fn play(&self) -> ProviderResult<()>;

    async fn pause(&self) -> ProviderResult<()>;

    async fn stop(&self) -> ProviderResult<()>;

    /// Seeks to an absolute position in seconds.
    async fn set_position(&self, position: f64) -> ProviderResult<()>;

    /// Sets volume in `[0.0, 1.0]`.
    async fn set_volume(&self, volume: f64) -> ProviderResult<()>;

    /// Current volume in `[0.0, 1.0]`.
    async fn volume(&self) -> ProviderResult<f64>;

    /// Current playback metadata; fields the device does not report are `None`.
    async fn playing(&self) -> ProviderResult<NowPlaying>;

    async fn turn_on(&self) -> ProviderResult<()>;

    async fn turn_off(&self) -> ProviderResult<()>;

    async fn power_state(&self) -> ProviderResult<bool>;

    async fn keypress(&self, key: RemoteKey) -> ProviderResult<()>;

    /// Releases the connection. Must be safe to call more than once.
    fn close(&self);
}

/// An in-progress pairing handshake.
///
/// Holds protocol-level resources until [`close`](PairingHandshake::close)
/// is awaited, whatever the outcome.
#[async_trait]
pub trait PairingHandshake: Send {
    /// Starts the handshake with the device.
    async fn begin(&mut self) -> ProviderResult<()>;

    /// True if the device shows the PIN itself, false if the caller must supply one.
    fn device_provides_pin(&self) -> bool;

    /// Records the PIN to submit on [`finish`](PairingHandshake::finish).
    fn pin(&mut self, pin: &str);

    /// Submits the PIN and completes the exchange.
    async fn finish(&mut self) -> ProviderResult<()>;

    fn has_paired(&self) -> bool;

    /// Negotiated credential blob, available after a successful finish.
    fn credentials(&self) -> Option<String>;

    /// Releases the handshake's protocol resources.
    async fn close(&mut self) -> ProviderResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Google Cast (blocking)
// ─────────────────────────────────────────────────────────────────────────────

/// A Cast device as reported by the provider's browser.
#[derive(Debug, Clone, PartialEq)]
pub struct CastTarget {
    pub friendly_name: String,
    pub host: String,
    pub uuid: String,
}

/// Device-level status (receiver channel).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CastStatus {
    pub volume_level: Option<f64>,
    pub app_running: bool,
}

/// Media-level status (media channel). Mirrors what Cast receivers report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CastMediaStatus {
    pub media_type: Option<String>,
    pub player_state: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_name: Option<String>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    /// True once the receiver has an active media session.
    pub active: bool,
}

/// Blocking Cast client library entry point.
///
/// Every method may block on network I/O.
pub trait CastProvider: Send + Sync {
    /// Browses for Cast devices for up to `timeout`, then stops browsing.
    fn discover(&self, timeout: Duration) -> ProviderResult<Vec<CastTarget>>;

    /// Finds the device by friendly name (or UUID) and waits until its
    /// receiver channel is ready.
    fn connect(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
    ) -> ProviderResult<Arc<dyn CastSession>>;
}

/// One live Cast connection. Every method may block.
pub trait CastSession: Send + Sync {
    /// Asks the receiver to fetch and play a URL.
    fn play_media(&self, url: &str, content_type: &str) -> ProviderResult<()>;

    fn play(&self) -> ProviderResult<()>;

    fn pause(&self) -> ProviderResult<()>;

    fn stop(&self) -> ProviderResult<()>;

    fn seek(&self, position: f64) -> ProviderResult<()>;

    fn set_volume(&self, volume: f64) -> ProviderResult<()>;

    /// Receiver status; `None` if the device has not reported yet.
    fn status(&self) -> Option<CastStatus>;

    fn media_status(&self) -> ProviderResult<CastMediaStatus>;

    /// Terminates the running receiver application.
    fn quit_app(&self) -> ProviderResult<()>;

    fn disconnect(&self) -> ProviderResult<()>;
}
