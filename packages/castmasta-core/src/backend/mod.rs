//! Device backends.
//!
//! A backend is one connection to one device, wrapping a protocol's
//! capability provider behind the protocol-neutral [`DeviceBackend`] trait.
//!
//! # Module Structure
//!
//! - `airplay` - Adapter over the async AirPlay provider (pairing, remote keys)
//! - `cast` - Adapter over the blocking Cast provider (media bridge, worker offload)
//!
//! Each module also provides the [`DiscoveryProcedure`] for its protocol.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::device::{ConnectOptions, DeviceInfo, DeviceType, NowPlaying, PlayOptions, RemoteKey};
use crate::error::{CastError, CastResult, ProviderResult};

pub mod airplay;
pub mod cast;

pub use airplay::{AirPlayBackend, AirPlayDiscovery};
pub use cast::{CastDiscovery, GoogleCastBackend};

/// Protocol-neutral contract for one connected device.
///
/// Backends are created disconnected, then [`connect`](DeviceBackend::connect)ed.
/// Callers must not issue concurrent operations against one backend; the
/// underlying providers are not guaranteed reentrant.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Protocol family of this backend.
    fn device_type(&self) -> DeviceType;

    /// Establishes the session.
    ///
    /// # Errors
    ///
    /// [`CastError::Connection`] if the device is unreachable or refuses the
    /// session (including missing or stale pairing credentials).
    async fn connect(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
        options: &ConnectOptions,
    ) -> CastResult<()>;

    /// Releases every held resource. Safe on an already-disconnected backend.
    async fn disconnect(&self) -> CastResult<()>;

    /// Plays a local file that has already passed path validation.
    async fn stream_file(&self, path: &Path) -> CastResult<()>;

    /// Hands a remote URL to the device for direct retrieval.
    async fn play_url(&self, url: &str, options: &PlayOptions) -> CastResult<()>;

    async fn play(&self) -> CastResult<()>;

    async fn pause(&self) -> CastResult<()>;

    async fn stop(&self) -> CastResult<()>;

    /// Seeks to `position` seconds.
    async fn seek(&self, position: f64) -> CastResult<()>;

    /// Sets volume in `[0.0, 1.0]`.
    async fn set_volume(&self, volume: f64) -> CastResult<()>;

    /// Current volume in `[0.0, 1.0]`.
    async fn get_volume(&self) -> CastResult<f64>;

    async fn now_playing(&self) -> CastResult<NowPlaying>;

    async fn power_on(&self) -> CastResult<()>;

    async fn power_off(&self) -> CastResult<()>;

    /// `true` = on.
    async fn get_power_state(&self) -> CastResult<bool>;

    /// Sends a remote-control key press.
    ///
    /// Only devices whose type [supports remote keys](DeviceType::supports_remote_keys)
    /// override this.
    async fn send_key(&self, _key: RemoteKey) -> CastResult<()> {
        Err(CastError::UnsupportedOperation {
            operation: "send_key",
            device_type: self.device_type(),
        })
    }
}

/// One protocol's discovery procedure.
///
/// Procedures run concurrently under the [`ScanAggregator`](crate::scan::ScanAggregator);
/// a failing procedure contributes nothing rather than failing the scan.
#[async_trait]
pub trait DiscoveryProcedure: Send + Sync {
    /// Protocol family this procedure discovers.
    fn device_type(&self) -> DeviceType;

    /// Browses for up to `timeout` and returns descriptors tagged with
    /// [`device_type`](DiscoveryProcedure::device_type).
    async fn discover(&self, timeout: Duration) -> ProviderResult<Vec<DeviceInfo>>;
}

/// Runs a blocking provider call on the blocking worker pool.
///
/// Keeps a slow device from stalling the scheduler or other devices. The
/// worker is not cancelled if the caller stops waiting; it runs until the
/// provider returns.
///
/// # Errors
///
/// [`CastError::Internal`] if the worker panicked.
pub async fn run_blocking<T, F>(f: F) -> CastResult<ProviderResult<T>>
where
    F: FnOnce() -> ProviderResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CastError::Internal(format!("device worker failed: {}", e)))
}
