//! Google Cast backend over the blocking Cast provider.
//!
//! Cast receivers cannot read local paths, so local files go through the
//! shared [`MediaBridge`] and the device fetches them over HTTP. Every
//! provider call runs on the blocking pool via [`run_blocking`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::backend::{run_blocking, DeviceBackend, DiscoveryProcedure};
use crate::bridge::{guess_content_type, MediaBridge};
use crate::device::{ConnectOptions, DeviceInfo, DeviceType, NowPlaying, PlayOptions, UNKNOWN};
use crate::error::{CastError, CastResult, ProviderError, ProviderResult};
use crate::provider::{CastMediaStatus, CastProvider, CastSession};

/// Content type used when neither the caller nor the file extension gives one.
pub const DEFAULT_CONTENT_TYPE: &str = "video/mp4";

/// Default wait for a receiver to report an active media session.
pub const DEFAULT_PLAYBACK_START_TIMEOUT: Duration = Duration::from_secs(20);

const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(700);

/// Protocol tag reported for discovered Cast devices.
const CAST_PROTOCOL: &str = "googlecast";

struct Connected {
    identifier: String,
    session: Arc<dyn CastSession>,
}

/// Backend for Google Cast devices (Chromecast, Nest, Cast-enabled TVs).
pub struct GoogleCastBackend {
    provider: Arc<dyn CastProvider>,
    bridge: Arc<MediaBridge>,
    playback_timeout: Duration,
    state: Mutex<Option<Connected>>,
    /// Identifier of the last connection; kept after disconnect for errors.
    last_identifier: Mutex<Option<String>>,
    /// File this backend registered on the bridge, if any.
    served: Mutex<Option<PathBuf>>,
}

impl GoogleCastBackend {
    /// Creates a disconnected backend sharing `bridge` with other Cast backends.
    pub fn new(
        provider: Arc<dyn CastProvider>,
        bridge: Arc<MediaBridge>,
        playback_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            bridge,
            playback_timeout,
            state: Mutex::new(None),
            last_identifier: Mutex::new(None),
            served: Mutex::new(None),
        }
    }

    fn session(&self) -> CastResult<(String, Arc<dyn CastSession>)> {
        self.state
            .lock()
            .as_ref()
            .map(|c| (c.identifier.clone(), Arc::clone(&c.session)))
            .ok_or_else(|| {
                let identifier = self.last_identifier.lock().clone();
                CastError::NotConnected(identifier.unwrap_or_else(|| UNKNOWN.to_string()))
            })
    }

    /// Runs one session call on the blocking pool, tagging failures with
    /// the device and operation.
    async fn call<T, F>(&self, operation: &'static str, f: F) -> CastResult<T>
    where
        F: FnOnce(&dyn CastSession) -> ProviderResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (id, session) = self.session()?;
        run_blocking(move || f(session.as_ref()))
            .await?
            .map_err(|e| CastError::device(&id, operation, e))
    }

    /// Loads media and waits for the receiver to pick it up.
    async fn load_media(&self, url: String, content_type: String) -> CastResult<()> {
        log::info!("[Cast] Loading {} ({})", url, content_type);
        self.call("play_media", move |s| s.play_media(&url, &content_type))
            .await?;
        self.wait_until_active().await
    }

    async fn wait_until_active(&self) -> CastResult<()> {
        let (id, session) = self.session()?;
        let deadline = Instant::now() + self.playback_timeout;
        let mut last_error: Option<ProviderError> = None;

        loop {
            let probe = Arc::clone(&session);
            match run_blocking(move || probe.media_status()).await? {
                Ok(CastMediaStatus { active: true, .. }) => {
                    log::debug!("[Cast] Playback active on {}", id);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => last_error = Some(e),
            }

            if Instant::now() >= deadline {
                let message = match last_error {
                    Some(e) => format!(
                        "no active media session after {:?} (last error: {})",
                        self.playback_timeout, e
                    ),
                    None => format!("no active media session after {:?}", self.playback_timeout),
                };
                log::warn!("[Cast] {} on {}", message, id);
                return Err(CastError::PlaybackStart {
                    identifier: id,
                    message,
                });
            }
            tokio::time::sleep(PLAYBACK_POLL_INTERVAL).await;
        }
    }

    /// Releases the bridge if the file it exposes is the one this backend
    /// registered. Another Cast backend may have replaced it since.
    async fn release_bridge(&self) {
        let Some(served) = self.served.lock().take() else {
            return;
        };
        if self.bridge.registered_file().as_deref() == Some(served.as_path()) {
            self.bridge.shutdown().await;
        }
    }
}

#[async_trait]
impl DeviceBackend for GoogleCastBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::GoogleCast
    }

    async fn connect(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
        _options: &ConnectOptions,
    ) -> CastResult<()> {
        let provider = Arc::clone(&self.provider);
        let (id, addr, friendly) = (identifier.to_string(), address.to_string(), name.to_string());
        let session = run_blocking(move || provider.connect(&id, &addr, &friendly))
            .await?
            .map_err(|e| CastError::Connection {
                identifier: identifier.to_string(),
                message: e.to_string(),
            })?;

        *self.last_identifier.lock() = Some(identifier.to_string());
        let previous = self.state.lock().replace(Connected {
            identifier: identifier.to_string(),
            session,
        });
        if let Some(previous) = previous {
            let Connected {
                identifier: previous_id,
                session,
            } = previous;
            let result = run_blocking(move || session.disconnect())
                .await
                .and_then(|r| r.map_err(|e| CastError::device(&previous_id, "disconnect", e)));
            if let Err(e) = result {
                log::warn!("[Cast] Dropping stale session for {}: {}", previous_id, e);
            }
        }

        log::info!("[Cast] Connected to {} ({})", name, identifier);
        Ok(())
    }

    async fn disconnect(&self) -> CastResult<()> {
        self.release_bridge().await;

        let Some(connected) = self.state.lock().take() else {
            return Ok(());
        };
        let id = connected.identifier.clone();
        let session = connected.session;
        run_blocking(move || session.disconnect())
            .await?
            .map_err(|e| CastError::device(&id, "disconnect", e))?;

        log::info!("[Cast] Disconnected from {}", id);
        Ok(())
    }

    async fn stream_file(&self, path: &Path) -> CastResult<()> {
        self.session()?;
        let url = self.bridge.serve(path).await?;
        *self.served.lock() = Some(path.to_path_buf());

        let content_type = guess_content_type(path).unwrap_or(DEFAULT_CONTENT_TYPE);
        self.load_media(url, content_type.to_string()).await
    }

    async fn play_url(&self, url: &str, options: &PlayOptions) -> CastResult<()> {
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        self.load_media(url.to_string(), content_type).await
    }

    async fn play(&self) -> CastResult<()> {
        self.call("play", |s| s.play()).await
    }

    async fn pause(&self) -> CastResult<()> {
        self.call("pause", |s| s.pause()).await
    }

    /// Stops playback and stops exposing any local file.
    async fn stop(&self) -> CastResult<()> {
        let result = self.call("stop", |s| s.stop()).await;
        self.release_bridge().await;
        result
    }

    async fn seek(&self, position: f64) -> CastResult<()> {
        self.call("seek", move |s| s.seek(position)).await
    }

    async fn set_volume(&self, volume: f64) -> CastResult<()> {
        self.call("set_volume", move |s| s.set_volume(volume)).await
    }

    async fn get_volume(&self) -> CastResult<f64> {
        self.call("get_volume", |s| {
            s.status()
                .and_then(|status| status.volume_level)
                .map(|v| v.clamp(0.0, 1.0))
                .ok_or_else(|| ProviderError::new("device has not reported its volume"))
        })
        .await
    }

    async fn now_playing(&self) -> CastResult<NowPlaying> {
        let media = self.call("now_playing", |s| s.media_status()).await?;
        Ok(NowPlaying {
            media_type: media.media_type.unwrap_or_else(|| UNKNOWN.to_string()),
            device_state: media.player_state.unwrap_or_else(|| UNKNOWN.to_string()),
            title: media.title,
            artist: media.artist,
            album: media.album_name,
            position: media.current_time,
            total_time: media.duration,
        })
    }

    /// Cast devices have no standby control; the receiver wakes on demand.
    async fn power_on(&self) -> CastResult<()> {
        self.session()?;
        Ok(())
    }

    async fn power_off(&self) -> CastResult<()> {
        self.call("power_off", |s| s.quit_app()).await
    }

    async fn get_power_state(&self) -> CastResult<bool> {
        if self.state.lock().is_none() {
            return Ok(false);
        }
        self.call("get_power_state", |s| Ok(s.status().is_some()))
            .await
    }
}

/// Cast discovery via the provider's blocking browser.
pub struct CastDiscovery {
    provider: Arc<dyn CastProvider>,
}

impl CastDiscovery {
    pub fn new(provider: Arc<dyn CastProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl DiscoveryProcedure for CastDiscovery {
    fn device_type(&self) -> DeviceType {
        DeviceType::GoogleCast
    }

    async fn discover(&self, timeout: Duration) -> ProviderResult<Vec<DeviceInfo>> {
        let provider = Arc::clone(&self.provider);
        let targets = run_blocking(move || provider.discover(timeout))
            .await
            .map_err(|e| ProviderError::new(e.to_string()))??;

        Ok(targets
            .into_iter()
            .map(|t| DeviceInfo {
                name: t.friendly_name,
                address: t.host,
                identifier: t.uuid,
                device_type: DeviceType::GoogleCast,
                protocols: vec![CAST_PROTOCOL.to_string()],
            })
            .collect())
    }
}
