//! AirPlay backend over the async AirPlay provider.
//!
//! AirPlay devices read local files themselves, accept remote-control key
//! presses, and may require pairing credentials, which are loaded from the
//! [`CredentialStore`] on connect.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{DeviceBackend, DiscoveryProcedure};
use crate::credentials::CredentialStore;
use crate::device::{
    ConnectOptions, DeviceInfo, DeviceType, NowPlaying, PlayOptions, RemoteKey, SubProtocol,
    UNKNOWN,
};
use crate::error::{CastError, CastResult, ProviderResult};
use crate::provider::{AirPlayProvider, AirPlaySession};

/// How long connect may spend re-locating the device at its address.
pub const CONNECT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

struct Connected {
    identifier: String,
    session: Arc<dyn AirPlaySession>,
}

/// Backend for AirPlay devices (Apple TV, HomePod, AV receivers).
pub struct AirPlayBackend {
    provider: Arc<dyn AirPlayProvider>,
    credentials: Option<Arc<CredentialStore>>,
    state: Mutex<Option<Connected>>,
    /// Identifier of the last connection; kept after disconnect for errors.
    last_identifier: Mutex<Option<String>>,
}

impl AirPlayBackend {
    /// Creates a disconnected backend.
    pub fn new(
        provider: Arc<dyn AirPlayProvider>,
        credentials: Option<Arc<CredentialStore>>,
    ) -> Self {
        Self {
            provider,
            credentials,
            state: Mutex::new(None),
            last_identifier: Mutex::new(None),
        }
    }

    fn session(&self) -> CastResult<(String, Arc<dyn AirPlaySession>)> {
        self.state
            .lock()
            .as_ref()
            .map(|c| (c.identifier.clone(), Arc::clone(&c.session)))
            .ok_or_else(|| {
                let identifier = self.last_identifier.lock().clone();
                CastError::NotConnected(identifier.unwrap_or_else(|| UNKNOWN.to_string()))
            })
    }

    fn stored_credentials(&self, identifier: &str) -> Vec<(SubProtocol, String)> {
        let Some(store) = &self.credentials else {
            return Vec::new();
        };
        SubProtocol::ALL
            .iter()
            .filter_map(|&proto| {
                store.get(identifier, proto).map(|cred| {
                    log::debug!("[AirPlay] Loaded {} credentials for {}", proto, identifier);
                    (proto, cred)
                })
            })
            .collect()
    }
}

#[async_trait]
impl DeviceBackend for AirPlayBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::AirPlay
    }

    async fn connect(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
        options: &ConnectOptions,
    ) -> CastResult<()> {
        let connection_error = |message: String| CastError::Connection {
            identifier: identifier.to_string(),
            message,
        };

        let hosts = [address.to_string()];
        let targets = self
            .provider
            .scan(CONNECT_SCAN_TIMEOUT, &hosts)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        // Names are what users see; identifiers can drift between firmware versions.
        let target = targets
            .iter()
            .find(|t| t.name == name)
            .or_else(|| targets.iter().find(|t| t.identifier == identifier))
            .ok_or_else(|| {
                connection_error(format!(
                    "AirPlay device '{}' not found at {}",
                    name, address
                ))
            })?;

        let credentials = self.stored_credentials(identifier);
        let session = self
            .provider
            .connect(target, &credentials)
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        *self.last_identifier.lock() = Some(identifier.to_string());
        let previous = self.state.lock().replace(Connected {
            identifier: identifier.to_string(),
            session,
        });
        if let Some(previous) = previous {
            previous.session.close();
        }

        log::info!(
            "[AirPlay] Connected to {} ({}, preferred channel {})",
            name,
            identifier,
            options.sub_protocol
        );
        Ok(())
    }

    async fn disconnect(&self) -> CastResult<()> {
        if let Some(connected) = self.state.lock().take() {
            connected.session.close();
            log::info!("[AirPlay] Disconnected from {}", connected.identifier);
        }
        Ok(())
    }

    async fn stream_file(&self, path: &Path) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .stream_file(path)
            .await
            .map_err(|e| CastError::device(&id, "stream_file", e))
    }

    async fn play_url(&self, url: &str, options: &PlayOptions) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .play_url(url, options)
            .await
            .map_err(|e| CastError::device(&id, "play_url", e))
    }

    async fn play(&self) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .play()
            .await
            .map_err(|e| CastError::device(&id, "play", e))
    }

    async fn pause(&self) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .pause()
            .await
            .map_err(|e| CastError::device(&id, "pause", e))
    }

    async fn stop(&self) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .stop()
            .await
            .map_err(|e| CastError::device(&id, "stop", e))
    }

    async fn seek(&self, position: f64) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .set_position(position)
            .await
            .map_err(|e| CastError::device(&id, "seek", e))
    }

    async fn set_volume(&self, volume: f64) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .set_volume(volume)
            .await
            .map_err(|e| CastError::device(&id, "set_volume", e))
    }

    async fn get_volume(&self) -> CastResult<f64> {
        let (id, session) = self.session()?;
        session
            .volume()
            .await
            .map(|v| v.clamp(0.0, 1.0))
            .map_err(|e| CastError::device(&id, "get_volume", e))
    }

    async fn now_playing(&self) -> CastResult<NowPlaying> {
        let (id, session) = self.session()?;
        let mut playing = session
            .playing()
            .await
            .map_err(|e| CastError::device(&id, "now_playing", e))?;
        if playing.media_type.is_empty() {
            playing.media_type = UNKNOWN.to_string();
        }
        if playing.device_state.is_empty() {
            playing.device_state = UNKNOWN.to_string();
        }
        Ok(playing)
    }

    /// Wakes the device. Not every AirPlay receiver implements power
    /// control, so a refusal is logged rather than returned.
    async fn power_on(&self) -> CastResult<()> {
        let (id, session) = self.session()?;
        if let Err(e) = session.turn_on().await {
            log::warn!("[AirPlay] power_on not available on {}: {}", id, e);
        }
        Ok(())
    }

    async fn power_off(&self) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .turn_off()
            .await
            .map_err(|e| CastError::device(&id, "power_off", e))
    }

    async fn get_power_state(&self) -> CastResult<bool> {
        let (id, session) = self.session()?;
        session
            .power_state()
            .await
            .map_err(|e| CastError::device(&id, "get_power_state", e))
    }

    async fn send_key(&self, key: RemoteKey) -> CastResult<()> {
        let (id, session) = self.session()?;
        session
            .keypress(key)
            .await
            .map_err(|e| CastError::device(&id, "send_key", e))
    }
}

/// AirPlay discovery via the provider's network-wide scan.
pub struct AirPlayDiscovery {
    provider: Arc<dyn AirPlayProvider>,
}

impl AirPlayDiscovery {
    pub fn new(provider: Arc<dyn AirPlayProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl DiscoveryProcedure for AirPlayDiscovery {
    fn device_type(&self) -> DeviceType {
        DeviceType::AirPlay
    }

    async fn discover(&self, timeout: Duration) -> ProviderResult<Vec<DeviceInfo>> {
        let targets = self.provider.scan(timeout, &[]).await?;
        Ok(targets
            .into_iter()
            .map(|t| DeviceInfo {
                name: t.name,
                address: t.address,
                identifier: t.identifier,
                device_type: DeviceType::AirPlay,
                protocols: t.services,
            })
            .collect())
    }
}
