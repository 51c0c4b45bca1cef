//! The CastMasta facade.
//!
//! [`CastAgent`] is the single entry point front ends talk to. It owns the
//! connected backends, the last scan, open pairing handshakes, the credential
//! store and the media bridge, validates every input, and dispatches each
//! operation to the backend for the device's protocol.
//!
//! # Device-type resolution
//!
//! Callers may connect without saying which protocol a device speaks. The
//! agent then looks the identifier up in the last scan and, if it is not
//! there, assumes AirPlay. That guess can be wrong when no scan has run or
//! the scan is stale; pass [`ConnectOptions::device_type`] to be explicit.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::backend::{
    AirPlayBackend, AirPlayDiscovery, CastDiscovery, DeviceBackend, DiscoveryProcedure,
    GoogleCastBackend,
};
use crate::bridge::MediaBridge;
use crate::config::AgentConfig;
use crate::context::{FixedIpDetector, IpDetector, LocalIpDetector};
use crate::convert::{MediaConverter, ProcessConverter};
use crate::credentials::CredentialStore;
use crate::device::{
    ConnectOptions, DeviceInfo, DeviceType, NowPlaying, PlayOptions, RemoteKey, SubProtocol,
};
use crate::error::{CastError, CastResult};
use crate::pairing::{PairingSessionManager, PairingState, PairingStatus};
use crate::provider::{AirPlayProvider, CastProvider};
use crate::scan::ScanAggregator;
use crate::validation;

/// Builder for [`CastAgent`].
///
/// The two capability providers are required; everything else defaults from
/// [`AgentConfig`].
pub struct CastAgentBuilder {
    airplay: Arc<dyn AirPlayProvider>,
    cast: Arc<dyn CastProvider>,
    config: AgentConfig,
    converter: Option<Arc<dyn MediaConverter>>,
    ip_detector: Option<Arc<dyn IpDetector>>,
}

impl CastAgentBuilder {
    pub fn new(airplay: Arc<dyn AirPlayProvider>, cast: Arc<dyn CastProvider>) -> Self {
        Self {
            airplay,
            cast,
            config: AgentConfig::default(),
            converter: None,
            ip_detector: None,
        }
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the ffmpeg/piper converter.
    pub fn converter(mut self, converter: Arc<dyn MediaConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Replaces LAN address detection for media bridge URLs.
    pub fn ip_detector(mut self, detector: Arc<dyn IpDetector>) -> Self {
        self.ip_detector = Some(detector);
        self
    }

    /// Opens the credential store and wires the agent together.
    ///
    /// # Errors
    ///
    /// Returns [`CastError::Persistence`] if the credential directory cannot
    /// be created.
    pub fn build(self) -> CastResult<CastAgent> {
        let config = self.config;
        let credentials = Arc::new(CredentialStore::open(&config.storage_path)?);

        let ip_detector: Arc<dyn IpDetector> = match (self.ip_detector, config.advertise_ip) {
            (Some(detector), _) => detector,
            (None, Some(ip)) => Arc::new(FixedIpDetector(ip.to_string())),
            (None, None) => LocalIpDetector::arc(),
        };
        let bridge = Arc::new(MediaBridge::new(config.cast_file_server_port, ip_detector));

        let converter: Arc<dyn MediaConverter> = match self.converter {
            Some(converter) => converter,
            None => Arc::new(ProcessConverter::new(
                &config.ffmpeg_bin,
                &config.piper_bin,
                &config.piper_voice_dir,
            )),
        };

        let procedures: Vec<Arc<dyn DiscoveryProcedure>> = vec![
            Arc::new(AirPlayDiscovery::new(Arc::clone(&self.airplay))),
            Arc::new(CastDiscovery::new(Arc::clone(&self.cast))),
        ];

        log::info!(
            "[Agent] Ready (credentials at {}, bridge port {})",
            credentials.path().display(),
            config.cast_file_server_port
        );

        Ok(CastAgent {
            scanner: ScanAggregator::new(procedures),
            pairing: PairingSessionManager::new(Arc::clone(&self.airplay)),
            airplay: self.airplay,
            cast: self.cast,
            credentials,
            bridge,
            converter,
            devices: DashMap::new(),
            last_scan: RwLock::new(Vec::new()),
            config,
        })
    }
}

/// One control surface for AirPlay and Google Cast devices.
pub struct CastAgent {
    config: AgentConfig,
    airplay: Arc<dyn AirPlayProvider>,
    cast: Arc<dyn CastProvider>,
    credentials: Arc<CredentialStore>,
    bridge: Arc<MediaBridge>,
    converter: Arc<dyn MediaConverter>,
    scanner: ScanAggregator,
    pairing: PairingSessionManager,
    devices: DashMap<String, Arc<dyn DeviceBackend>>,
    last_scan: RwLock<Vec<DeviceInfo>>,
}

impl CastAgent {
    pub fn builder(
        airplay: Arc<dyn AirPlayProvider>,
        cast: Arc<dyn CastProvider>,
    ) -> CastAgentBuilder {
        CastAgentBuilder::new(airplay, cast)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    // ─────────────────────────────────────────────────────────────────────
    // Discovery and connections
    // ─────────────────────────────────────────────────────────────────────

    /// Discovers devices on every protocol and replaces the last scan.
    ///
    /// `timeout_secs` defaults to the configured scan timeout and is clamped
    /// to 1..=30.
    pub async fn scan(&self, timeout_secs: Option<u64>) -> Vec<DeviceInfo> {
        let timeout = timeout_secs.unwrap_or(self.config.scan_timeout_secs);
        let devices = self.scanner.scan(timeout).await;
        *self.last_scan.write() = devices.clone();
        devices
    }

    /// Devices from the most recent scan. May be stale.
    pub fn last_scan(&self) -> Vec<DeviceInfo> {
        self.last_scan.read().clone()
    }

    /// Device type from the last scan, or AirPlay if the identifier is not in it.
    pub fn resolve_device_type(&self, identifier: &str) -> DeviceType {
        let cached = self
            .last_scan
            .read()
            .iter()
            .find(|d| d.identifier == identifier)
            .map(|d| d.device_type);
        cached.unwrap_or_else(|| {
            log::debug!(
                "[Agent] {} not in last scan, assuming {}",
                identifier,
                DeviceType::default()
            );
            DeviceType::default()
        })
    }

    fn create_backend(&self, device_type: DeviceType) -> Arc<dyn DeviceBackend> {
        match device_type {
            DeviceType::AirPlay => Arc::new(AirPlayBackend::new(
                Arc::clone(&self.airplay),
                Some(Arc::clone(&self.credentials)),
            )),
            DeviceType::GoogleCast => Arc::new(GoogleCastBackend::new(
                Arc::clone(&self.cast),
                Arc::clone(&self.bridge),
                self.config.playback_start_timeout(),
            )),
        }
    }

    /// Connects to a device and keeps the session under `identifier`.
    ///
    /// An existing session for the identifier is disconnected first.
    /// Returns the device type the connection was made with.
    ///
    /// # Errors
    ///
    /// [`CastError::Connection`] if the device cannot be reached or refuses
    /// the session.
    pub async fn connect(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
        options: ConnectOptions,
    ) -> CastResult<DeviceType> {
        let device_type = options
            .device_type
            .unwrap_or_else(|| self.resolve_device_type(identifier));

        if let Some((_, previous)) = self.devices.remove(identifier) {
            if let Err(e) = previous.disconnect().await {
                log::warn!("[Agent] Dropping stale session for {}: {}", identifier, e);
            }
        }

        let backend = self.create_backend(device_type);
        backend.connect(identifier, address, name, &options).await?;
        self.devices.insert(identifier.to_string(), backend);

        log::info!("[Agent] {} connected as {}", identifier, device_type);
        Ok(device_type)
    }

    /// Scans, then connects to the first device named `name`.
    ///
    /// Returns the identifier and device type that were connected.
    ///
    /// # Errors
    ///
    /// [`CastError::Validation`] if no scanned device has that name.
    pub async fn connect_by_name(
        &self,
        name: &str,
        sub_protocol: SubProtocol,
    ) -> CastResult<(String, DeviceType)> {
        let device = self
            .scan(None)
            .await
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CastError::Validation(format!("Device '{}' not found", name)))?;

        let options = ConnectOptions {
            sub_protocol,
            device_type: Some(device.device_type),
        };
        let device_type = self
            .connect(&device.identifier, &device.address, &device.name, options)
            .await?;
        Ok((device.identifier, device_type))
    }

    /// Disconnects and forgets a device. Unknown identifiers are ignored.
    pub async fn disconnect(&self, identifier: &str) -> CastResult<()> {
        match self.devices.remove(identifier) {
            Some((_, backend)) => {
                backend.disconnect().await?;
                log::info!("[Agent] {} disconnected", identifier);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Disconnects every device, continuing past individual failures.
    pub async fn disconnect_all(&self) {
        let identifiers: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        for identifier in identifiers {
            if let Err(e) = self.disconnect(&identifier).await {
                log::warn!("[Agent] Disconnect of {} failed: {}", identifier, e);
            }
        }
    }

    /// Releases every session, open handshake and the media bridge.
    pub async fn shutdown(&self) {
        log::info!("[Agent] Shutting down");
        self.disconnect_all().await;
        self.pairing.close_all().await;
        self.bridge.shutdown().await;
    }

    /// Connected devices, sorted by identifier.
    pub fn connected_devices(&self) -> Vec<(String, DeviceType)> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .map(|e| (e.key().clone(), e.value().device_type()))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));
        devices
    }

    fn backend(&self, identifier: &str) -> CastResult<Arc<dyn DeviceBackend>> {
        self.devices
            .get(identifier)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CastError::NotConnected(identifier.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pairing
    // ─────────────────────────────────────────────────────────────────────

    /// Opens a pairing handshake with an AirPlay device channel.
    ///
    /// # Errors
    ///
    /// - [`CastError::UnsupportedOperation`] if the device resolves to a type
    ///   that does not pair
    /// - [`CastError::Validation`] for RAOP or a non-IPv4 address
    /// - [`CastError::Connection`] if the device refuses
    pub async fn pair(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
        sub_protocol: SubProtocol,
    ) -> CastResult<PairingStatus> {
        let device_type = self.resolve_device_type(identifier);
        if !device_type.supports_pairing() {
            return Err(CastError::UnsupportedOperation {
                operation: "pair",
                device_type,
            });
        }
        self.pairing
            .initiate(identifier, address, name, sub_protocol)
            .await
    }

    /// Completes a pairing handshake with the PIN and stores the credential.
    ///
    /// Returns `false` if the device rejected the PIN.
    ///
    /// # Errors
    ///
    /// [`CastError::NoActiveSession`] if [`pair`](Self::pair) was not called
    /// for this identifier and sub-protocol.
    pub async fn pair_with_pin(
        &self,
        identifier: &str,
        pin: &str,
        sub_protocol: SubProtocol,
    ) -> CastResult<bool> {
        self.pairing
            .complete(identifier, sub_protocol, pin, &self.credentials)
            .await
    }

    pub fn pairing_state(&self, identifier: &str, sub_protocol: SubProtocol) -> PairingState {
        self.pairing.state(identifier, sub_protocol)
    }

    /// Forgets stored credentials for one channel, or all channels when
    /// `sub_protocol` is `None`.
    pub fn remove_credentials(
        &self,
        identifier: &str,
        sub_protocol: Option<SubProtocol>,
    ) -> CastResult<()> {
        self.credentials.delete(identifier, sub_protocol)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Power
    // ─────────────────────────────────────────────────────────────────────

    pub async fn power_on(&self, identifier: &str) -> CastResult<()> {
        self.backend(identifier)?.power_on().await
    }

    pub async fn power_off(&self, identifier: &str) -> CastResult<()> {
        self.backend(identifier)?.power_off().await
    }

    pub async fn get_power_state(&self, identifier: &str) -> CastResult<bool> {
        self.backend(identifier)?.get_power_state().await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────────────

    pub async fn play(&self, identifier: &str) -> CastResult<()> {
        self.backend(identifier)?.play().await
    }

    pub async fn pause(&self, identifier: &str) -> CastResult<()> {
        self.backend(identifier)?.pause().await
    }

    pub async fn stop(&self, identifier: &str) -> CastResult<()> {
        self.backend(identifier)?.stop().await
    }

    /// Seeks to `position` seconds.
    pub async fn seek(&self, identifier: &str, position: f64) -> CastResult<()> {
        validation::validate_position(position)?;
        self.backend(identifier)?.seek(position).await
    }

    /// Plays a remote `http`/`https` URL.
    pub async fn play_url(
        &self,
        identifier: &str,
        url: &str,
        options: PlayOptions,
    ) -> CastResult<()> {
        validation::validate_url(url)?;
        self.backend(identifier)?.play_url(url, &options).await
    }

    /// Plays a local media file.
    pub async fn stream_file(&self, identifier: &str, path: impl AsRef<Path>) -> CastResult<()> {
        let path = validation::validate_media_path(path)?;
        self.backend(identifier)?.stream_file(&path).await
    }

    /// Shows a still image for `duration_secs` (default one hour, clamped to
    /// 1..=86400) by rendering it into a video.
    pub async fn display_image(
        &self,
        identifier: &str,
        image_path: impl AsRef<Path>,
        duration_secs: Option<f64>,
    ) -> CastResult<()> {
        let duration = validation::clamp_duration(
            duration_secs.unwrap_or(f64::from(validation::DEFAULT_DISPLAY_DURATION_SECS)),
        )?;
        let image = validation::validate_image_path(image_path)?;
        let backend = self.backend(identifier)?;

        let video = self.converter.image_to_video(&image, duration).await?;
        log::info!(
            "[Agent] Displaying {} on {} for {}s",
            image.display(),
            identifier,
            duration
        );
        backend.stream_file(&video).await
    }

    /// Speaks `text` on the device.
    ///
    /// `voice` defaults to `en_US-lessac-medium`. AirPlay devices get a
    /// `menu` key press first to wake them and reset their idle timer.
    pub async fn announce(
        &self,
        identifier: &str,
        text: &str,
        voice: Option<&str>,
    ) -> CastResult<()> {
        let voice = voice.unwrap_or(validation::DEFAULT_VOICE);
        validation::validate_announce_text(text)?;
        validation::validate_voice(voice)?;
        let backend = self.backend(identifier)?;

        if backend.device_type().supports_remote_keys() {
            if let Err(e) = backend.send_key(RemoteKey::Menu).await {
                log::debug!("[Agent] Wake key ignored by {}: {}", identifier, e);
            }
        }

        let speech = self.converter.text_to_speech(text, voice).await?;
        log::info!("[Agent] Announcing on {} with {}", identifier, voice);
        backend.stream_file(&speech).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Volume and status
    // ─────────────────────────────────────────────────────────────────────

    pub async fn set_volume(&self, identifier: &str, volume: f64) -> CastResult<()> {
        validation::validate_volume(volume)?;
        self.backend(identifier)?.set_volume(volume).await
    }

    /// Raises volume by `delta` (default 0.1), capped at 1.0. Returns the new volume.
    pub async fn volume_up(&self, identifier: &str, delta: Option<f64>) -> CastResult<f64> {
        let delta = delta.unwrap_or(validation::DEFAULT_VOLUME_DELTA);
        validation::validate_delta(delta)?;
        let backend = self.backend(identifier)?;
        let volume = (backend.get_volume().await? + delta).min(1.0);
        backend.set_volume(volume).await?;
        Ok(volume)
    }

    /// Lowers volume by `delta` (default 0.1), floored at 0.0. Returns the new volume.
    pub async fn volume_down(&self, identifier: &str, delta: Option<f64>) -> CastResult<f64> {
        let delta = delta.unwrap_or(validation::DEFAULT_VOLUME_DELTA);
        validation::validate_delta(delta)?;
        let backend = self.backend(identifier)?;
        let volume = (backend.get_volume().await? - delta).max(0.0);
        backend.set_volume(volume).await?;
        Ok(volume)
    }

    pub async fn get_volume(&self, identifier: &str) -> CastResult<f64> {
        self.backend(identifier)?.get_volume().await
    }

    pub async fn now_playing(&self, identifier: &str) -> CastResult<NowPlaying> {
        self.backend(identifier)?.now_playing().await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Remote control
    // ─────────────────────────────────────────────────────────────────────

    /// Sends a remote-control key press (AirPlay only).
    ///
    /// # Errors
    ///
    /// - [`CastError::NotConnected`] for an unknown identifier
    /// - [`CastError::UnsupportedOperation`] for devices without remote keys
    /// - [`CastError::Validation`] for an unrecognised key name
    pub async fn send_key(&self, identifier: &str, key: &str) -> CastResult<()> {
        let backend = self.backend(identifier)?;
        let device_type = backend.device_type();
        if !device_type.supports_remote_keys() {
            return Err(CastError::UnsupportedOperation {
                operation: "send_key",
                device_type,
            });
        }
        let key: RemoteKey = key.parse()?;
        backend.send_key(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        airplay_target, cast_target, MockAirPlayProvider, MockCastProvider, MockConverter,
    };
    use tempfile::TempDir;

    struct Harness {
        agent: CastAgent,
        airplay: Arc<MockAirPlayProvider>,
        cast: Arc<MockCastProvider>,
        converter: Arc<MockConverter>,
        dir: TempDir,
    }

    fn harness_with(converter: MockConverter) -> Harness {
        let dir = TempDir::new().unwrap();
        let airplay = Arc::new(MockAirPlayProvider::with_targets(vec![airplay_target(
            "Living Room",
            "192.168.1.10",
            "ap-1",
        )]));
        let cast = Arc::new(MockCastProvider::with_targets(vec![cast_target(
            "Bedroom",
            "192.168.1.20",
            "cc-1",
        )]));
        let converter = Arc::new(converter);

        let config = AgentConfig {
            storage_path: dir.path().join("state").join("credentials.json"),
            cast_file_server_port: 0,
            ..AgentConfig::default()
        };
        let agent = CastAgent::builder(airplay.clone(), cast.clone())
            .config(config)
            .converter(converter.clone())
            .ip_detector(Arc::new(FixedIpDetector("127.0.0.1".into())))
            .build()
            .unwrap();

        Harness {
            agent,
            airplay,
            cast,
            converter,
            dir,
        }
    }

    fn harness() -> Harness {
        harness_with(MockConverter::default())
    }

    async fn connect_both(h: &Harness) {
        h.agent.scan(Some(1)).await;
        h.agent
            .connect("ap-1", "192.168.1.10", "Living Room", ConnectOptions::default())
            .await
            .unwrap();
        h.agent
            .connect("cc-1", "192.168.1.20", "Bedroom", ConnectOptions::default())
            .await
            .unwrap();
    }

    fn media_file(h: &Harness, name: &str) -> std::path::PathBuf {
        let path = h.dir.path().join(name);
        std::fs::write(&path, b"media").unwrap();
        path
    }

    #[tokio::test]
    async fn scan_merges_protocols_and_feeds_resolution() {
        let h = harness();
        let devices = h.agent.scan(Some(1)).await;

        assert_eq!(devices.len(), 2);
        assert_eq!(h.agent.last_scan(), devices);
        assert_eq!(h.agent.resolve_device_type("cc-1"), DeviceType::GoogleCast);
        assert_eq!(h.agent.resolve_device_type("ap-1"), DeviceType::AirPlay);
        assert_eq!(h.agent.resolve_device_type("never-seen"), DeviceType::AirPlay);
    }

    #[tokio::test]
    async fn connect_uses_cached_type() {
        let h = harness();
        connect_both(&h).await;

        assert_eq!(
            h.agent.connected_devices(),
            vec![
                ("ap-1".to_string(), DeviceType::AirPlay),
                ("cc-1".to_string(), DeviceType::GoogleCast),
            ]
        );
        assert_eq!(h.cast.connections.lock().len(), 1);
    }

    #[tokio::test]
    async fn unscanned_cast_device_falls_back_to_airplay() {
        let h = harness();
        let err = h
            .agent
            .connect("cc-1", "192.168.1.20", "Bedroom", ConnectOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CastError::Connection { .. }));
        assert!(h.agent.connected_devices().is_empty());

        let device_type = h
            .agent
            .connect(
                "cc-1",
                "192.168.1.20",
                "Bedroom",
                ConnectOptions {
                    device_type: Some(DeviceType::GoogleCast),
                    ..ConnectOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(device_type, DeviceType::GoogleCast);
    }

    #[tokio::test]
    async fn connect_by_name_scans_then_connects() {
        let h = harness();
        let (identifier, device_type) = h
            .agent
            .connect_by_name("Bedroom", SubProtocol::AirPlay)
            .await
            .unwrap();
        assert_eq!(identifier, "cc-1");
        assert_eq!(device_type, DeviceType::GoogleCast);

        let err = h
            .agent
            .connect_by_name("Garage", SubProtocol::AirPlay)
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::Validation(ref m) if m == "Device 'Garage' not found"));
    }

    #[tokio::test]
    async fn operations_on_unknown_device_are_not_connected() {
        let h = harness();
        assert!(matches!(
            h.agent.play("ghost").await,
            Err(CastError::NotConnected(ref id)) if id == "ghost"
        ));
        assert!(matches!(
            h.agent.get_volume("ghost").await,
            Err(CastError::NotConnected(_))
        ));
        assert!(matches!(
            h.agent.send_key("ghost", "menu").await,
            Err(CastError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn invalid_volume_never_reaches_the_device() {
        let h = harness();
        connect_both(&h).await;

        for v in [-0.1, 1.1, f64::NAN] {
            assert!(matches!(
                h.agent.set_volume("ap-1", v).await,
                Err(CastError::Validation(_))
            ));
        }
        assert!(h.agent.volume_up("ap-1", Some(0.0)).await.is_err());
        assert!(h.airplay.session.calls().is_empty());

        h.agent.set_volume("ap-1", 0.3).await.unwrap();
        assert_eq!(h.agent.get_volume("ap-1").await.unwrap(), 0.3);
    }

    #[tokio::test]
    async fn volume_steps_stay_in_range() {
        let h = harness();
        connect_both(&h).await;

        h.airplay.session.set_volume_level(0.95);
        assert_eq!(h.agent.volume_up("ap-1", None).await.unwrap(), 1.0);
        assert_eq!(h.agent.volume_up("ap-1", Some(1.0)).await.unwrap(), 1.0);

        h.airplay.session.set_volume_level(0.05);
        assert_eq!(h.agent.volume_down("ap-1", None).await.unwrap(), 0.0);

        h.agent.set_volume("cc-1", 0.5).await.unwrap();
        let lowered = h.agent.volume_down("cc-1", Some(0.2)).await.unwrap();
        assert!((lowered - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn send_key_checks_capability_before_key_name() {
        let h = harness();
        connect_both(&h).await;

        assert!(matches!(
            h.agent.send_key("cc-1", "not-a-key").await,
            Err(CastError::UnsupportedOperation {
                operation: "send_key",
                device_type: DeviceType::GoogleCast
            })
        ));

        let err = h.agent.send_key("ap-1", "launch").await.unwrap_err();
        assert!(matches!(err, CastError::Validation(_)));
        assert!(err.to_string().contains("play_pause"));

        h.agent.send_key("ap-1", "play_pause").await.unwrap();
        assert_eq!(h.airplay.session.calls(), vec!["keypress play_pause"]);
    }

    #[tokio::test]
    async fn pairing_round_trip_stores_credentials() {
        let h = harness();
        h.agent.scan(Some(1)).await;

        let status = h
            .agent
            .pair("ap-1", "192.168.1.10", "Living Room", SubProtocol::AirPlay)
            .await
            .unwrap();
        assert_eq!(status, PairingStatus::PinRequired);
        assert_eq!(
            h.agent.pairing_state("ap-1", SubProtocol::AirPlay),
            PairingState::AwaitingPin
        );

        assert!(h
            .agent
            .pair_with_pin("ap-1", "1234", SubProtocol::AirPlay)
            .await
            .unwrap());
        assert_eq!(
            h.agent
                .credentials()
                .get("ap-1", SubProtocol::AirPlay)
                .as_deref(),
            Some("paired-credential")
        );

        h.agent.remove_credentials("ap-1", None).unwrap();
        assert_eq!(h.agent.credentials().get("ap-1", SubProtocol::AirPlay), None);
    }

    #[tokio::test]
    async fn pair_with_pin_reports_unwritable_credentials() {
        let dir = TempDir::new().unwrap();
        let storage_path = dir.path().join("credentials.json");
        std::fs::create_dir(&storage_path).unwrap();
        let airplay = Arc::new(MockAirPlayProvider::with_targets(vec![]));
        let cast = Arc::new(MockCastProvider::with_targets(vec![]));
        let agent = CastAgent::builder(airplay, cast)
            .config(AgentConfig {
                storage_path,
                cast_file_server_port: 0,
                ..AgentConfig::default()
            })
            .converter(Arc::new(MockConverter::default()))
            .ip_detector(Arc::new(FixedIpDetector("127.0.0.1".into())))
            .build()
            .unwrap();

        agent
            .pair("ap-1", "192.168.1.10", "Living Room", SubProtocol::AirPlay)
            .await
            .unwrap();
        let err = agent
            .pair_with_pin("ap-1", "1234", SubProtocol::AirPlay)
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::Persistence(_)));
    }

    #[tokio::test]
    async fn pairing_rules() {
        let h = harness();
        h.agent.scan(Some(1)).await;

        let err = h
            .agent
            .pair("cc-1", "192.168.1.20", "Bedroom", SubProtocol::AirPlay)
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::UnsupportedOperation { operation: "pair", .. }));

        let err = h
            .agent
            .pair_with_pin("ap-1", "1234", SubProtocol::Companion)
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::NoActiveSession { .. }));
    }

    #[tokio::test]
    async fn stream_file_validates_before_dispatch() {
        let h = harness();
        connect_both(&h).await;

        let text = media_file(&h, "notes.txt");
        assert!(matches!(
            h.agent.stream_file("ap-1", &text).await,
            Err(CastError::Validation(_))
        ));
        assert!(h.airplay.session.calls().is_empty());

        let song = media_file(&h, "song.mp3");
        h.agent.stream_file("ap-1", &song).await.unwrap();
        let canonical = std::fs::canonicalize(&song).unwrap();
        assert_eq!(
            h.airplay.session.calls(),
            vec![format!("stream_file {}", canonical.display())]
        );
    }

    #[tokio::test]
    async fn play_url_rejects_non_http_schemes() {
        let h = harness();
        connect_both(&h).await;

        assert!(matches!(
            h.agent
                .play_url("cc-1", "file:///etc/passwd", PlayOptions::default())
                .await,
            Err(CastError::Validation(_))
        ));
        h.agent
            .play_url("cc-1", "https://example.com/a.mp4", PlayOptions::default())
            .await
            .unwrap();
        assert_eq!(
            h.cast.session.calls(),
            vec!["play_media https://example.com/a.mp4 video/mp4"]
        );
    }

    #[tokio::test]
    async fn seek_rejects_negative_positions() {
        let h = harness();
        connect_both(&h).await;

        assert!(h.agent.seek("cc-1", -5.0).await.is_err());
        h.agent.seek("cc-1", 30.0).await.unwrap();
        assert_eq!(h.cast.session.calls(), vec!["seek 30"]);
    }

    #[tokio::test]
    async fn announce_wakes_airplay_and_cleans_up() {
        let h = harness();
        connect_both(&h).await;

        h.agent
            .announce("ap-1", "Dinner is ready", None)
            .await
            .unwrap();

        let calls = h.airplay.session.calls();
        assert_eq!(calls[0], "keypress menu");
        assert!(calls[1].starts_with("stream_file ") && calls[1].ends_with(".wav"));
        assert_eq!(
            h.converter.speeches.lock().clone(),
            vec![(
                "Dinner is ready".to_string(),
                "en_US-lessac-medium".to_string()
            )]
        );
        assert!(h.converter.outputs.lock().iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn announce_proceeds_when_wake_key_fails() {
        let h = harness();
        connect_both(&h).await;
        h.airplay.session.fail("keypress");

        h.agent.announce("ap-1", "Hello", Some("de_DE-thorsten-high")).await.unwrap();
        assert_eq!(h.airplay.session.calls().len(), 1);
    }

    #[tokio::test]
    async fn announce_validates_text_and_voice() {
        let h = harness();
        connect_both(&h).await;

        assert!(h.agent.announce("ap-1", "  ", None).await.is_err());
        assert!(h
            .agent
            .announce("ap-1", "Hi", Some("../voices/evil"))
            .await
            .is_err());
        assert!(h.converter.speeches.lock().is_empty());
    }

    #[tokio::test]
    async fn display_image_renders_and_streams_over_bridge() {
        let h = harness();
        connect_both(&h).await;
        let cover = media_file(&h, "cover.jpg");

        h.agent
            .display_image("cc-1", &cover, Some(1e9))
            .await
            .unwrap();

        let images = h.converter.images.lock().clone();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].1, 86_400);
        let calls = h.cast.session.calls();
        assert!(calls[0].starts_with("play_media http://127.0.0.1:"));
        assert!(calls[0].ends_with(".mp4 video/mp4"));
        assert!(h.converter.outputs.lock().iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn conversion_failure_is_reported() {
        let h = harness_with(MockConverter {
            fail: true,
            ..MockConverter::default()
        });
        connect_both(&h).await;
        let cover = media_file(&h, "cover.png");

        let err = h
            .agent
            .display_image("ap-1", &cover, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CastError::Conversion(_)));
        assert!(h.airplay.session.calls().is_empty());
    }

    #[tokio::test]
    async fn power_semantics_differ_by_protocol() {
        let h = harness();
        connect_both(&h).await;

        h.agent.power_off("ap-1").await.unwrap();
        assert!(!h.agent.get_power_state("ap-1").await.unwrap());
        h.agent.power_on("ap-1").await.unwrap();
        assert!(h.agent.get_power_state("ap-1").await.unwrap());

        h.agent.power_on("cc-1").await.unwrap();
        h.agent.power_off("cc-1").await.unwrap();
        assert_eq!(h.cast.session.calls(), vec!["quit_app"]);
    }

    #[tokio::test]
    async fn now_playing_has_the_same_shape_for_both() {
        let h = harness();
        connect_both(&h).await;

        let airplay = h.agent.now_playing("ap-1").await.unwrap();
        let cast = h.agent.now_playing("cc-1").await.unwrap();
        assert_eq!(airplay, NowPlaying::default());
        assert_eq!(cast, NowPlaying::default());
    }

    #[tokio::test]
    async fn disconnect_forgets_devices() {
        let h = harness();
        connect_both(&h).await;

        h.agent.disconnect("never-connected").await.unwrap();
        h.agent.disconnect("ap-1").await.unwrap();
        assert_eq!(h.airplay.session.close_count(), 1);
        assert!(matches!(
            h.agent.play("ap-1").await,
            Err(CastError::NotConnected(_))
        ));

        h.agent.shutdown().await;
        assert!(h.agent.connected_devices().is_empty());
        assert!(h.cast.session.calls().contains(&"disconnect".to_string()));
    }

    #[tokio::test]
    async fn reconnect_replaces_the_previous_session() {
        let h = harness();
        connect_both(&h).await;

        h.agent
            .connect("ap-1", "192.168.1.10", "Living Room", ConnectOptions::default())
            .await
            .unwrap();

        assert_eq!(h.airplay.session.close_count(), 1);
        assert_eq!(h.agent.connected_devices().len(), 2);
    }
}
