//! In-memory fakes for the provider, discovery and converter seams.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempPath;

use crate::backend::DiscoveryProcedure;
use crate::convert::MediaConverter;
use crate::device::{DeviceInfo, DeviceType, NowPlaying, PlayOptions, RemoteKey, SubProtocol};
use crate::error::{CastError, CastResult, ProviderError, ProviderResult};
use crate::provider::{
    AirPlayProvider, AirPlaySession, AirPlayTarget, CastMediaStatus, CastProvider, CastSession,
    CastStatus, CastTarget, PairingHandshake, PairingTarget,
};

pub(crate) fn airplay_target(name: &str, address: &str, identifier: &str) -> AirPlayTarget {
    AirPlayTarget {
        name: name.into(),
        address: address.into(),
        identifier: identifier.into(),
        services: vec!["AirPlay".into()],
    }
}

pub(crate) fn device_info(name: &str, identifier: &str, device_type: DeviceType) -> DeviceInfo {
    DeviceInfo {
        name: name.into(),
        address: "192.168.1.50".into(),
        identifier: identifier.into(),
        device_type,
        protocols: vec![device_type.to_string()],
    }
}

/// Records calls and fails the ones it was told to.
#[derive(Default)]
pub(crate) struct CallRecorder {
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
}

impl CallRecorder {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn check(&self, operation: &str) -> ProviderResult<()> {
        if self.failing.lock().iter().any(|op| op == operation) {
            Err(ProviderError::new(format!("{} refused", operation)))
        } else {
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AirPlay
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct MockAirPlaySession {
    recorder: CallRecorder,
    volume: Mutex<f64>,
    pub playing: Mutex<NowPlaying>,
    powered: AtomicBool,
    closes: AtomicUsize,
}

impl Default for MockAirPlaySession {
    fn default() -> Self {
        Self {
            recorder: CallRecorder::default(),
            volume: Mutex::new(0.5),
            playing: Mutex::new(NowPlaying::default()),
            powered: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
        }
    }
}

impl MockAirPlaySession {
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls.lock().clone()
    }

    pub fn fail(&self, operation: &str) {
        self.recorder.failing.lock().push(operation.to_string());
    }

    pub fn set_volume_level(&self, volume: f64) {
        *self.volume.lock() = volume;
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn call(&self, operation: &str, detail: Option<String>) -> ProviderResult<()> {
        self.recorder.check(operation)?;
        match detail {
            Some(detail) => self.recorder.record(format!("{} {}", operation, detail)),
            None => self.recorder.record(operation),
        }
        Ok(())
    }
}

#[async_trait]
impl AirPlaySession for MockAirPlaySession {
    async fn stream_file(&self, path: &Path) -> ProviderResult<()> {
        self.call("stream_file", Some(path.display().to_string()))
    }

    async fn play_url(&self, url: &str, _options: &PlayOptions) -> ProviderResult<()> {
        self.call("play_url", Some(url.to_string()))
    }

    async fn play(&self) -> ProviderResult<()> {
        self.call("play", None)
    }

    async fn pause(&self) -> ProviderResult<()> {
        self.call("pause", None)
    }

    async fn stop(&self) -> ProviderResult<()> {
        self.call("stop", None)
    }

    async fn set_position(&self, position: f64) -> ProviderResult<()> {
        self.call("set_position", Some(position.to_string()))
    }

    async fn set_volume(&self, volume: f64) -> ProviderResult<()> {
        self.call("set_volume", Some(volume.to_string()))?;
        *self.volume.lock() = volume;
        Ok(())
    }

    async fn volume(&self) -> ProviderResult<f64> {
        self.recorder.check("volume")?;
        Ok(*self.volume.lock())
    }

    async fn playing(&self) -> ProviderResult<NowPlaying> {
        self.recorder.check("playing")?;
        Ok(self.playing.lock().clone())
    }

    async fn turn_on(&self) -> ProviderResult<()> {
        self.call("turn_on", None)?;
        self.powered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn turn_off(&self) -> ProviderResult<()> {
        self.call("turn_off", None)?;
        self.powered.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn power_state(&self) -> ProviderResult<bool> {
        self.recorder.check("power_state")?;
        Ok(self.powered.load(Ordering::SeqCst))
    }

    async fn keypress(&self, key: RemoteKey) -> ProviderResult<()> {
        self.call("keypress", Some(key.as_str().to_string()))
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pairing behaviour shared by every handshake the mock provider hands out.
pub(crate) struct HandshakeScript {
    pub device_provides_pin: bool,
    pub accepted_pin: String,
    pub credentials: String,
    pub fail_begin: bool,
    pub fail_close: bool,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub pins: Mutex<Vec<String>>,
}

impl Default for HandshakeScript {
    fn default() -> Self {
        Self {
            device_provides_pin: false,
            accepted_pin: "1234".into(),
            credentials: "paired-credential".into(),
            fail_begin: false,
            fail_close: false,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            pins: Mutex::new(Vec::new()),
        }
    }
}

pub(crate) struct MockHandshake {
    script: Arc<HandshakeScript>,
    pin: Option<String>,
    paired: bool,
}

impl MockHandshake {
    pub fn new(script: Arc<HandshakeScript>) -> Self {
        script.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            script,
            pin: None,
            paired: false,
        }
    }
}

#[async_trait]
impl PairingHandshake for MockHandshake {
    async fn begin(&mut self) -> ProviderResult<()> {
        if self.script.fail_begin {
            return Err(ProviderError::new("device refused pairing"));
        }
        Ok(())
    }

    fn device_provides_pin(&self) -> bool {
        self.script.device_provides_pin
    }

    fn pin(&mut self, pin: &str) {
        self.script.pins.lock().push(pin.to_string());
        self.pin = Some(pin.to_string());
    }

    async fn finish(&mut self) -> ProviderResult<()> {
        match &self.pin {
            Some(pin) if *pin == self.script.accepted_pin => {
                self.paired = true;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(ProviderError::new("no pin submitted")),
        }
    }

    fn has_paired(&self) -> bool {
        self.paired
    }

    fn credentials(&self) -> Option<String> {
        self.paired.then(|| self.script.credentials.clone())
    }

    async fn close(&mut self) -> ProviderResult<()> {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_close {
            return Err(ProviderError::new("close failed"));
        }
        Ok(())
    }
}

pub(crate) struct MockAirPlayProvider {
    pub targets: Vec<AirPlayTarget>,
    pub scan_error: Option<String>,
    pub scan_delay: Option<Duration>,
    pub connect_error: Option<String>,
    pub session: Arc<MockAirPlaySession>,
    pub handshake: Arc<HandshakeScript>,
    pub scanned_hosts: Mutex<Vec<Vec<String>>>,
    pub connected_to: Mutex<Option<String>>,
    pub received_credentials: Mutex<Vec<(SubProtocol, String)>>,
    pub pairing_targets: Mutex<Vec<PairingTarget>>,
}

impl MockAirPlayProvider {
    pub fn with_targets(targets: Vec<AirPlayTarget>) -> Self {
        Self {
            targets,
            scan_error: None,
            scan_delay: None,
            connect_error: None,
            session: Arc::new(MockAirPlaySession::default()),
            handshake: Arc::new(HandshakeScript::default()),
            scanned_hosts: Mutex::new(Vec::new()),
            connected_to: Mutex::new(None),
            received_credentials: Mutex::new(Vec::new()),
            pairing_targets: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AirPlayProvider for MockAirPlayProvider {
    async fn scan(&self, _timeout: Duration, hosts: &[String]) -> ProviderResult<Vec<AirPlayTarget>> {
        self.scanned_hosts.lock().push(hosts.to_vec());
        if let Some(delay) = self.scan_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.scan_error {
            return Err(ProviderError::new(message.clone()));
        }
        Ok(self
            .targets
            .iter()
            .filter(|t| hosts.is_empty() || hosts.contains(&t.address))
            .cloned()
            .collect())
    }

    async fn connect(
        &self,
        target: &AirPlayTarget,
        credentials: &[(SubProtocol, String)],
    ) -> ProviderResult<Arc<dyn AirPlaySession>> {
        if let Some(message) = &self.connect_error {
            return Err(ProviderError::new(message.clone()));
        }
        *self.connected_to.lock() = Some(target.name.clone());
        *self.received_credentials.lock() = credentials.to_vec();
        Ok(self.session.clone())
    }

    async fn pair(&self, target: &PairingTarget) -> ProviderResult<Box<dyn PairingHandshake>> {
        self.pairing_targets.lock().push(target.clone());
        Ok(Box::new(MockHandshake::new(Arc::clone(&self.handshake))))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Google Cast
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct MockCastSession {
    recorder: CallRecorder,
    volume: Mutex<Option<f64>>,
    reports_status: AtomicBool,
    /// Whether loading media makes the receiver report an active session.
    pub activates: AtomicBool,
    active: AtomicBool,
    pub media: Mutex<CastMediaStatus>,
    pub app_running: AtomicBool,
}

impl Default for MockCastSession {
    fn default() -> Self {
        Self {
            recorder: CallRecorder::default(),
            volume: Mutex::new(Some(0.4)),
            reports_status: AtomicBool::new(true),
            activates: AtomicBool::new(true),
            active: AtomicBool::new(false),
            media: Mutex::new(CastMediaStatus::default()),
            app_running: AtomicBool::new(true),
        }
    }
}

impl MockCastSession {
    pub fn calls(&self) -> Vec<String> {
        self.recorder.calls.lock().clone()
    }

    pub fn fail(&self, operation: &str) {
        self.recorder.failing.lock().push(operation.to_string());
    }

    pub fn set_reports_status(&self, reports: bool) {
        self.reports_status.store(reports, Ordering::SeqCst);
    }

    fn call(&self, operation: &str, detail: Option<String>) -> ProviderResult<()> {
        self.recorder.check(operation)?;
        match detail {
            Some(detail) => self.recorder.record(format!("{} {}", operation, detail)),
            None => self.recorder.record(operation),
        }
        Ok(())
    }
}

impl CastSession for MockCastSession {
    fn play_media(&self, url: &str, content_type: &str) -> ProviderResult<()> {
        self.call("play_media", Some(format!("{} {}", url, content_type)))?;
        if self.activates.load(Ordering::SeqCst) {
            self.active.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn play(&self) -> ProviderResult<()> {
        self.call("play", None)
    }

    fn pause(&self) -> ProviderResult<()> {
        self.call("pause", None)
    }

    fn stop(&self) -> ProviderResult<()> {
        self.call("stop", None)?;
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn seek(&self, position: f64) -> ProviderResult<()> {
        self.call("seek", Some(position.to_string()))
    }

    fn set_volume(&self, volume: f64) -> ProviderResult<()> {
        self.call("set_volume", Some(volume.to_string()))?;
        *self.volume.lock() = Some(volume);
        Ok(())
    }

    fn status(&self) -> Option<CastStatus> {
        self.reports_status
            .load(Ordering::SeqCst)
            .then(|| CastStatus {
                volume_level: *self.volume.lock(),
                app_running: self.app_running.load(Ordering::SeqCst),
            })
    }

    fn media_status(&self) -> ProviderResult<CastMediaStatus> {
        self.recorder.check("media_status")?;
        let mut media = self.media.lock().clone();
        media.active = self.active.load(Ordering::SeqCst);
        Ok(media)
    }

    fn quit_app(&self) -> ProviderResult<()> {
        self.call("quit_app", None)?;
        self.app_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> ProviderResult<()> {
        self.call("disconnect", None)
    }
}

pub(crate) struct MockCastProvider {
    pub targets: Vec<CastTarget>,
    pub discover_error: Option<String>,
    pub connect_error: Option<String>,
    pub session: Arc<MockCastSession>,
    pub connections: Mutex<Vec<(String, String, String)>>,
}

impl MockCastProvider {
    pub fn with_targets(targets: Vec<CastTarget>) -> Self {
        Self {
            targets,
            discover_error: None,
            connect_error: None,
            session: Arc::new(MockCastSession::default()),
            connections: Mutex::new(Vec::new()),
        }
    }
}

impl CastProvider for MockCastProvider {
    fn discover(&self, _timeout: Duration) -> ProviderResult<Vec<CastTarget>> {
        if let Some(message) = &self.discover_error {
            return Err(ProviderError::new(message.clone()));
        }
        Ok(self.targets.clone())
    }

    fn connect(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
    ) -> ProviderResult<Arc<dyn CastSession>> {
        if let Some(message) = &self.connect_error {
            return Err(ProviderError::new(message.clone()));
        }
        self.connections
            .lock()
            .push((identifier.into(), address.into(), name.into()));
        Ok(self.session.clone())
    }
}

pub(crate) fn cast_target(name: &str, host: &str, uuid: &str) -> CastTarget {
    CastTarget {
        friendly_name: name.into(),
        host: host.into(),
        uuid: uuid.into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery and conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Discovery procedure returning a fixed list, optionally late or failing.
pub(crate) struct StaticDiscovery {
    pub device_type: DeviceType,
    pub devices: Vec<DeviceInfo>,
    pub delay: Option<Duration>,
    pub error: Option<String>,
}

impl StaticDiscovery {
    pub fn new(device_type: DeviceType, devices: Vec<DeviceInfo>) -> Self {
        Self {
            device_type,
            devices,
            delay: None,
            error: None,
        }
    }
}

#[async_trait]
impl DiscoveryProcedure for StaticDiscovery {
    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    async fn discover(&self, _timeout: Duration) -> ProviderResult<Vec<DeviceInfo>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(message) => Err(ProviderError::new(message.clone())),
            None => Ok(self.devices.clone()),
        }
    }
}

/// Converter that writes placeholder output and records its arguments.
#[derive(Default)]
pub(crate) struct MockConverter {
    pub fail: bool,
    pub images: Mutex<Vec<(String, u32)>>,
    pub speeches: Mutex<Vec<(String, String)>>,
    pub outputs: Mutex<Vec<std::path::PathBuf>>,
}

impl MockConverter {
    fn output(&self, suffix: &str) -> CastResult<TempPath> {
        if self.fail {
            return Err(CastError::Conversion("converter exited with status 1".into()));
        }
        let file = tempfile::Builder::new()
            .prefix("castmasta-test-")
            .suffix(suffix)
            .tempfile()
            .map_err(|e| CastError::Conversion(e.to_string()))?;
        let path = file.into_temp_path();
        self.outputs.lock().push(path.to_path_buf());
        Ok(path)
    }
}

#[async_trait]
impl MediaConverter for MockConverter {
    async fn image_to_video(&self, image: &Path, duration_secs: u32) -> CastResult<TempPath> {
        self.images
            .lock()
            .push((image.display().to_string(), duration_secs));
        self.output(".mp4")
    }

    async fn text_to_speech(&self, text: &str, voice: &str) -> CastResult<TempPath> {
        self.speeches.lock().push((text.to_string(), voice.to_string()));
        self.output(".wav")
    }
}
