//! Pairing handshake bookkeeping for AirPlay sub-protocols.
//!
//! A handshake is opened by [`PairingSessionManager::initiate`] and held until
//! [`PairingSessionManager::complete`] consumes it. Completion always closes
//! the handshake and drops the entry, whatever the outcome, so repeated
//! failed attempts never pile up provider resources.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::credentials::CredentialStore;
use crate::device::SubProtocol;
use crate::error::{CastError, CastResult};
use crate::provider::{AirPlayProvider, PairingHandshake, PairingTarget};

type SessionKey = (String, SubProtocol);

/// What the caller should do after a handshake has been opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    /// The device does not show a PIN; the user picks one and enters it on
    /// the device, then submits the same PIN here.
    PinRequired,
    /// The device is displaying a PIN; submit it with `pair_with_pin`.
    Ready,
}

impl PairingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PinRequired => "pin_required",
            Self::Ready => "ready",
        }
    }

    /// Human-readable next step.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::PinRequired => "Enter PIN on the device itself",
            Self::Ready => "PIN required - use pair_with_pin method",
        }
    }
}

/// Lifecycle of one `(identifier, sub_protocol)` pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    NoSession,
    AwaitingPin,
    /// The last handshake for this key has been closed.
    Closed { paired: bool },
}

/// Holds open handshakes keyed by `(identifier, sub_protocol)`.
pub struct PairingSessionManager {
    provider: Arc<dyn AirPlayProvider>,
    sessions: Mutex<HashMap<SessionKey, Box<dyn PairingHandshake>>>,
    outcomes: Mutex<HashMap<SessionKey, bool>>,
}

impl PairingSessionManager {
    pub fn new(provider: Arc<dyn AirPlayProvider>) -> Self {
        Self {
            provider,
            sessions: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a handshake and parks it until the PIN arrives.
    ///
    /// An open handshake for the same key is closed first.
    ///
    /// # Errors
    ///
    /// - [`CastError::Validation`] for a sub-protocol that cannot pair (RAOP)
    ///   or an address that is not IPv4
    /// - [`CastError::Connection`] if the device refuses to start pairing
    pub async fn initiate(
        &self,
        identifier: &str,
        address: &str,
        name: &str,
        sub_protocol: SubProtocol,
    ) -> CastResult<PairingStatus> {
        let port = sub_protocol.pairing_port().ok_or_else(|| {
            CastError::Validation(format!(
                "Unsupported protocol for pairing: {}. Allowed: AirPlay, Companion",
                sub_protocol
            ))
        })?;
        let ip: Ipv4Addr = address.parse().map_err(|_| {
            CastError::Validation(format!(
                "Pairing requires an IPv4 address, got '{}'",
                address
            ))
        })?;

        let key = (identifier.to_string(), sub_protocol);
        let stale = self.sessions.lock().remove(&key);
        if let Some(stale) = stale {
            log::info!(
                "[Pairing] Replacing open {} handshake for {}",
                sub_protocol,
                identifier
            );
            close_handshake(stale, identifier).await;
        }

        let target = PairingTarget {
            identifier: identifier.to_string(),
            address: ip,
            name: name.to_string(),
            sub_protocol,
            port,
        };
        let connection_error = |message: String| CastError::Connection {
            identifier: identifier.to_string(),
            message,
        };

        let mut handshake = self
            .provider
            .pair(&target)
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        if let Err(e) = handshake.begin().await {
            close_handshake(handshake, identifier).await;
            return Err(connection_error(e.to_string()));
        }

        let status = if handshake.device_provides_pin() {
            PairingStatus::Ready
        } else {
            PairingStatus::PinRequired
        };

        self.outcomes.lock().remove(&key);
        self.sessions.lock().insert(key, handshake);
        log::info!(
            "[Pairing] {} handshake open for {} ({}:{}), status {}",
            sub_protocol,
            identifier,
            ip,
            port,
            status.as_str()
        );
        Ok(status)
    }

    /// Submits `pin` to the open handshake and stores the negotiated
    /// credential on success.
    ///
    /// Returns `false` if the device rejected the PIN. The handshake is
    /// closed and forgotten on every path.
    ///
    /// # Errors
    ///
    /// - [`CastError::NoActiveSession`] if no handshake is open for the key
    /// - [`CastError::Device`] if the exchange itself failed
    /// - [`CastError::Persistence`] if the credential could not be saved
    pub async fn complete(
        &self,
        identifier: &str,
        sub_protocol: SubProtocol,
        pin: &str,
        store: &CredentialStore,
    ) -> CastResult<bool> {
        let key = (identifier.to_string(), sub_protocol);
        let mut handshake =
            self.sessions
                .lock()
                .remove(&key)
                .ok_or_else(|| CastError::NoActiveSession {
                    identifier: identifier.to_string(),
                    sub_protocol,
                })?;

        handshake.pin(pin);
        let finished = handshake.finish().await;
        let paired = finished.is_ok() && handshake.has_paired();
        let credentials = if paired { handshake.credentials() } else { None };
        close_handshake(handshake, identifier).await;
        self.outcomes.lock().insert(key, paired);

        finished.map_err(|e| CastError::device(identifier, "pair_with_pin", e))?;
        if !paired {
            log::warn!("[Pairing] {} rejected the PIN for {}", identifier, sub_protocol);
            return Ok(false);
        }

        match credentials {
            Some(credentials) => store.set(identifier, sub_protocol, credentials)?,
            None => log::warn!(
                "[Pairing] {} paired over {} but returned no credentials",
                identifier,
                sub_protocol
            ),
        }
        log::info!("[Pairing] Paired with {} over {}", identifier, sub_protocol);
        Ok(true)
    }

    /// Current state for a key.
    pub fn state(&self, identifier: &str, sub_protocol: SubProtocol) -> PairingState {
        let key = (identifier.to_string(), sub_protocol);
        if self.sessions.lock().contains_key(&key) {
            return PairingState::AwaitingPin;
        }
        match self.outcomes.lock().get(&key) {
            Some(&paired) => PairingState::Closed { paired },
            None => PairingState::NoSession,
        }
    }

    /// Closes every open handshake.
    pub async fn close_all(&self) {
        let open: Vec<_> = self.sessions.lock().drain().collect();
        for ((identifier, _), handshake) in open {
            close_handshake(handshake, &identifier).await;
        }
    }
}

async fn close_handshake(mut handshake: Box<dyn PairingHandshake>, identifier: &str) {
    if let Err(e) = handshake.close().await {
        log::warn!("[Pairing] Failed to close handshake for {}: {}", identifier, e);
    }
}
