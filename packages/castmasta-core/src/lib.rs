//! CastMasta Core - one control surface for AirPlay and Google Cast devices.
//!
//! This crate lets a single caller discover, pair with and control networked
//! media renderers without knowing which protocol each one speaks. It is the
//! orchestration layer only: the protocol client libraries are plugged in
//! through the traits in [`provider`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`agent`]: The [`CastAgent`] facade and its builder
//! - [`backend`]: Per-device backends for each protocol
//! - [`scan`]: Concurrent multi-protocol discovery
//! - [`pairing`]: Pairing handshake state
//! - [`credentials`]: Persistent pairing credentials
//! - [`bridge`]: Local HTTP server that exposes one file to Cast devices
//! - [`context`]: LAN address detection and bridge URL building
//! - [`validation`]: Input rules applied before any device is touched
//! - [`convert`]: ffmpeg/piper conversion for images and announcements
//! - [`config`]: YAML configuration with environment overrides
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`AirPlayProvider`](provider::AirPlayProvider): Async AirPlay client library
//! - [`CastProvider`](provider::CastProvider): Blocking Cast client library
//! - [`MediaConverter`](convert::MediaConverter): External media conversion
//! - [`IpDetector`](context::IpDetector): Local IP detection
//!
//! # Concurrency
//!
//! The Cast provider is blocking. Every call into it runs on tokio's blocking
//! pool so one slow device cannot stall the scheduler or other devices.
//! Callers must not issue concurrent operations against the same device.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod context;
pub mod convert;
pub mod credentials;
pub mod device;
pub mod error;
pub mod pairing;
pub mod provider;
pub mod scan;
pub mod validation;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use agent::{CastAgent, CastAgentBuilder};
pub use backend::{DeviceBackend, DiscoveryProcedure};
pub use bridge::MediaBridge;
pub use config::AgentConfig;
pub use context::{FixedIpDetector, IpDetector, LocalIpDetector, NetworkError, UrlBuilder};
pub use convert::{MediaConverter, ProcessConverter};
pub use credentials::CredentialStore;
pub use device::{
    ConnectOptions, DeviceInfo, DeviceType, NowPlaying, PlayOptions, RemoteKey, SubProtocol,
};
pub use error::{CastError, CastResult, ErrorCode, ProviderError, ProviderResult};
pub use pairing::{PairingState, PairingStatus};
pub use scan::ScanAggregator;
