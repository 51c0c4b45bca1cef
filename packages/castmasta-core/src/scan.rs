//! Multi-protocol discovery.
//!
//! Runs every registered [`DiscoveryProcedure`] concurrently under one shared
//! timeout and concatenates what they find. A procedure that fails or runs
//! over contributes nothing; it never fails the scan.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::backend::DiscoveryProcedure;
use crate::device::DeviceInfo;

/// Lower bound for a scan timeout, in seconds.
pub const MIN_SCAN_TIMEOUT_SECS: u64 = 1;

/// Upper bound for a scan timeout, in seconds.
pub const MAX_SCAN_TIMEOUT_SECS: u64 = 30;

/// Extra time a procedure gets past the browse window to report back.
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Clamps a requested scan timeout into the supported range.
#[must_use]
pub fn clamp_scan_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_SCAN_TIMEOUT_SECS, MAX_SCAN_TIMEOUT_SECS))
}

/// Fans discovery out across protocols.
pub struct ScanAggregator {
    procedures: Vec<Arc<dyn DiscoveryProcedure>>,
}

impl ScanAggregator {
    /// Creates an aggregator. Result order follows `procedures` order.
    pub fn new(procedures: Vec<Arc<dyn DiscoveryProcedure>>) -> Self {
        Self { procedures }
    }

    /// Discovers devices on every protocol for up to `timeout_secs`
    /// (clamped to 1..=30).
    pub async fn scan(&self, timeout_secs: u64) -> Vec<DeviceInfo> {
        let timeout = clamp_scan_timeout(timeout_secs);

        let futures: Vec<_> = self
            .procedures
            .iter()
            .map(|procedure| {
                let procedure = Arc::clone(procedure);
                async move {
                    let device_type = procedure.device_type();
                    match tokio::time::timeout(timeout + SCAN_GRACE, procedure.discover(timeout))
                        .await
                    {
                        Ok(Ok(devices)) => {
                            log::debug!("[Scan] {} found {} device(s)", device_type, devices.len());
                            devices
                        }
                        Ok(Err(e)) => {
                            log::warn!("[Scan] {} discovery failed: {}", device_type, e);
                            Vec::new()
                        }
                        Err(_) => {
                            log::warn!(
                                "[Scan] {} discovery did not finish within {:?}",
                                device_type,
                                timeout + SCAN_GRACE
                            );
                            Vec::new()
                        }
                    }
                }
            })
            .collect();

        let devices: Vec<DeviceInfo> = join_all(futures).await.into_iter().flatten().collect();
        log::info!("[Scan] Found {} device(s)", devices.len());
        devices
    }
}
