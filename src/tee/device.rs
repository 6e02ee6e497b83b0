//! TEE device: unified interface over the hardware attestation primitives
//!
//! Backends:
//! - Intel TDX guest (Linux `tdx_guest` driver, sysfs measurements, configfs-tsm)
//! - Software-simulated TD (always available, for dev/test)
//!
//! Construction is two-phase: [`open_device`] either returns a ready device or a
//! `BackendUnavailable` error. There is no half-initialized device.

use super::report::{AttestationReport, Measurement, REPORT_DATA_LEN};
use super::simulated::SimulatedTdx;
use super::tdx::TdxGuest;
use crate::config::ToolConfig;
use crate::error::{Result, TeeError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Supported TEE backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeeBackend {
    /// Use Intel TDX when present, otherwise fall back to simulation
    Auto,
    /// Intel TDX guest
    IntelTdx,
    /// Software-simulated (always available, NOT hardware-secured)
    Simulated,
}

impl TeeBackend {
    pub fn name(&self) -> &str {
        match self {
            TeeBackend::Auto => "Auto-detect",
            TeeBackend::IntelTdx => "Intel TDX",
            TeeBackend::Simulated => "Simulated (software)",
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, TeeBackend::IntelTdx)
    }
}

impl FromStr for TeeBackend {
    type Err = TeeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TeeBackend::Auto),
            "tdx" | "intel_tdx" | "intel-tdx" => Ok(TeeBackend::IntelTdx),
            "sim" | "simulated" => Ok(TeeBackend::Simulated),
            other => Err(TeeError::InvalidParam(format!("unknown TEE backend: {}", other))),
        }
    }
}

/// Hardware attestation primitives consumed by the key and measurement engines
pub trait TeeDevice: Send + Sync {
    /// Backend actually serving requests (never `Auto`)
    fn backend(&self) -> TeeBackend;

    /// Acquire a fresh attestation report embedding `report_data`
    fn get_report(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<AttestationReport>;

    /// Read the current value of RTMR `index`
    fn read_rtmr(&self, index: usize) -> Result<Measurement>;

    /// Extend RTMR `index` with a 48-byte event digest, returning the new value
    fn extend_rtmr(&self, index: usize, event: &Measurement) -> Result<Measurement>;

    /// Produce a signed quote embedding `report_data`
    fn get_quote(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>>;
}

/// Open the device named by `config.backend`
pub fn open_device(config: &ToolConfig) -> Result<Arc<dyn TeeDevice>> {
    let device: Arc<dyn TeeDevice> = match config.backend {
        TeeBackend::IntelTdx => Arc::new(TdxGuest::open(config)?),
        TeeBackend::Simulated => Arc::new(SimulatedTdx::new(config.simulated_seed_bytes()?)),
        TeeBackend::Auto => {
            if probe_tdx(&config.tdx_guest_device) {
                Arc::new(TdxGuest::open(config)?)
            } else {
                log::warn!("Intel TDX not available, falling back to simulated TD");
                Arc::new(SimulatedTdx::new(config.simulated_seed_bytes()?))
            }
        }
    };

    log::info!("TEE device initialized: backend={}", device.backend().name());
    Ok(device)
}

/// Whether a TDX guest device node is present
pub fn probe_tdx(device: &Path) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        device.exists()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = device;
        false
    }
}

pub(crate) fn check_rtmr_index(index: usize) -> Result<()> {
    if index >= super::report::RTMR_COUNT {
        return Err(TeeError::InvalidParam(format!("RTMR index {} out of range", index)));
    }
    Ok(())
}
