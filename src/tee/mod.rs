//! TEE (Trusted Execution Environment): hardware attestation primitives
//!
//! Provides the collaborator side of key derivation and measured deployment:
//! - **Device**: backend selection and the [`TeeDevice`] trait
//! - **Report**: the fixed-size TDX report and its byte layout
//! - **TDX**: Linux TDX guest (ioctl, sysfs RTMRs, configfs-tsm quotes)
//! - **Simulated**: deterministic software TD for dev/test

pub mod device;
pub mod report;
pub mod simulated;
pub mod tdx;

pub use device::{open_device, probe_tdx, TeeBackend, TeeDevice};
pub use report::{
    AttestationReport, Measurement, HASH_LEN, REPORT_DATA_LEN, RTMR_COUNT, TDX_REPORT_LEN,
};
pub use simulated::SimulatedTdx;
pub use tdx::TdxGuest;
