//! tdx-attest: hardware-rooted identity and measured deployment for Intel TDX
//!
//! Two entry points share one attestation device:
//! - [`identity::KeyTool`] turns the TD's attestation report into an Ethereum
//!   keypair and address without ever exposing the private scalar.
//! - [`deploy::Orchestrator`] hashes an application's volumes, extends an RTMR
//!   with the result, launches the application and quotes the new register state.

pub mod config;
pub mod deploy;
pub mod error;
pub mod identity;
pub mod measure;
pub mod secure;
pub mod tee;

mod serde_hex;

pub use config::ToolConfig;
pub use deploy::{Orchestrator, StartOutcome, StartStatus};
pub use error::{Result, TeeError};
pub use identity::{EthAddress, EthIdentity, KeyTool, PublicKey};
pub use measure::{MeasurementRegister, Quote, QuoteGenerator, VolumeHasher};
pub use secure::SecureBuffer;
pub use tee::{open_device, TeeBackend, TeeDevice};
