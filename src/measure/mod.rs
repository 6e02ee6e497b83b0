//! Measure: integrity measurement of deployed application state
//!
//! - **Compose**: bind-mount sources declared in a deployment descriptor
//! - **Volume**: order-independent content hashes of directory trees
//! - **Register**: append-only RTMR extension, linearized per process
//! - **Quote**: attestation evidence over the post-extension register

pub mod compose;
pub mod quote;
pub mod register;
pub mod volume;

pub use compose::{expand_source, extract_volume_sources, normalize_source};
pub use quote::{report_data_for, Quote, QuoteGenerator, REPORT_DATA_DOMAIN};
pub use register::{chain, event_digest, replay, MeasurementRegister};
pub use volume::{hash_directory, VolumeDigest, VolumeHasher};

pub use crate::tee::{Measurement, HASH_LEN};
