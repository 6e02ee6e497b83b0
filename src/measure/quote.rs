//! Attestation quotes: hardware evidence binding the register state
//!
//! Report data layout (64 bytes):
//! - register only: `RTMR ‖ 0^16`
//! - register + address: `SHA-512(REPORT_DATA_DOMAIN ‖ RTMR ‖ address)`
//!
//! Callers extend first and quote second; [`QuoteGenerator::quote_register`]
//! reads the register value at quoting time, never a cached one.

use super::register::MeasurementRegister;
use crate::error::{Result, TeeError};
use crate::identity::EthAddress;
use crate::tee::report::{
    measurement_from, QUOTE_BODY_RTMR_OFFSET, QUOTE_HEADER_LEN, QUOTE_REPORT_DATA_OFFSET,
};
use crate::tee::{Measurement, TeeBackend, TeeDevice, HASH_LEN, REPORT_DATA_LEN, RTMR_COUNT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::sync::Arc;

pub const REPORT_DATA_DOMAIN: &[u8] = b"tdx-attest/report-data/v1";

/// Offset of the TD quote body; v5 quotes carry a 6-byte body descriptor first
fn body_offset(raw: &[u8]) -> Option<usize> {
    if raw.len() < 2 {
        return None;
    }
    match u16::from_le_bytes([raw[0], raw[1]]) {
        4 => Some(QUOTE_HEADER_LEN),
        5 => Some(QUOTE_HEADER_LEN + 6),
        _ => None,
    }
}

/// An attestation quote produced by the TEE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// TEE backend that produced the quote
    pub backend: TeeBackend,
    /// Report data the quote was requested with
    #[serde(with = "crate::serde_hex")]
    pub report_data: [u8; REPORT_DATA_LEN],
    /// Raw quote blob, as returned by the device
    #[serde(with = "crate::serde_hex::bytes")]
    pub raw: Vec<u8>,
    /// Timestamp of quote generation
    pub generated_at: DateTime<Utc>,
}

impl Quote {
    /// Report data as recorded inside the quote body
    pub fn embedded_report_data(&self) -> Option<[u8; REPORT_DATA_LEN]> {
        let start = body_offset(&self.raw)? + QUOTE_REPORT_DATA_OFFSET - QUOTE_HEADER_LEN;
        let field = self.raw.get(start..start + REPORT_DATA_LEN)?;
        let mut out = [0u8; REPORT_DATA_LEN];
        out.copy_from_slice(field);
        Some(out)
    }

    /// RTMR value as recorded inside the quote body
    pub fn embedded_rtmr(&self, index: usize) -> Option<Measurement> {
        if index >= RTMR_COUNT {
            return None;
        }
        let start = body_offset(&self.raw)? + QUOTE_BODY_RTMR_OFFSET + index * HASH_LEN;
        self.raw.get(start..start + HASH_LEN).map(measurement_from)
    }

    /// Whether this quote attests `register` (and `address`, if given)
    pub fn binds(&self, register: &Measurement, address: Option<&EthAddress>) -> bool {
        let expected = report_data_for(register, address);
        self.report_data == expected && self.embedded_report_data() == Some(expected)
    }
}

/// Report data binding a register value and, optionally, the enclave address
pub fn report_data_for(register: &Measurement, address: Option<&EthAddress>) -> [u8; REPORT_DATA_LEN] {
    let mut out = [0u8; REPORT_DATA_LEN];
    match address {
        None => out[..HASH_LEN].copy_from_slice(register),
        Some(address) => {
            let mut h = Sha512::new();
            h.update(REPORT_DATA_DOMAIN);
            h.update(register);
            h.update(address.as_bytes());
            out.copy_from_slice(&h.finalize());
        }
    }
    out
}

/// Produces quotes from a TEE device
pub struct QuoteGenerator {
    device: Arc<dyn TeeDevice>,
}

impl QuoteGenerator {
    pub fn new(device: Arc<dyn TeeDevice>) -> Self {
        Self { device }
    }

    /// Quote over up to 64 bytes of report data (zero-padded)
    pub fn generate_quote(&self, report_data: &[u8]) -> Result<Quote> {
        if report_data.len() > REPORT_DATA_LEN {
            return Err(TeeError::InvalidParam(format!(
                "report data must be at most {} bytes, got {}",
                REPORT_DATA_LEN,
                report_data.len()
            )));
        }
        let mut padded = [0u8; REPORT_DATA_LEN];
        padded[..report_data.len()].copy_from_slice(report_data);

        let raw = self.device.get_quote(&padded)?;
        log::info!(
            "Generated {} quote: {} bytes",
            self.device.backend().name(),
            raw.len()
        );

        Ok(Quote {
            backend: self.device.backend(),
            report_data: padded,
            raw,
            generated_at: Utc::now(),
        })
    }

    /// Quote over the register's current value, atomically with respect to `extend`
    pub fn quote_register(
        &self,
        register: &MeasurementRegister,
        address: Option<&EthAddress>,
    ) -> Result<Quote> {
        register.with_locked_value(|value| self.generate_quote(&report_data_for(value, address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::SimulatedTdx;

    fn setup() -> (Arc<SimulatedTdx>, MeasurementRegister, QuoteGenerator) {
        let device = Arc::new(SimulatedTdx::new([5u8; 32]));
        let register = MeasurementRegister::open(device.clone(), 3).unwrap();
        let generator = QuoteGenerator::new(device.clone());
        (device, register, generator)
    }

    #[test]
    fn test_generate_quote() {
        let (device, _, generator) = setup();
        let quote = generator.generate_quote(b"nonce-123").unwrap();
        assert_eq!(quote.backend, TeeBackend::Simulated);
        assert!(!quote.raw.is_empty());
        assert_eq!(&quote.report_data[..9], b"nonce-123");
        assert!(quote.report_data[9..].iter().all(|b| *b == 0));
        assert_eq!(quote.embedded_report_data(), Some(quote.report_data));
        assert!(device.verify_quote(&quote.raw));
    }

    #[test]
    fn test_report_data_too_long() {
        let (_, _, generator) = setup();
        let err = generator.generate_quote(&[0u8; 65]).unwrap_err();
        assert!(matches!(err, TeeError::InvalidParam(_)));
    }

    #[test]
    fn test_quote_reflects_post_extension_value() {
        let (_, register, generator) = setup();
        let before = register.current_value();
        let after = register.extend(&[0x77u8; HASH_LEN]).unwrap();
        let quote = generator.quote_register(&register, None).unwrap();

        assert_eq!(&quote.report_data[..HASH_LEN], &after[..]);
        assert_ne!(&quote.report_data[..HASH_LEN], &before[..]);
        assert_eq!(quote.embedded_rtmr(3), Some(after));
        assert!(quote.binds(&after, None));
        assert!(!quote.binds(&before, None));
    }

    #[test]
    fn test_quote_binds_address() {
        let (_, register, generator) = setup();
        register.extend(b"volumes").unwrap();
        let address = EthAddress::from_bytes(&[0xAA; 20]).unwrap();
        let other = EthAddress::from_bytes(&[0xBB; 20]).unwrap();
        let value = register.current_value();

        let quote = generator.quote_register(&register, Some(&address)).unwrap();
        assert!(quote.binds(&value, Some(&address)));
        assert!(!quote.binds(&value, Some(&other)));
        assert!(!quote.binds(&value, None));
    }

    #[test]
    fn test_quote_json_round_trip() {
        let (_, _, generator) = setup();
        let quote = generator.generate_quote(&[1u8; 64]).unwrap();
        let json = serde_json::to_string(&quote).unwrap();
        let back: Quote = serde_json::from_str(&json).unwrap();
        assert_eq!(back.raw, quote.raw);
        assert_eq!(back.report_data, quote.report_data);
    }

    #[test]
    fn test_embedded_fields_of_foreign_blob() {
        let quote = Quote {
            backend: TeeBackend::IntelTdx,
            report_data: [0u8; REPORT_DATA_LEN],
            raw: vec![9u8; 10],
            generated_at: Utc::now(),
        };
        assert_eq!(quote.embedded_report_data(), None);
        assert_eq!(quote.embedded_rtmr(0), None);
    }

    #[test]
    fn test_concurrent_quotes_are_never_stale() {
        let device = Arc::new(SimulatedTdx::new([6u8; 32]));
        let register = Arc::new(MeasurementRegister::open(device.clone(), 3).unwrap());
        let generator = QuoteGenerator::new(device);

        let extender = {
            let register = register.clone();
            std::thread::spawn(move || {
                for i in 0..2000u32 {
                    register.extend(&i.to_le_bytes()).unwrap();
                }
            })
        };
        for _ in 0..2000 {
            let quote = generator.quote_register(&register, None).unwrap();
            let embedded = quote.embedded_rtmr(3).unwrap();
            assert_eq!(&quote.report_data[..HASH_LEN], &embedded[..]);
        }
        extender.join().unwrap();
        assert_eq!(register.extension_count(), 2000);
    }
}
