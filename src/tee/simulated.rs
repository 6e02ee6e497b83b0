//! Software-simulated TD
//!
//! A deterministic stand-in for a TDX guest: every measured field derives from a
//! 32-byte seed, so the same seed yields the same TD identity across restarts.
//! RTMRs are held in memory and extended exactly as the TDX module does.
//! Quotes use the v4 byte layout but carry a keyed SHA-384 tag instead of an
//! ECDSA signature chain. NOT hardware-secured.

use super::device::{check_rtmr_index, TeeBackend, TeeDevice};
use super::report::*;
use crate::error::Result;
use sha2::{Digest, Sha256, Sha384};
use std::sync::Mutex;
use zeroize::Zeroizing;

const SIM_DOMAIN: &[u8] = b"tdx-attest-sim/";
const REPORT_TYPE_TDX: u8 = 0x81;
const ATT_KEY_TYPE_ECDSA_P256: u16 = 2;
const QE_VENDOR_ID: &[u8; 16] = b"tdx-attest-sim\0\0";
const TD_XFAM: u64 = 0x0000_0000_0006_02E7;

/// In-memory TD with seed-derived measurements
pub struct SimulatedTdx {
    seed: Zeroizing<[u8; 32]>,
    rtmrs: Mutex<[Measurement; RTMR_COUNT]>,
}

impl SimulatedTdx {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed: Zeroizing::new(seed),
            rtmrs: Mutex::new([[0u8; HASH_LEN]; RTMR_COUNT]),
        }
    }

    fn measure(&self, label: &str) -> Measurement {
        let mut h = Sha384::new();
        h.update(SIM_DOMAIN);
        h.update(label.as_bytes());
        h.update(&self.seed[..]);
        measurement_from(&h.finalize())
    }

    fn rtmr_snapshot(&self) -> [Measurement; RTMR_COUNT] {
        *self.rtmrs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn identity_fields(&self) -> [Measurement; 4] {
        [
            self.measure("mrtd"),
            self.measure("mrconfigid"),
            self.measure("mrowner"),
            self.measure("mrownerconfig"),
        ]
    }

    fn quote_tag(&self, signed: &[u8]) -> Measurement {
        let mut h = Sha384::new();
        h.update(SIM_DOMAIN);
        h.update(b"quote-signature");
        h.update(&self.seed[..]);
        h.update(signed);
        measurement_from(&h.finalize())
    }

    /// Check a quote produced by this simulated TD
    pub fn verify_quote(&self, quote: &[u8]) -> bool {
        let signed_len = QUOTE_HEADER_LEN + QUOTE_BODY_LEN;
        if quote.len() != signed_len + 4 + HASH_LEN {
            return false;
        }
        let tag = self.quote_tag(&quote[..signed_len]);
        quote[signed_len + 4..] == tag[..]
    }
}

impl TeeDevice for SimulatedTdx {
    fn backend(&self) -> TeeBackend {
        TeeBackend::Simulated
    }

    fn get_report(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<AttestationReport> {
        let mut bytes = Box::new([0u8; TDX_REPORT_LEN]);

        // REPORTMACSTRUCT
        bytes[0] = REPORT_TYPE_TDX;
        bytes[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + REPORT_DATA_LEN].copy_from_slice(report_data);

        // TEE_TCB_INFO
        bytes[256..256 + HASH_LEN].copy_from_slice(&self.measure("tee-tcb-info"));

        // TDINFO
        bytes[TDINFO_OFFSET + 8..TDINFO_OFFSET + 16].copy_from_slice(&TD_XFAM.to_le_bytes());
        for (i, field) in self.identity_fields().iter().enumerate() {
            let start = MRTD_OFFSET + i * HASH_LEN;
            bytes[start..start + HASH_LEN].copy_from_slice(field);
        }
        for (i, rtmr) in self.rtmr_snapshot().iter().enumerate() {
            let start = RTMR_OFFSET + i * HASH_LEN;
            bytes[start..start + HASH_LEN].copy_from_slice(rtmr);
        }

        let mac = {
            let mut h = Sha256::new();
            h.update(&self.seed[..]);
            h.update(&bytes[..REPORT_MAC_OFFSET]);
            h.update(&bytes[256..]);
            h.update(b"tdx-attest-sim-mac-v1");
            h.finalize()
        };
        bytes[REPORT_MAC_OFFSET..REPORT_MAC_OFFSET + 32].copy_from_slice(&mac);

        Ok(AttestationReport::from_boxed(bytes))
    }

    fn read_rtmr(&self, index: usize) -> Result<Measurement> {
        check_rtmr_index(index)?;
        Ok(self.rtmr_snapshot()[index])
    }

    fn extend_rtmr(&self, index: usize, event: &Measurement) -> Result<Measurement> {
        check_rtmr_index(index)?;
        let mut rtmrs = self.rtmrs.lock().unwrap_or_else(|e| e.into_inner());
        let mut h = Sha384::new();
        h.update(rtmrs[index]);
        h.update(event);
        rtmrs[index] = measurement_from(&h.finalize());
        Ok(rtmrs[index])
    }

    fn get_quote(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>> {
        let mut quote = Vec::with_capacity(QUOTE_HEADER_LEN + QUOTE_BODY_LEN + 4 + HASH_LEN);

        // Header
        quote.extend_from_slice(&QUOTE_VERSION.to_le_bytes());
        quote.extend_from_slice(&ATT_KEY_TYPE_ECDSA_P256.to_le_bytes());
        quote.extend_from_slice(&TDX_TEE_TYPE.to_le_bytes());
        quote.extend_from_slice(&[0u8; 4]);
        quote.extend_from_slice(QE_VENDOR_ID);
        quote.extend_from_slice(&[0u8; 20]);

        // TD quote body
        quote.extend_from_slice(&[0u8; 16]); // tee_tcb_svn
        quote.extend_from_slice(&self.measure("mrseam"));
        quote.extend_from_slice(&[0u8; HASH_LEN]); // mrsignerseam
        quote.extend_from_slice(&[0u8; 8]); // seam_attributes
        quote.extend_from_slice(&[0u8; 8]); // td_attributes
        quote.extend_from_slice(&TD_XFAM.to_le_bytes());
        for field in self.identity_fields().iter() {
            quote.extend_from_slice(field);
        }
        for rtmr in self.rtmr_snapshot().iter() {
            quote.extend_from_slice(rtmr);
        }
        quote.extend_from_slice(report_data);
        debug_assert_eq!(quote.len(), QUOTE_HEADER_LEN + QUOTE_BODY_LEN);

        // Signature section
        let tag = self.quote_tag(&quote);
        quote.extend_from_slice(&(HASH_LEN as u32).to_le_bytes());
        quote.extend_from_slice(&tag);

        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimulatedTdx {
        SimulatedTdx::new([7u8; 32])
    }

    #[test]
    fn test_report_is_deterministic_per_seed() {
        let a = sim().get_report(&[0u8; 64]).unwrap();
        let b = sim().get_report(&[0u8; 64]).unwrap();
        let c = SimulatedTdx::new([8u8; 32]).get_report(&[0u8; 64]).unwrap();

        assert_eq!(a.as_bytes()[..], b.as_bytes()[..]);
        assert_ne!(a.identity_fields(), c.identity_fields());
    }

    #[test]
    fn test_report_embeds_report_data() {
        let report = sim().get_report(&[0x42u8; 64]).unwrap();
        assert_eq!(report.report_data(), &[0x42u8; 64][..]);
        assert_eq!(report.as_bytes()[0], REPORT_TYPE_TDX);
    }

    #[test]
    fn test_extend_matches_tdx_semantics() {
        let device = sim();
        let event = [0x01u8; HASH_LEN];
        let value = device.extend_rtmr(3, &event).unwrap();

        let mut h = Sha384::new();
        h.update([0u8; HASH_LEN]);
        h.update(event);
        let expected = measurement_from(&h.finalize());
        assert_eq!(value, expected);
        assert_eq!(device.read_rtmr(3).unwrap(), expected);
        assert_eq!(device.read_rtmr(2).unwrap(), [0u8; HASH_LEN]);
    }

    #[test]
    fn test_extension_leaves_identity_unchanged() {
        let device = sim();
        let before = device.get_report(&[0u8; 64]).unwrap();
        device.extend_rtmr(3, &[0x09u8; HASH_LEN]).unwrap();
        let after = device.get_report(&[0u8; 64]).unwrap();

        assert_eq!(before.identity_fields(), after.identity_fields());
        assert_ne!(before.rtmr(3).unwrap(), after.rtmr(3).unwrap());
    }

    #[test]
    fn test_rtmr_index_bounds() {
        let device = sim();
        assert!(device.read_rtmr(4).is_err());
        assert!(device.extend_rtmr(7, &[0u8; HASH_LEN]).is_err());
    }

    #[test]
    fn test_quote_layout_and_tag() {
        let device = sim();
        device.extend_rtmr(3, &[0x05u8; HASH_LEN]).unwrap();
        let quote = device.get_quote(&[0x33u8; 64]).unwrap();

        assert_eq!(u16::from_le_bytes([quote[0], quote[1]]), QUOTE_VERSION);
        assert_eq!(
            &quote[QUOTE_REPORT_DATA_OFFSET..QUOTE_REPORT_DATA_OFFSET + REPORT_DATA_LEN],
            &[0x33u8; 64][..]
        );
        let rtmr3 = QUOTE_HEADER_LEN + QUOTE_BODY_RTMR_OFFSET + 3 * HASH_LEN;
        assert_eq!(&quote[rtmr3..rtmr3 + HASH_LEN], &device.read_rtmr(3).unwrap()[..]);
        assert!(device.verify_quote(&quote));

        let mut tampered = quote.clone();
        tampered[QUOTE_REPORT_DATA_OFFSET] ^= 0xFF;
        assert!(!device.verify_quote(&tampered));
    }
}
