//! TDX attestation report: the fixed-size `TDREPORT_STRUCT`
//!
//! Layout (bytes):
//! - `0..256`     REPORTMACSTRUCT (report data at 128..192, MAC at 224..256)
//! - `256..512`   TEE_TCB_INFO + reserved
//! - `512..1024`  TDINFO_STRUCT
//!
//! Within TDINFO: ATTRIBUTES(8) XFAM(8) MRTD(48) MRCONFIGID(48) MROWNER(48)
//! MROWNERCONFIG(48) RTMR[4](192) SERVTD_HASH(48) reserved(64).

use crate::error::{Result, TeeError};
use zeroize::Zeroize;

/// Size of a TDX report
pub const TDX_REPORT_LEN: usize = 1024;
/// Size of the caller-chosen report data field
pub const REPORT_DATA_LEN: usize = 64;
/// Width of a SHA-384 measurement (RTMR, MRTD, volume hashes)
pub const HASH_LEN: usize = 48;
/// Number of runtime measurement registers
pub const RTMR_COUNT: usize = 4;

/// A SHA-384 measurement value
pub type Measurement = [u8; HASH_LEN];

pub const REPORT_DATA_OFFSET: usize = 128;
pub const REPORT_MAC_OFFSET: usize = 224;
pub const TDINFO_OFFSET: usize = 512;
pub const MRTD_OFFSET: usize = TDINFO_OFFSET + 16;
pub const RTMR_OFFSET: usize = MRTD_OFFSET + 4 * HASH_LEN;

/// Start of the key-derivation field: MRTD ‖ MRCONFIGID ‖ MROWNER ‖ MROWNERCONFIG.
/// RTMRs are outside it, so the identity survives register extensions.
pub const IDENTITY_FIELD_OFFSET: usize = MRTD_OFFSET;
pub const IDENTITY_FIELD_LEN: usize = 4 * HASH_LEN;

// TDX quote v4: 48-byte header followed by the 584-byte TD quote body.
pub const QUOTE_HEADER_LEN: usize = 48;
pub const QUOTE_BODY_LEN: usize = 584;
pub const QUOTE_BODY_RTMR_OFFSET: usize = 328;
pub const QUOTE_REPORT_DATA_OFFSET: usize = QUOTE_HEADER_LEN + 520;
pub const QUOTE_VERSION: u16 = 4;
pub const TDX_TEE_TYPE: u32 = 0x81;

/// Copy a SHA-384 output into a fixed-size measurement
pub(crate) fn measurement_from(digest: &[u8]) -> Measurement {
    let mut value = [0u8; HASH_LEN];
    value.copy_from_slice(digest);
    value
}

/// An opaque hardware-issued report. Wiped on drop since it carries the
/// material the enclave key is derived from.
pub struct AttestationReport {
    bytes: Box<[u8; TDX_REPORT_LEN]>,
}

impl AttestationReport {
    /// Wrap a raw report buffer, rejecting anything that is not exactly one report
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != TDX_REPORT_LEN {
            return Err(TeeError::TdxReport(format!(
                "report must be {} bytes, got {}",
                TDX_REPORT_LEN,
                raw.len()
            )));
        }
        let mut bytes = Box::new([0u8; TDX_REPORT_LEN]);
        bytes.copy_from_slice(raw);
        Ok(Self { bytes })
    }

    pub(crate) fn from_boxed(bytes: Box<[u8; TDX_REPORT_LEN]>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; TDX_REPORT_LEN] {
        &self.bytes
    }

    pub fn report_data(&self) -> &[u8] {
        &self.bytes[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + REPORT_DATA_LEN]
    }

    pub fn mrtd(&self) -> &[u8] {
        &self.bytes[MRTD_OFFSET..MRTD_OFFSET + HASH_LEN]
    }

    /// The contiguous TD identity region used for key derivation
    pub fn identity_fields(&self) -> &[u8] {
        &self.bytes[IDENTITY_FIELD_OFFSET..IDENTITY_FIELD_OFFSET + IDENTITY_FIELD_LEN]
    }

    pub fn rtmr(&self, index: usize) -> Result<&[u8]> {
        if index >= RTMR_COUNT {
            return Err(TeeError::InvalidParam(format!("RTMR index {} out of range", index)));
        }
        let start = RTMR_OFFSET + index * HASH_LEN;
        Ok(&self.bytes[start..start + HASH_LEN])
    }
}

impl Drop for AttestationReport {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for AttestationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AttestationReport({} bytes)", TDX_REPORT_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(MRTD_OFFSET, 528);
        assert_eq!(RTMR_OFFSET, 720);
        assert_eq!(RTMR_OFFSET + RTMR_COUNT * HASH_LEN, 912);
        assert_eq!(IDENTITY_FIELD_OFFSET + IDENTITY_FIELD_LEN, RTMR_OFFSET);
        assert_eq!(QUOTE_REPORT_DATA_OFFSET + REPORT_DATA_LEN, QUOTE_HEADER_LEN + QUOTE_BODY_LEN);
    }

    #[test]
    fn test_rejects_wrong_size() {
        let err = AttestationReport::from_bytes(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, TeeError::TdxReport(_)));
    }

    #[test]
    fn test_field_accessors() {
        let mut raw = vec![0u8; TDX_REPORT_LEN];
        raw[REPORT_DATA_OFFSET] = 0x11;
        raw[MRTD_OFFSET] = 0x22;
        raw[RTMR_OFFSET + 3 * HASH_LEN] = 0x33;
        let report = AttestationReport::from_bytes(&raw).unwrap();

        assert_eq!(report.report_data()[0], 0x11);
        assert_eq!(report.mrtd()[0], 0x22);
        assert_eq!(report.identity_fields()[0], 0x22);
        assert_eq!(report.rtmr(3).unwrap()[0], 0x33);
        assert!(report.rtmr(4).is_err());
    }
}
