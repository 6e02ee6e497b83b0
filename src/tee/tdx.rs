//! Intel TDX guest backend
//!
//! - Reports: `TDX_CMD_GET_REPORT0` ioctl on `/dev/tdx_guest`
//! - RTMRs: `/sys/class/misc/tdx_guest/measurements/rtmrN:sha384` (read = value, write = extend)
//! - Quotes: configfs-tsm (`mkdir report/<name>`, write `inblob`, read `outblob`, `rmdir`)

use super::device::{check_rtmr_index, probe_tdx, TeeBackend, TeeDevice};
use super::report::{AttestationReport, Measurement, HASH_LEN, REPORT_DATA_LEN};
use crate::config::ToolConfig;
use crate::error::{Result, TeeError};
use std::fs;
use std::path::{Path, PathBuf};

/// A Linux TDX guest
pub struct TdxGuest {
    device: PathBuf,
    tsm_report_dir: PathBuf,
    measurements_dir: PathBuf,
}

impl TdxGuest {
    /// Open the guest device, failing if it is absent or inaccessible
    pub fn open(config: &ToolConfig) -> Result<Self> {
        if !probe_tdx(&config.tdx_guest_device) {
            return Err(TeeError::BackendUnavailable(format!(
                "TDX guest device not found at {}. Are you running in a TD?",
                config.tdx_guest_device.display()
            )));
        }
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.tdx_guest_device)
            .map_err(|e| {
                TeeError::BackendUnavailable(format!(
                    "cannot open {}: {}",
                    config.tdx_guest_device.display(),
                    e
                ))
            })?;

        Ok(Self {
            device: config.tdx_guest_device.clone(),
            tsm_report_dir: config.tsm_report_dir.clone(),
            measurements_dir: config.measurements_dir.clone(),
        })
    }

    fn rtmr_path(&self, index: usize) -> PathBuf {
        self.measurements_dir.join(format!("rtmr{}:sha384", index))
    }
}

impl TeeDevice for TdxGuest {
    fn backend(&self) -> TeeBackend {
        TeeBackend::IntelTdx
    }

    fn get_report(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<AttestationReport> {
        ioctl::get_report(&self.device, report_data)
    }

    fn read_rtmr(&self, index: usize) -> Result<Measurement> {
        check_rtmr_index(index)?;
        let path = self.rtmr_path(index);
        let raw = fs::read(&path)
            .map_err(|e| TeeError::TdxReport(format!("cannot read {}: {}", path.display(), e)))?;
        parse_rtmr_value(&raw)
    }

    fn extend_rtmr(&self, index: usize, event: &Measurement) -> Result<Measurement> {
        check_rtmr_index(index)?;
        let path = self.rtmr_path(index);
        fs::write(&path, event)
            .map_err(|e| TeeError::TdxReport(format!("RTMR{} extend failed: {}", index, e)))?;
        self.read_rtmr(index)
    }

    fn get_quote(&self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>> {
        if !self.tsm_report_dir.exists() {
            return Err(TeeError::TdxReport(format!(
                "configfs-tsm not found at {}",
                self.tsm_report_dir.display()
            )));
        }
        let entry = TsmEntry::create(&self.tsm_report_dir)?;
        fs::write(entry.path.join("inblob"), report_data)
            .map_err(|e| TeeError::TdxReport(format!("cannot write inblob: {}", e)))?;
        let quote = fs::read(entry.path.join("outblob"))
            .map_err(|e| TeeError::TdxReport(format!("cannot read outblob: {}", e)))?;
        if quote.is_empty() {
            return Err(TeeError::TdxReport("quote generation returned no data".into()));
        }
        Ok(quote)
    }
}

/// Temporary configfs-tsm report entry, removed when dropped
struct TsmEntry {
    path: PathBuf,
}

impl TsmEntry {
    fn create(root: &Path) -> Result<Self> {
        let path = root.join(format!("tdx_attest_{}", uuid::Uuid::new_v4()));
        fs::create_dir(&path)
            .map_err(|e| TeeError::TdxReport(format!("cannot create tsm report entry: {}", e)))?;
        Ok(Self { path })
    }
}

impl Drop for TsmEntry {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(&self.path) {
            log::warn!("Failed to remove tsm report entry {}: {}", self.path.display(), e);
        }
    }
}

/// RTMR attributes are binary digests; some kernels expose hex text instead
fn parse_rtmr_value(raw: &[u8]) -> Result<Measurement> {
    if raw.len() == HASH_LEN {
        let mut value = [0u8; HASH_LEN];
        value.copy_from_slice(raw);
        return Ok(value);
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| TeeError::TdxReport(format!("unexpected RTMR value of {} bytes", raw.len())))?;
    let decoded = hex::decode(text.trim())
        .map_err(|e| TeeError::TdxReport(format!("unparseable RTMR value: {}", e)))?;
    decoded
        .try_into()
        .map_err(|_| TeeError::TdxReport("RTMR value is not 48 bytes".into()))
}

#[cfg(target_os = "linux")]
mod ioctl {
    use super::super::report::{AttestationReport, REPORT_DATA_LEN, TDX_REPORT_LEN};
    use crate::error::{Result, TeeError};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use zeroize::Zeroize;

    /// `_IOWR('T', 1, struct tdx_report_req)`
    const TDX_CMD_GET_REPORT0: u64 = 0xC440_5401;

    #[repr(C)]
    struct TdxReportReq {
        reportdata: [u8; REPORT_DATA_LEN],
        tdreport: [u8; TDX_REPORT_LEN],
    }

    pub(super) fn get_report(
        device: &Path,
        report_data: &[u8; REPORT_DATA_LEN],
    ) -> Result<AttestationReport> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| TeeError::TdxReport(format!("cannot open {}: {}", device.display(), e)))?;

        let mut req = Box::new(TdxReportReq {
            reportdata: *report_data,
            tdreport: [0u8; TDX_REPORT_LEN],
        });

        // SAFETY: `req` is a live, correctly sized `tdx_report_req` for the duration
        // of the call and the fd stays open until `file` is dropped.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                TDX_CMD_GET_REPORT0 as _,
                &mut *req as *mut TdxReportReq,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            return Err(TeeError::TdxReport(format!("TDX_CMD_GET_REPORT0 failed: {}", err)));
        }

        let mut bytes = Box::new([0u8; TDX_REPORT_LEN]);
        bytes.copy_from_slice(&req.tdreport);
        req.tdreport.zeroize();
        Ok(AttestationReport::from_boxed(bytes))
    }
}

#[cfg(not(target_os = "linux"))]
mod ioctl {
    use super::super::report::{AttestationReport, REPORT_DATA_LEN};
    use crate::error::{Result, TeeError};
    use std::path::Path;

    pub(super) fn get_report(
        _device: &Path,
        _report_data: &[u8; REPORT_DATA_LEN],
    ) -> Result<AttestationReport> {
        Err(TeeError::TdxReport("TDX reports are only available on Linux".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_rtmr() {
        let value = parse_rtmr_value(&[0xAA; HASH_LEN]).unwrap();
        assert_eq!(value, [0xAA; HASH_LEN]);
    }

    #[test]
    fn test_parse_hex_rtmr() {
        let text = format!("{}\n", hex::encode([0x01u8; HASH_LEN]));
        let value = parse_rtmr_value(text.as_bytes()).unwrap();
        assert_eq!(value, [0x01; HASH_LEN]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_rtmr_value(b"not a digest").is_err());
        assert!(parse_rtmr_value(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_tsm_entry_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let entry = TsmEntry::create(root.path()).unwrap();
            assert!(entry.path.exists());
            entry.path.clone()
        };
        assert!(!path.exists());
    }
}
