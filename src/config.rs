//! Tool configuration: JSON file plus environment overrides
//!
//! Every field has a default, so an absent or partial file is fine.

use crate::error::{Result, TeeError};
use crate::tee::{TeeBackend, RTMR_COUNT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Seed for the simulated TD when none is configured. Fixed so that the simulated
/// identity is stable across restarts.
pub const DEFAULT_SIMULATED_SEED: &str =
    "7464782d6174746573742d73696d756c617465642d74642d736565642d763031";

/// Runtime configuration for key derivation and measured deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Which TEE backend to open
    pub backend: TeeBackend,
    /// Hex-encoded 32-byte seed for the simulated TD
    pub simulated_seed: String,
    /// TDX guest device node
    pub tdx_guest_device: PathBuf,
    /// configfs-tsm report directory
    pub tsm_report_dir: PathBuf,
    /// sysfs directory exposing `rtmrN:sha384` attributes
    pub measurements_dir: PathBuf,
    /// Register extended with the volumes hash
    pub rtmr_index: u8,
    /// Program + leading args used to launch a compose descriptor
    pub compose_command: Vec<String>,
    /// Delay between launch attempts (milliseconds)
    pub launch_retry_delay_ms: u64,
    /// Measure but do not launch (test / dry-run mode)
    pub skip_launch: bool,
    /// Produce a quote after `start`
    pub quote_after_start: bool,
    /// Bind the enclave's Ethereum address into quotes
    pub bind_address_in_quote: bool,
    /// Base directory for relative volume paths (current directory when unset)
    pub work_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            backend: TeeBackend::Auto,
            simulated_seed: DEFAULT_SIMULATED_SEED.to_string(),
            tdx_guest_device: PathBuf::from("/dev/tdx_guest"),
            tsm_report_dir: PathBuf::from("/sys/kernel/config/tsm/report"),
            measurements_dir: PathBuf::from("/sys/class/misc/tdx_guest/measurements"),
            rtmr_index: 3,
            compose_command: vec!["docker".to_string(), "compose".to_string()],
            launch_retry_delay_ms: 2000,
            skip_launch: false,
            quote_after_start: true,
            bind_address_in_quote: false,
            work_dir: None,
        }
    }
}

impl ToolConfig {
    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TeeError::InvalidParam(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: ToolConfig = serde_json::from_str(&json).map_err(|e| {
            TeeError::InvalidParam(format!("malformed config {}: {}", path.display(), e))
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TeeError::InvalidParam(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), json).map_err(|e| {
            TeeError::InvalidParam(format!("cannot write config {}: {}", path.as_ref().display(), e))
        })
    }

    /// Apply `TDX_ATTEST_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(backend) = lookup("TDX_ATTEST_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(index) = lookup("TDX_ATTEST_RTMR") {
            self.rtmr_index = index
                .parse()
                .map_err(|_| TeeError::InvalidParam(format!("bad TDX_ATTEST_RTMR: {}", index)))?;
        }
        if let Some(skip) = lookup("TDX_ATTEST_SKIP_LAUNCH") {
            self.skip_launch = matches!(skip.as_str(), "1" | "true" | "yes");
        }
        if let Some(seed) = lookup("TDX_ATTEST_SEED") {
            self.simulated_seed = seed;
        }
        Ok(self)
    }

    /// Check invariants that would otherwise surface deep inside an operation
    pub fn validate(&self) -> Result<()> {
        if self.rtmr_index as usize >= RTMR_COUNT {
            return Err(TeeError::InvalidParam(format!(
                "rtmr_index must be below {}, got {}",
                RTMR_COUNT, self.rtmr_index
            )));
        }
        if self.compose_command.is_empty() && !self.skip_launch {
            return Err(TeeError::InvalidParam("compose_command is empty".into()));
        }
        self.simulated_seed_bytes()?;
        Ok(())
    }

    /// Decode the simulated TD seed
    pub fn simulated_seed_bytes(&self) -> Result<[u8; 32]> {
        let raw = hex::decode(self.simulated_seed.trim_start_matches("0x"))
            .map_err(|e| TeeError::InvalidParam(format!("simulated_seed is not hex: {}", e)))?;
        raw.try_into()
            .map_err(|_| TeeError::InvalidParam("simulated_seed must be 32 bytes".into()))
    }

    /// Directory relative volume paths resolve against
    pub fn base_dir(&self) -> Result<PathBuf> {
        match &self.work_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir()
                .map_err(|e| TeeError::InvalidParam(format!("no current directory: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = ToolConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rtmr_index, 3);
        assert_eq!(config.backend, TeeBackend::Auto);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ToolConfig =
            serde_json::from_str(r#"{"backend": "simulated", "skip_launch": true}"#).unwrap();
        assert_eq!(config.backend, TeeBackend::Simulated);
        assert!(config.skip_launch);
        assert_eq!(config.compose_command, vec!["docker", "compose"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tdx-attest.json");
        let mut config = ToolConfig::default();
        config.rtmr_index = 2;
        config.save(&path).unwrap();

        let loaded = ToolConfig::load(&path).unwrap();
        assert_eq!(loaded.rtmr_index, 2);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TDX_ATTEST_BACKEND", "simulated"),
            ("TDX_ATTEST_RTMR", "2"),
            ("TDX_ATTEST_SKIP_LAUNCH", "1"),
        ]
        .into_iter()
        .collect();
        let config = ToolConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend, TeeBackend::Simulated);
        assert_eq!(config.rtmr_index, 2);
        assert!(config.skip_launch);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ToolConfig::default();
        config.rtmr_index = 4;
        assert!(matches!(config.validate(), Err(TeeError::InvalidParam(_))));

        let mut config = ToolConfig::default();
        config.simulated_seed = "abcd".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_seed_decodes() {
        let seed = ToolConfig::default().simulated_seed_bytes().unwrap();
        assert_eq!(&seed[..10], b"tdx-attest");
    }
}
