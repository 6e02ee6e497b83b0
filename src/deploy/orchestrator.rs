//! Measured deployment: hash volumes, extend the register, launch, quote
//!
//! The measurement is taken exactly once per `start_app` call. Only the launch
//! step is retried, always against the hash already extended into the register,
//! and a failed launch never rolls the measurement back.

use super::launcher::{AppLauncher, ComposeLauncher, LaunchError, NoopLauncher};
use crate::config::ToolConfig;
use crate::error::Result;
use crate::identity::KeyTool;
use crate::measure::{MeasurementRegister, Quote, QuoteGenerator, VolumeHasher};
use crate::tee::{open_device, Measurement, TeeDevice};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How far `start_app` got. Hashing or measurement failures are the `Err` arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    /// Measured and launched
    Success,
    /// Measured, but every launch attempt failed
    PartialSuccess,
}

/// Result of a measured start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOutcome {
    pub status: StartStatus,
    #[serde(with = "crate::serde_hex")]
    pub volumes_hash: Measurement,
    /// Register value right after the extension
    #[serde(with = "crate::serde_hex")]
    pub register_value: Measurement,
    pub rtmr_index: usize,
    /// Launch attempts made (at least 1)
    pub attempts: u32,
    pub quote: Option<Quote>,
    pub message: String,
}

impl StartOutcome {
    pub fn is_success(&self) -> bool {
        self.status == StartStatus::Success
    }
}

/// Composes volume hashing, register extension, launch and quoting
pub struct Orchestrator {
    hasher: VolumeHasher,
    register: MeasurementRegister,
    quotes: QuoteGenerator,
    keytool: KeyTool,
    launcher: Box<dyn AppLauncher>,
    retry_delay: Duration,
    quote_after_start: bool,
    bind_address: bool,
}

impl Orchestrator {
    /// Orchestrator over `device`, measuring into RTMR `rtmr_index`
    pub fn new(
        device: Arc<dyn TeeDevice>,
        rtmr_index: usize,
        base_dir: impl Into<PathBuf>,
        launcher: Box<dyn AppLauncher>,
    ) -> Result<Self> {
        Ok(Self {
            hasher: VolumeHasher::new(base_dir),
            register: MeasurementRegister::open(device.clone(), rtmr_index)?,
            quotes: QuoteGenerator::new(device.clone()),
            keytool: KeyTool::new(device),
            launcher,
            retry_delay: Duration::ZERO,
            quote_after_start: true,
            bind_address: false,
        })
    }

    /// Build everything from configuration
    pub fn open(config: &ToolConfig) -> Result<Self> {
        config.validate()?;
        let launcher: Box<dyn AppLauncher> = if config.skip_launch {
            Box::new(NoopLauncher)
        } else {
            Box::new(ComposeLauncher::new(config.compose_command.clone()))
        };
        let orchestrator = Self::new(
            open_device(config)?,
            config.rtmr_index as usize,
            config.base_dir()?,
            launcher,
        )?
        .with_retry_delay(Duration::from_millis(config.launch_retry_delay_ms))
        .with_quote_after_start(config.quote_after_start)
        .with_address_binding(config.bind_address_in_quote);

        log::info!(
            "Orchestrator ready: base={}, RTMR{}, launcher={}",
            orchestrator.hasher.base_dir().display(),
            orchestrator.register.index(),
            orchestrator.launcher.name()
        );
        Ok(orchestrator)
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_quote_after_start(mut self, enabled: bool) -> Self {
        self.quote_after_start = enabled;
        self
    }

    /// Whether quotes taken after `start_app` bind the enclave address
    pub fn with_address_binding(mut self, enabled: bool) -> Self {
        self.bind_address = enabled;
        self
    }

    pub fn register(&self) -> &MeasurementRegister {
        &self.register
    }

    pub fn hasher(&self) -> &VolumeHasher {
        &self.hasher
    }

    /// Measure the descriptor's volumes, then launch with up to `retry_count` retries
    pub fn start_app(&self, descriptor: &str, retry_count: u32) -> Result<StartOutcome> {
        let volumes_hash = self.hasher.hash_compose_volumes(descriptor)?;
        let register_value = self.register.extend(&volumes_hash)?;

        let max_attempts = retry_count.saturating_add(1);
        let mut attempts = 0;
        let mut last_error: Option<LaunchError> = None;
        while attempts < max_attempts {
            attempts += 1;
            match self.launcher.launch(descriptor, self.hasher.base_dir()) {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    log::warn!("Launch attempt {}/{} failed: {}", attempts, max_attempts, e);
                    last_error = Some(e);
                    if attempts < max_attempts && !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        let (status, mut message) = match &last_error {
            None => (
                StartStatus::Success,
                format!("application launched after {} attempt(s)", attempts),
            ),
            Some(e) => (
                StartStatus::PartialSuccess,
                format!(
                    "volumes measured into RTMR{} but launch failed after {} attempt(s): {}",
                    self.register.index(),
                    attempts,
                    e
                ),
            ),
        };

        let quote = if self.quote_after_start {
            match self.generate_quote(self.bind_address) {
                Ok(quote) => Some(quote),
                Err(e) => {
                    log::warn!("Quote after start failed: {}", e);
                    message.push_str(&format!("; quote unavailable: {}", e));
                    None
                }
            }
        } else {
            None
        };

        log::info!("Start finished: {:?}, {}", status, message);
        Ok(StartOutcome {
            status,
            volumes_hash,
            register_value,
            rtmr_index: self.register.index(),
            attempts,
            quote,
            message,
        })
    }

    /// Quote over the current register value, optionally binding the enclave address
    pub fn generate_quote(&self, with_address: bool) -> Result<Quote> {
        let address = if with_address {
            Some(self.keytool.address_only()?)
        } else {
            None
        };
        self.quotes.quote_register(&self.register, address.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TeeError;
    use crate::measure::chain;
    use crate::tee::{SimulatedTdx, TeeBackend, HASH_LEN};
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    const SAMPLE: &str = r#"
version: '3.8'
services:
  app:
    image: nginx:latest
    volumes:
      - ./web:/usr/share/nginx/html
      - ./config:/etc/nginx/conf.d
"#;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("web")).unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(
            dir.path().join("web/index.html"),
            "<html><body>Hello World</body></html>",
        )
        .unwrap();
        fs::write(dir.path().join("config/default.conf"), "server { listen 80; }").unwrap();
        dir
    }

    /// Fails the first `failures` launches, then succeeds
    struct FlakyLauncher {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl AppLauncher for FlakyLauncher {
        fn name(&self) -> &str {
            "flaky"
        }

        fn launch(&self, _descriptor: &str, _base_dir: &Path) -> std::result::Result<(), LaunchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(LaunchError::Other(format!("attempt {} refused", call + 1)))
            } else {
                Ok(())
            }
        }
    }

    fn orchestrator(dir: &Path, failures: u32) -> (Orchestrator, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let launcher = FlakyLauncher {
            failures,
            calls: calls.clone(),
        };
        let device = Arc::new(SimulatedTdx::new([9u8; 32]));
        let orchestrator = Orchestrator::new(device, 3, dir, Box::new(launcher)).unwrap();
        (orchestrator, calls)
    }

    #[test]
    fn test_start_app_success() {
        let dir = fixture();
        let expected = VolumeHasher::new(dir.path()).hash_compose_volumes(SAMPLE).unwrap();
        assert_eq!(expected.len(), HASH_LEN);

        let (orch, calls) = orchestrator(dir.path(), 0);
        let outcome = orch.start_app(SAMPLE, 3).unwrap();

        assert_eq!(outcome.status, StartStatus::Success);
        assert_eq!(outcome.volumes_hash, expected);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.register_value, chain(&[0u8; HASH_LEN], &expected));
        assert_eq!(orch.register().current_value(), outcome.register_value);

        let quote = outcome.quote.unwrap();
        assert_eq!(quote.backend, TeeBackend::Simulated);
        assert!(quote.binds(&outcome.register_value, None));
    }

    #[test]
    fn test_retries_use_one_measurement() {
        let dir = fixture();
        let (orch, calls) = orchestrator(dir.path(), 2);
        let outcome = orch.start_app(SAMPLE, 3).unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.register().extension_count(), 1);
    }

    #[test]
    fn test_exhausted_retries_are_partial_success() {
        let dir = fixture();
        let (orch, calls) = orchestrator(dir.path(), u32::MAX);
        let outcome = orch.start_app(SAMPLE, 2).unwrap();

        assert_eq!(outcome.status, StartStatus::PartialSuccess);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // measurement stands
        assert_eq!(orch.register().extension_count(), 1);
        assert_eq!(orch.register().current_value(), outcome.register_value);
        assert!(outcome.message.contains("launch failed"));
        assert!(outcome.quote.is_some());
    }

    #[test]
    fn test_zero_retries_is_single_attempt() {
        let dir = fixture();
        let (orch, calls) = orchestrator(dir.path(), 1);
        let outcome = orch.start_app(SAMPLE, 0).unwrap();
        assert_eq!(outcome.status, StartStatus::PartialSuccess);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hashing_failure_skips_extension_and_launch() {
        let dir = fixture();
        let (orch, calls) = orchestrator(dir.path(), 0);
        let err = orch
            .start_app("services:\n  app:\n    image: nginx\n", 3)
            .unwrap_err();

        assert!(matches!(err, TeeError::Crypto(_)));
        assert_eq!(orch.register().extension_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_each_start_extends_once() {
        let dir = fixture();
        let (orch, _) = orchestrator(dir.path(), 0);
        let first = orch.start_app(SAMPLE, 0).unwrap();
        let second = orch.start_app(SAMPLE, 0).unwrap();
        assert_eq!(first.volumes_hash, second.volumes_hash);
        assert_eq!(
            second.register_value,
            chain(&first.register_value, &second.volumes_hash)
        );
        assert_eq!(orch.register().extension_count(), 2);
    }

    #[test]
    fn test_quote_with_address() {
        let dir = fixture();
        let device = Arc::new(SimulatedTdx::new([9u8; 32]));
        let address = KeyTool::new(device.clone()).address_only().unwrap();
        let orch = Orchestrator::new(device, 3, dir.path(), Box::new(NoopLauncher))
            .unwrap()
            .with_address_binding(true);

        let outcome = orch.start_app(SAMPLE, 0).unwrap();
        let quote = outcome.quote.unwrap();
        assert!(quote.binds(&outcome.register_value, Some(&address)));
        assert!(!quote.binds(&outcome.register_value, None));
    }

    #[test]
    fn test_open_from_config() {
        let dir = fixture();
        let mut config = ToolConfig::default();
        config.backend = TeeBackend::Simulated;
        config.skip_launch = true;
        config.quote_after_start = false;
        config.rtmr_index = 2;
        config.work_dir = Some(dir.path().to_path_buf());

        let orch = Orchestrator::open(&config).unwrap();
        assert_eq!(orch.register().index(), 2);
        let outcome = orch.start_app(SAMPLE, 0).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.rtmr_index, 2);
        assert!(outcome.quote.is_none());
    }

    #[test]
    fn test_outcome_serializes() {
        let dir = fixture();
        let (orch, _) = orchestrator(dir.path(), 0);
        let outcome = orch.start_app(SAMPLE, 0).unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(
            json["volumes_hash"],
            format!("0x{}", hex::encode(outcome.volumes_hash))
        );
    }
}
