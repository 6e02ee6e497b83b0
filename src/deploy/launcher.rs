//! Application launchers
//!
//! A launcher starts the application described by a compose descriptor. Launch
//! failures are retried by the orchestrator, so they carry their own error type
//! instead of the measurement taxonomy.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Why a launch attempt failed
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exited {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("launch failed: {0}")]
    Other(String),
}

/// Starts the application behind a deployment descriptor
pub trait AppLauncher: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Launch once; the orchestrator decides whether to try again
    fn launch(&self, descriptor: &str, base_dir: &Path) -> Result<(), LaunchError>;
}

/// Runs `<command…> -f - --project-directory <base> up -d` with the descriptor on stdin
#[derive(Debug, Clone)]
pub struct ComposeLauncher {
    command: Vec<String>,
}

impl ComposeLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    /// Full argument vector for one launch
    pub fn command_line(&self, base_dir: &Path) -> Vec<String> {
        let mut args = self.command.clone();
        args.extend([
            "-f".to_string(),
            "-".to_string(),
            "--project-directory".to_string(),
            base_dir.display().to_string(),
            "up".to_string(),
            "-d".to_string(),
        ]);
        args
    }
}

impl AppLauncher for ComposeLauncher {
    fn name(&self) -> &str {
        "compose"
    }

    fn launch(&self, descriptor: &str, base_dir: &Path) -> Result<(), LaunchError> {
        // checked before the fixed compose arguments are appended
        let program = self
            .command
            .first()
            .ok_or_else(|| LaunchError::Other("compose command is empty".into()))?;
        let args = self.command_line(base_dir);
        let rest = &args[1..];

        log::info!("Launching: {}", args.join(" "));
        let spawn_err = |source| LaunchError::Spawn {
            program: program.clone(),
            source,
        };

        let mut child = Command::new(program)
            .args(rest)
            .current_dir(base_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(descriptor.as_bytes()).map_err(spawn_err)?;
        }
        let output = child.wait_with_output().map_err(spawn_err)?;

        if !output.status.success() {
            return Err(LaunchError::Exited {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        log::debug!("{}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    }
}

/// Measure-only mode: launching always succeeds and does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLauncher;

impl AppLauncher for NoopLauncher {
    fn name(&self) -> &str {
        "noop"
    }

    fn launch(&self, _descriptor: &str, base_dir: &Path) -> Result<(), LaunchError> {
        log::info!("Launch skipped for {}", base_dir.display());
        Ok(())
    }
}
