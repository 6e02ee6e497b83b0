//! Deploy: "start app with measured volumes"
//!
//! - **Orchestrator**: volumes hash → RTMR extension → launch (retried) → quote
//! - **Launcher**: compose launcher and the measure-only no-op launcher

pub mod launcher;
pub mod orchestrator;

pub use launcher::{AppLauncher, ComposeLauncher, LaunchError, NoopLauncher};
pub use orchestrator::{Orchestrator, StartOutcome, StartStatus};
