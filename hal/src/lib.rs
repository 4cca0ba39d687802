//! Hardware abstraction layer for the sweep backend.
//!
//! Owns everything that talks directly to the sweeper child process: spawning and supervising
//! it ([`process`]), turning its stdout into validated [`model::SpectrumFrame`]s ([`parser`]),
//! advancing the frequency plan on a timer ([`cycler`]), classifying its stderr chatter into
//! actionable verdicts ([`errors`]), and tying all of the above into the sweep controller's
//! state machine ([`controller`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use sweep_hal::{SweepController, SweepControllerConfig, ControllerCommand};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let controller = SweepController::new(
//!         SweepControllerConfig::default().parser,
//!         SweepControllerConfig::default().stale_timeout,
//!         SweepControllerConfig::default().tstop,
//!     );
//!     let (cmd_tx, cmd_rx) = mpsc::channel(16);
//!     let (frame_tx, mut frame_rx) = mpsc::channel(256);
//!     let (event_tx, mut event_rx) = mpsc::channel(64);
//!
//!     tokio::spawn(controller.run(cmd_rx, frame_tx, event_tx));
//!     drop(cmd_tx);
//!     while frame_rx.recv().await.is_some() {}
//!     while event_rx.recv().await.is_some() {}
//! }
//! ```

pub mod controller;
pub mod cycler;
pub mod errors;
pub mod model;
pub mod parser;
pub mod process;

pub use controller::{ControllerCommand, ControllerEvent, ControllerState, SweepController, SweepControllerConfig};
pub use cycler::{normalize_frequencies, CyclerEvent, FrequencyCycler, FrequencyPlan, FrequencyTarget};
pub use errors::{DeviceStatus, ErrorTracker, ErrorTrackerConfig, ErrorVerdict};
pub use model::{ErrorKind, InvalidLine, NonDataLine, ParsedLine, Severity, SpectrumFrame};
pub use process::{SweepProcessConfig, SweepProcessHandle};

/// Errors raised by the process-supervision boundary of this crate. Analysis-level and
/// transport-level errors live in their own crates; this one stays scoped to "the child process
/// would not start, or its pipes were not where we expected them."
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("failed to spawn or control sweeper process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("sweeper process missing expected pipe: {0}")]
    MissingPipe(&'static str),
}
