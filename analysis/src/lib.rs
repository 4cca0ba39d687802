//! Sweep Analysis Library
//!
//! Turns parsed spectrum frames into classified, time-windowed signal detections and drives
//! recovery and push delivery around the sweep device. Retains the teacher's crate-root shape
//! (module declarations plus a shared error enum wrapping the HAL's) while replacing every
//! paranormal-domain type with the RF pipeline's own.

pub mod analyzer;
pub mod bands;
pub mod bridge;
pub mod engine;
pub mod processor;
pub mod push;
pub mod recovery;
pub mod timewindow;

use sweep_hal::HalError;

/// Crate-wide error type. Analysis-specific failure modes sit alongside the HAL's so a single
/// `?` chain can flow from device I/O through analysis without a conversion at every call site.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
