//! Shared data model for the sweep pipeline's device-facing boundary.
//!
//! [`SpectrumFrame`] is produced by the stream parser ([`crate::parser`]) and consumed
//! downstream by the analyzer and the push layer; [`ErrorKind`] is the taxonomy shared by
//! the error tracker (here) and the recovery supervisor (in `sweep-analysis`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One parsed sweep line, validated against the rules in the stream parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumFrame {
    pub timestamp: DateTime<Utc>,
    pub start_freq_hz: u64,
    pub stop_freq_hz: u64,
    pub bin_hz: u64,
    pub powers: Vec<f64>,
    pub sweep_generation: u64,
}

impl SpectrumFrame {
    /// Center frequency, `(start + stop) / 2`.
    pub fn center_freq_hz(&self) -> u64 {
        (self.start_freq_hz + self.stop_freq_hz) / 2
    }

    pub fn sample_count(&self) -> usize {
        self.powers.len()
    }

    pub fn min_power(&self) -> f64 {
        self.powers.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    pub fn max_power(&self) -> f64 {
        self.powers.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn avg_power(&self) -> f64 {
        self.powers.iter().sum::<f64>() / self.powers.len() as f64
    }

    /// Frequency in Hz of the sample at `index`, assuming samples are evenly spaced across
    /// `[start_freq_hz, stop_freq_hz]`.
    pub fn freq_at(&self, index: usize) -> u64 {
        self.start_freq_hz + (index as u64) * self.bin_hz
    }
}

/// A line that failed validation; never fatal, always reported as a counter.
#[derive(Debug, Clone)]
pub struct InvalidLine {
    pub raw: String,
    pub reason: String,
}

/// A line matching one of the recognized informational/error prefixes (spec §4.1 supplement),
/// forwarded to the error tracker and recovery supervisor instead of the analyzer.
#[derive(Debug, Clone)]
pub struct NonDataLine {
    pub raw: String,
}

/// Outcome of feeding one line through the stream parser.
#[derive(Debug, Clone)]
pub enum ParsedLine {
    Frame(SpectrumFrame),
    Invalid(InvalidLine),
    NonData(NonDataLine),
}

/// Error taxonomy shared across the parser, controller, error tracker and recovery supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    DeviceBusy,
    PermissionDenied,
    DeviceNotFound,
    UsbError,
    ParseError,
    StreamStale,
    SubscriberLagged,
    RecoveryTimeout,
    CircuitOpen,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceBusy => "device_busy",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::DeviceNotFound => "device_not_found",
            ErrorKind::UsbError => "usb_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::StreamStale => "stream_stale",
            ErrorKind::SubscriberLagged => "subscriber_lagged",
            ErrorKind::RecoveryTimeout => "recovery_timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}
