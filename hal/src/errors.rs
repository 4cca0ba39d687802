//! Error Tracker (C6).
//!
//! Classifies raw error text from the device-reader task (non-data lines plus synthesized
//! conditions like `device_stuck`), keeps rolling counters, and recommends whether the
//! controller should restart. Grounded on the teacher's `HalError` taxonomy (`hal/src/lib.rs`)
//! in spirit, generalized here to a classifier over free-text messages rather than a closed
//! Rust enum, since the sweeper's error vocabulary arrives as unstructured stderr text.

use crate::model::{ErrorKind, Severity};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const RECENT_WINDOW: Duration = Duration::from_secs(60);
const MAX_FAILURES_PER_MINUTE_DEFAULT: usize = 5;
const MAX_CONSECUTIVE_DEFAULT: u32 = 8;
const FREQ_BLACKLIST_THRESHOLD: u32 = 3;
const DEVICE_BUSY_RESTART_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Available,
    Busy,
    Stuck,
    Disconnected,
}

impl DeviceStatus {
    fn penalty(&self) -> f64 {
        match self {
            DeviceStatus::Available => 0.0,
            DeviceStatus::Busy => 20.0,
            DeviceStatus::Stuck => 30.0,
            DeviceStatus::Disconnected => 40.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorVerdict {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub recoverable: bool,
    pub requires_restart: bool,
    pub frequency_hz: Option<u64>,
    pub should_blacklist_frequency: bool,
}

pub struct ErrorTrackerConfig {
    pub max_consecutive: u32,
    pub max_failures_per_minute: usize,
}

impl Default for ErrorTrackerConfig {
    fn default() -> Self {
        Self {
            max_consecutive: MAX_CONSECUTIVE_DEFAULT,
            max_failures_per_minute: MAX_FAILURES_PER_MINUTE_DEFAULT,
        }
    }
}

/// Rolling error state. Owned by the analysis task; consulted every time a non-data line or a
/// synthetic condition (stuck stream) is observed.
pub struct ErrorTracker {
    config: ErrorTrackerConfig,
    consecutive: u32,
    consecutive_busy: u32,
    recent_failures: VecDeque<Instant>,
    per_frequency_errors: HashMap<u64, u32>,
    device_status: DeviceStatus,
}

impl ErrorTracker {
    pub fn new(config: ErrorTrackerConfig) -> Self {
        Self {
            config,
            consecutive: 0,
            consecutive_busy: 0,
            recent_failures: VecDeque::new(),
            per_frequency_errors: HashMap::new(),
            device_status: DeviceStatus::Available,
        }
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
        self.consecutive_busy = 0;
        self.recent_failures.clear();
        self.per_frequency_errors.clear();
        self.device_status = DeviceStatus::Available;
    }

    /// Classify `message` (already lowercased internally) and update counters. `frequency_hz` is
    /// the target the controller was on when the error was observed, if known.
    pub fn report(&mut self, message: &str, frequency_hz: Option<u64>) -> ErrorVerdict {
        let now = Instant::now();
        self.prune_recent(now);
        self.recent_failures.push_back(now);
        self.consecutive += 1;

        let lower = message.to_lowercase();
        let verdict = self.classify(&lower, frequency_hz);

        if verdict.kind != ErrorKind::DeviceBusy {
            self.consecutive_busy = 0;
        }

        if let Some(freq) = frequency_hz {
            *self.per_frequency_errors.entry(freq).or_insert(0) += 1;
        }

        self.device_status = match verdict.kind {
            ErrorKind::DeviceBusy => DeviceStatus::Busy,
            ErrorKind::DeviceNotFound | ErrorKind::UsbError => DeviceStatus::Disconnected,
            ErrorKind::StreamStale => DeviceStatus::Stuck,
            _ => self.device_status,
        };

        verdict
    }

    /// Called on any successful frame/recovery; resets the consecutive counters (not the
    /// per-frequency history, which is only cleared by `clear_frequency_errors`/`reset`).
    pub fn record_success(&mut self) {
        self.consecutive = 0;
        self.consecutive_busy = 0;
        self.device_status = DeviceStatus::Available;
    }

    fn prune_recent(&mut self, now: Instant) {
        while let Some(front) = self.recent_failures.front() {
            if now.duration_since(*front) > RECENT_WINDOW {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn classify(&mut self, lower: &str, frequency_hz: Option<u64>) -> ErrorVerdict {
        let freq_errors = frequency_hz
            .map(|f| *self.per_frequency_errors.get(&f).unwrap_or(&0) + 1)
            .unwrap_or(0);
        let should_blacklist = freq_errors >= FREQ_BLACKLIST_THRESHOLD;

        if lower.contains("resource busy") || lower.contains("device busy") {
            self.consecutive_busy += 1;
            return ErrorVerdict {
                kind: ErrorKind::DeviceBusy,
                severity: if self.consecutive_busy > 2 { Severity::High } else { Severity::Medium },
                recoverable: true,
                requires_restart: self.consecutive_busy > DEVICE_BUSY_RESTART_THRESHOLD,
                frequency_hz,
                should_blacklist_frequency: should_blacklist,
            };
        }

        if lower.contains("permission denied") || lower.contains("access denied") {
            return ErrorVerdict {
                kind: ErrorKind::PermissionDenied,
                severity: Severity::High,
                recoverable: false,
                requires_restart: false,
                frequency_hz,
                should_blacklist_frequency: should_blacklist,
            };
        }

        if lower.contains("no hackrf boards found")
            || lower.contains("hackrf_open() failed")
            || lower.contains("device not found")
        {
            return ErrorVerdict {
                kind: ErrorKind::DeviceNotFound,
                severity: Severity::Critical,
                recoverable: true,
                requires_restart: true,
                frequency_hz,
                should_blacklist_frequency: should_blacklist,
            };
        }

        if lower.contains("libusb") || lower.contains("usb error") || lower.contains("usb_open() failed") {
            return ErrorVerdict {
                kind: ErrorKind::UsbError,
                severity: Severity::High,
                recoverable: true,
                requires_restart: true,
                frequency_hz,
                should_blacklist_frequency: should_blacklist,
            };
        }

        let severity = if self.consecutive >= self.config.max_consecutive {
            Severity::Critical
        } else if self.consecutive >= self.config.max_consecutive / 2 {
            Severity::High
        } else {
            Severity::Medium
        };

        ErrorVerdict {
            kind: ErrorKind::Unknown,
            severity,
            recoverable: true,
            requires_restart: self.consecutive >= self.config.max_consecutive,
            frequency_hz,
            should_blacklist_frequency: should_blacklist,
        }
    }

    /// Health score in `[0, 100]` (spec §4.6).
    pub fn health_score(&self) -> f64 {
        let consecutive_term = 40.0 * (self.consecutive as f64 / self.config.max_consecutive as f64);
        let recent_term =
            30.0 * (self.recent_failures.len() as f64 / self.config.max_failures_per_minute as f64);
        let penalty = self.device_status.penalty();
        (100.0 - consecutive_term - recent_term - penalty).clamp(0.0, 100.0)
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.device_status
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_escalates_severity_with_consecutive_count() {
        let mut tracker = ErrorTracker::new(ErrorTrackerConfig::default());
        let v1 = tracker.report("Resource busy", None);
        assert_eq!(v1.severity, Severity::Medium);
        tracker.report("Resource busy", None);
        let v3 = tracker.report("Resource busy", None);
        assert_eq!(v3.severity, Severity::High);
        assert!(!v3.requires_restart);
    }

    #[test]
    fn device_busy_requires_restart_after_six_consecutive() {
        let mut tracker = ErrorTracker::new(ErrorTrackerConfig::default());
        let mut last = None;
        for _ in 0..6 {
            last = Some(tracker.report("resource busy", None));
        }
        assert!(last.unwrap().requires_restart);
    }

    #[test]
    fn permission_denied_is_not_recoverable() {
        let mut tracker = ErrorTracker::new(ErrorTrackerConfig::default());
        let v = tracker.report("Permission denied opening device", None);
        assert_eq!(v.kind, ErrorKind::PermissionDenied);
        assert!(!v.recoverable);
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn device_not_found_is_critical_and_requires_restart() {
        let mut tracker = ErrorTracker::new(ErrorTrackerConfig::default());
        let v = tracker.report("No HackRF boards found.", None);
        assert_eq!(v.kind, ErrorKind::DeviceNotFound);
        assert_eq!(v.severity, Severity::Critical);
        assert!(v.requires_restart);
    }

    #[test]
    fn frequency_blacklist_threshold_is_three() {
        let mut tracker = ErrorTracker::new(ErrorTrackerConfig::default());
        tracker.report("usb error", Some(100));
        tracker.report("usb error", Some(100));
        let v = tracker.report("usb error", Some(100));
        assert!(v.should_blacklist_frequency);
    }

    #[test]
    fn success_resets_consecutive_counters() {
        let mut tracker = ErrorTracker::new(ErrorTrackerConfig::default());
        tracker.report("resource busy", None);
        tracker.report("resource busy", None);
        tracker.record_success();
        assert_eq!(tracker.consecutive(), 0);
        assert_eq!(tracker.device_status(), DeviceStatus::Available);
    }
}
