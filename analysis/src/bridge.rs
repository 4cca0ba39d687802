//! External Signal Bridge (C10).
//!
//! Normalizes Kismet-style Wi-Fi device observations into the same [`SignalDetection`] shape C3
//! produces internally, so C4's time-window filter and C9's push layer don't need to know the
//! difference. No teacher module maps onto this external-ingest role directly; shaped after
//! `SignalProcessor::ingest_external` (`crate::processor`) and the per-key rate-limiting idiom in
//! `sweep_hal::errors::ErrorTracker`'s per-frequency counters, generalized here to per-MAC.

use crate::processor::{DetectionSource, SignalDetection};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const DEFAULT_MAX_HZ: f64 = 10.0;

/// One observation as received from the Kismet-style collector. Fields mirror the subset of a
/// Kismet device record this bridge actually consumes; anything else about the device (SSID
/// associations, GPS, etc.) is out of scope per spec §1.
#[derive(Debug, Clone)]
pub struct KismetDeviceUpdate {
    pub mac: String,
    pub frequency_hz: u64,
    /// Kismet's `signal.last_signal`, in dBm.
    pub last_signal_dbm: f64,
    pub timestamp: DateTime<Utc>,
}

const WIFI_CLASSIFICATION: &str = "Wi-Fi device";

struct RateState {
    window_start: DateTime<Utc>,
    count_in_window: u32,
}

/// Owned by the analysis task alongside C3/C4; feeds detections into both through the same
/// interfaces internal detections use (spec §4.10 / §9 open-question resolution: external
/// detections keep a distinct key space from internal ones, see `crate::processor`).
pub struct ExternalSignalBridge {
    max_hz: f64,
    per_mac: HashMap<String, RateState>,
}

impl ExternalSignalBridge {
    pub fn new(max_hz: f64) -> Self {
        Self { max_hz, per_mac: HashMap::new() }
    }

    /// Normalizes `update` into a [`SignalDetection`], or `None` if this MAC is over its rate
    /// limit for the current one-second window.
    pub fn normalize(&mut self, update: &KismetDeviceUpdate) -> Option<SignalDetection> {
        if !self.allow(&update.mac, update.timestamp) {
            return None;
        }

        Some(SignalDetection {
            frequency_hz: update.frequency_hz,
            power_db: update.last_signal_dbm,
            bandwidth_hz: 0,
            modulation: None,
            noise_floor_db: f64::NAN,
            snr_db: f64::NAN,
            classification: WIFI_CLASSIFICATION.to_string(),
            confidence: 1.0,
            timestamp: update.timestamp,
            source: DetectionSource::External,
            mac: Some(update.mac.clone()),
        })
    }

    fn allow(&mut self, mac: &str, now: DateTime<Utc>) -> bool {
        let state = self.per_mac.entry(mac.to_string()).or_insert(RateState {
            window_start: now,
            count_in_window: 0,
        });

        if (now - state.window_start).num_milliseconds() >= 1000 {
            state.window_start = now;
            state.count_in_window = 0;
        }

        if (state.count_in_window as f64) >= self.max_hz {
            return false;
        }
        state.count_in_window += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(mac: &str, t: DateTime<Utc>) -> KismetDeviceUpdate {
        KismetDeviceUpdate {
            mac: mac.to_string(),
            frequency_hz: 2_437_000_000,
            last_signal_dbm: -55.0,
            timestamp: t,
        }
    }

    #[test]
    fn normalizes_to_wifi_device_classification_with_full_confidence() {
        let mut bridge = ExternalSignalBridge::new(DEFAULT_MAX_HZ);
        let detection = bridge.normalize(&update("aa:bb:cc:dd:ee:ff", Utc::now())).unwrap();
        assert_eq!(detection.classification, "Wi-Fi device");
        assert_eq!(detection.confidence, 1.0);
        assert_eq!(detection.source, DetectionSource::External);
    }

    #[test]
    fn rate_limits_per_mac_at_ten_per_second() {
        let mut bridge = ExternalSignalBridge::new(10.0);
        let t0 = Utc::now();
        let mut accepted = 0;
        for _ in 0..15 {
            if bridge.normalize(&update("aa:bb:cc:dd:ee:ff", t0)).is_some() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
    }

    #[test]
    fn distinct_macs_are_rate_limited_independently() {
        let mut bridge = ExternalSignalBridge::new(1.0);
        let t0 = Utc::now();
        assert!(bridge.normalize(&update("aa:aa:aa:aa:aa:aa", t0)).is_some());
        assert!(bridge.normalize(&update("bb:bb:bb:bb:bb:bb", t0)).is_some());
    }

    #[test]
    fn window_resets_after_one_second() {
        let mut bridge = ExternalSignalBridge::new(1.0);
        let t0 = Utc::now();
        assert!(bridge.normalize(&update("aa:bb:cc:dd:ee:ff", t0)).is_some());
        assert!(bridge.normalize(&update("aa:bb:cc:dd:ee:ff", t0)).is_none());
        let t1 = t0 + chrono::Duration::milliseconds(1001);
        assert!(bridge.normalize(&update("aa:bb:cc:dd:ee:ff", t1)).is_some());
    }
}
