//! Signal Processor (C3).
//!
//! Elevates analyzer `Peak`s to classified `SignalDetection`s, coalesces them into an active-set
//! map, and maintains a bounded per-frequency rolling database. Grounded on the teacher's
//! `FusionEngine` (owns state, exposes a processing entry point returning `Option<_>`) with the
//! z-score gate replaced by an SNR gate and the classifier swapped for the band table.

use crate::analyzer::Peak;
use crate::bands::{classify_signal, Classification};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

const DEFAULT_MIN_SNR_DB: f64 = 6.0;
const FREQUENCY_TOLERANCE_HZ: u64 = 10_000;
const SIGNAL_TIMEOUT_SECS: i64 = 30;
const DATABASE_CAP: usize = 1000;
const DATABASE_EVICT_TO: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Internal,
    External,
}

#[derive(Debug, Clone)]
pub struct SignalDetection {
    pub frequency_hz: u64,
    pub power_db: f64,
    pub bandwidth_hz: u64,
    pub modulation: Option<String>,
    pub noise_floor_db: f64,
    pub snr_db: f64,
    pub classification: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub source: DetectionSource,
    /// Populated by the external bridge (C10) for Wi-Fi device updates; `None` for internal
    /// sweep-derived detections, which have no device identity to report.
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    pub frequency_hz: u64,
    pub last_seen: DateTime<Utc>,
    pub avg_power_db: f64,
    pub max_power_db: f64,
    pub occurrences: u64,
    pub classification: String,
    pub confidence: f64,
    pub source: DetectionSource,
    pub mac: Option<String>,
}

pub struct ProcessorConfig {
    pub min_snr_db: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { min_snr_db: DEFAULT_MIN_SNR_DB }
    }
}

/// Owned exclusively by the analysis task. `activeSignals` and the per-frequency database are
/// both keyed by frequency rounded to the nearest Hz, per spec.
pub struct SignalProcessor {
    config: ProcessorConfig,
    active: HashMap<u64, SignalRecord>,
    database: HashMap<u64, SignalRecord>,
}

impl SignalProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config, active: HashMap::new(), database: HashMap::new() }
    }

    pub fn active_signals(&self) -> impl Iterator<Item = &SignalRecord> {
        self.active.values()
    }

    pub fn database_len(&self) -> usize {
        self.database.len()
    }

    /// Immutable snapshot of the rolling database, for the REST export endpoint (§6).
    pub fn database_snapshot(&self) -> Vec<SignalRecord> {
        self.database.values().cloned().collect()
    }

    /// `processSignal(peak, noiseFloor)`. Returns `None` if the SNR gate isn't cleared.
    pub fn process_signal(&mut self, peak: &Peak, noise_floor_db: f64) -> Option<SignalDetection> {
        let snr = peak.power_db - noise_floor_db;
        if snr < self.config.min_snr_db {
            return None;
        }
        let Classification { label, confidence } =
            classify_signal(peak.frequency_hz, peak.bandwidth_hz, None);

        let detection = SignalDetection {
            frequency_hz: peak.frequency_hz,
            power_db: peak.power_db,
            bandwidth_hz: peak.bandwidth_hz,
            modulation: None,
            noise_floor_db,
            snr_db: snr,
            classification: label,
            confidence,
            timestamp: peak.detected_at,
            source: DetectionSource::Internal,
            mac: None,
        };
        self.ingest_detection(&detection);
        Some(detection)
    }

    /// Entry point used by the external bridge (C10); keeps the two call paths symmetric so
    /// internal and external detections share coalescing/eviction logic.
    pub fn ingest_external(&mut self, detection: &SignalDetection) {
        self.ingest_detection(detection);
    }

    fn ingest_detection(&mut self, detection: &SignalDetection) {
        self.purge_expired(detection.timestamp);

        let key = self.coalesce_key(detection.frequency_hz, detection.source);
        self.active
            .entry(key)
            .and_modify(|existing| merge_newer(existing, detection))
            .or_insert_with(|| record_from(detection));

        self.database
            .entry(key)
            .and_modify(|existing| update_database_record(existing, detection))
            .or_insert_with(|| record_from(detection));

        if self.database.len() > DATABASE_CAP {
            self.evict_oldest();
        }
    }

    /// Detections within `FREQUENCY_TOLERANCE_HZ` of an existing key merge into it; externals
    /// never merge into an internal key's classification (see the processor module doc), so
    /// they get their own key space by offsetting the rounded frequency by one tolerance unit.
    fn coalesce_key(&self, frequency_hz: u64, source: DetectionSource) -> u64 {
        let rounded = (frequency_hz / FREQUENCY_TOLERANCE_HZ) * FREQUENCY_TOLERANCE_HZ;
        match source {
            DetectionSource::Internal => rounded,
            DetectionSource::External => rounded | 1,
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.active.retain(|_, record| {
            (now - record.last_seen).num_seconds() < SIGNAL_TIMEOUT_SECS
        });
    }

    fn evict_oldest(&mut self) {
        let mut entries: Vec<(u64, DateTime<Utc>)> =
            self.database.iter().map(|(k, v)| (*k, v.last_seen)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        let keep: std::collections::HashSet<u64> =
            entries.into_iter().take(DATABASE_EVICT_TO).map(|(k, _)| k).collect();
        self.database.retain(|k, _| keep.contains(k));
    }
}

fn record_from(detection: &SignalDetection) -> SignalRecord {
    SignalRecord {
        frequency_hz: detection.frequency_hz,
        last_seen: detection.timestamp,
        avg_power_db: detection.power_db,
        max_power_db: detection.power_db,
        occurrences: 1,
        classification: detection.classification.clone(),
        confidence: detection.confidence,
        source: detection.source,
        mac: detection.mac.clone(),
    }
}

fn merge_newer(existing: &mut SignalRecord, detection: &SignalDetection) {
    existing.frequency_hz = detection.frequency_hz;
    existing.last_seen = detection.timestamp;
    if detection.mac.is_some() {
        existing.mac = detection.mac.clone();
    }
    if detection.confidence > existing.confidence {
        existing.classification = detection.classification.clone();
        existing.confidence = detection.confidence;
    }
}

fn update_database_record(existing: &mut SignalRecord, detection: &SignalDetection) {
    existing.last_seen = detection.timestamp;
    existing.occurrences += 1;
    existing.avg_power_db =
        existing.avg_power_db + (detection.power_db - existing.avg_power_db) / existing.occurrences as f64;
    existing.max_power_db = existing.max_power_db.max(detection.power_db);
    if detection.mac.is_some() {
        existing.mac = detection.mac.clone();
    }
    if detection.confidence > existing.confidence {
        existing.classification = detection.classification.clone();
        existing.confidence = detection.confidence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(freq: u64, power: f64) -> Peak {
        Peak { frequency_hz: freq, power_db: power, bandwidth_hz: 200_000, detected_at: Utc::now() }
    }

    #[test]
    fn below_min_snr_is_gated_out() {
        let mut processor = SignalProcessor::new(ProcessorConfig::default());
        let p = peak(100_000_000, -94.0);
        assert!(processor.process_signal(&p, -90.0).is_none());
    }

    #[test]
    fn at_or_above_min_snr_produces_detection_with_positive_confidence() {
        let mut processor = SignalProcessor::new(ProcessorConfig::default());
        let p = peak(100_000_000, -80.0);
        let detection = processor.process_signal(&p, -90.0).unwrap();
        assert!(detection.snr_db >= DEFAULT_MIN_SNR_DB);
        assert!(detection.confidence > 0.0);
    }

    #[test]
    fn database_cap_is_enforced_by_eviction() {
        let mut processor = SignalProcessor::new(ProcessorConfig::default());
        for i in 0..1100u64 {
            let p = peak(1_000_000_000 + i * 50_000, -80.0);
            processor.process_signal(&p, -95.0);
        }
        assert!(processor.database_len() <= DATABASE_CAP);
    }

    #[test]
    fn external_detection_does_not_overwrite_internal_classification() {
        let mut processor = SignalProcessor::new(ProcessorConfig::default());
        let internal = peak(2_450_000_000, -80.0);
        processor.process_signal(&internal, -95.0).unwrap();

        let external = SignalDetection {
            frequency_hz: 2_450_000_000,
            power_db: -40.0,
            bandwidth_hz: 0,
            modulation: None,
            noise_floor_db: -95.0,
            snr_db: 55.0,
            classification: "Wi-Fi device".to_string(),
            confidence: 1.0,
            timestamp: Utc::now(),
            source: DetectionSource::External,
            mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
        };
        processor.ingest_external(&external);

        let internal_key = (2_450_000_000u64 / FREQUENCY_TOLERANCE_HZ) * FREQUENCY_TOLERANCE_HZ;
        let internal_record = processor.database.get(&internal_key).unwrap();
        assert_ne!(internal_record.classification, "Wi-Fi device");
    }
}
