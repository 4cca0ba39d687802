//! Sweep Analyzer (C2).
//!
//! Turns each validated `SpectrumFrame` into a noise floor, a set of `Peak`s, and aggregate
//! stats, and keeps a bounded waterfall history. Grounded on the teacher's `FusionEngine` shape
//! (config struct + stateful engine + `with_*`-free plain structs) from `sensors/src/fusion.rs`,
//! with the statistics replaced by spectral peak-finding instead of z-score baselines.

use std::collections::VecDeque;
use std::time::Instant;
use sweep_hal::SpectrumFrame;

const MAX_HISTORY_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub peak_threshold_db: f64,
    pub min_bandwidth_hz: u64,
    pub noise_floor_percentile: f64,
    pub smoothing_factor: f64,
    pub smoothing_enabled: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            peak_threshold_db: 10.0,
            min_bandwidth_hz: 25_000,
            noise_floor_percentile: 20.0,
            smoothing_factor: 0.30,
            smoothing_enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Peak {
    pub frequency_hz: u64,
    pub power_db: f64,
    pub bandwidth_hz: u64,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

/// Outputs of a single `analyze` call, mirroring what subscribers see via C9.
#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    pub peaks: Vec<Peak>,
    pub noise_floor_db: f64,
    pub avg_power_db: f64,
    pub max_power_db: f64,
    pub min_power_db: f64,
    pub signal_count: usize,
    pub frequency_range_hz: (u64, u64),
    pub last_analysis: Instant,
}

/// Stateful per-sweep analyzer. Owned by the analysis task; one instance for the life of the
/// service (the waterfall spans sweep generations intentionally, so operators can see history
/// across a restart).
pub struct SweepAnalyzer {
    config: AnalyzerConfig,
    waterfall: VecDeque<Vec<f64>>,
}

impl SweepAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config, waterfall: VecDeque::with_capacity(MAX_HISTORY_SIZE) }
    }

    pub fn waterfall(&self) -> &VecDeque<Vec<f64>> {
        &self.waterfall
    }

    pub fn analyze(&mut self, frame: &SpectrumFrame) -> AnalysisSummary {
        let powers = if self.config.smoothing_enabled {
            smooth(&frame.powers, self.config.smoothing_factor)
        } else {
            frame.powers.clone()
        };

        let noise_floor = percentile(&powers, self.config.noise_floor_percentile);
        let peaks = detect_peaks(
            frame,
            &powers,
            noise_floor,
            self.config.peak_threshold_db,
            self.config.min_bandwidth_hz,
        );

        self.push_waterfall_row(powers.clone());

        AnalysisSummary {
            peaks,
            noise_floor_db: noise_floor,
            avg_power_db: frame.avg_power(),
            max_power_db: frame.max_power(),
            min_power_db: frame.min_power(),
            signal_count: powers.len(),
            frequency_range_hz: (frame.start_freq_hz, frame.stop_freq_hz),
            last_analysis: Instant::now(),
        }
    }

    fn push_waterfall_row(&mut self, row: Vec<f64>) {
        if self.waterfall.len() >= MAX_HISTORY_SIZE {
            self.waterfall.pop_front();
        }
        self.waterfall.push_back(row);
    }
}

/// `y[i] = (1-f)x[i] + (f/2)(x[i-1]+x[i+1])`; endpoints are left untouched.
fn smooth(powers: &[f64], factor: f64) -> Vec<f64> {
    if powers.len() < 3 {
        return powers.to_vec();
    }
    let mut out = powers.to_vec();
    for i in 1..powers.len() - 1 {
        out[i] = (1.0 - factor) * powers[i] + (factor / 2.0) * (powers[i - 1] + powers[i + 1]);
    }
    out
}

fn percentile(powers: &[f64], pct: f64) -> f64 {
    if powers.is_empty() {
        return f64::NEG_INFINITY;
    }
    let mut sorted = powers.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

fn detect_peaks(
    frame: &SpectrumFrame,
    powers: &[f64],
    noise_floor: f64,
    threshold_db: f64,
    min_bandwidth_hz: u64,
) -> Vec<Peak> {
    let cutoff = noise_floor + threshold_db;
    let mut peaks = Vec::new();
    let mut region_start: Option<usize> = None;

    for (i, &p) in powers.iter().enumerate() {
        let above = p > cutoff;
        match (above, region_start) {
            (true, None) => region_start = Some(i),
            (false, Some(start)) => {
                emit_peak_if_wide_enough(frame, powers, start, i, min_bandwidth_hz, &mut peaks);
                region_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = region_start {
        emit_peak_if_wide_enough(frame, powers, start, powers.len(), min_bandwidth_hz, &mut peaks);
    }
    peaks
}

fn emit_peak_if_wide_enough(
    frame: &SpectrumFrame,
    powers: &[f64],
    start: usize,
    end: usize,
    min_bandwidth_hz: u64,
    peaks: &mut Vec<Peak>,
) {
    let bandwidth_hz = (end - start) as u64 * frame.bin_hz;
    if bandwidth_hz < min_bandwidth_hz {
        return;
    }
    let (argmax_idx, &argmax_power) = powers[start..end]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, p)| (start + i, p))
        .unwrap();
    peaks.push(Peak {
        frequency_hz: frame.freq_at(argmax_idx),
        power_db: argmax_power,
        bandwidth_hz,
        detected_at: frame.timestamp,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(powers: Vec<f64>) -> SpectrumFrame {
        SpectrumFrame {
            timestamp: Utc::now(),
            start_freq_hz: 2_400_000_000,
            stop_freq_hz: 2_500_000_000,
            bin_hz: 100_000,
            powers,
            sweep_generation: 1,
        }
    }

    #[test]
    fn s1_clean_parse_one_peak_at_third_bin() {
        let mut analyzer = SweepAnalyzer::new(AnalyzerConfig {
            peak_threshold_db: 10.0,
            noise_floor_percentile: 25.0,
            min_bandwidth_hz: 0,
            ..AnalyzerConfig::default()
        });
        let f = frame(vec![-80.0, -79.0, -40.0, -78.0]);
        let summary = analyzer.analyze(&f);
        assert_eq!(summary.peaks.len(), 1);
        assert_eq!(summary.peaks[0].power_db, -40.0);
    }

    #[test]
    fn single_sample_never_yields_a_peak_since_noise_floor_is_the_sample_itself() {
        // With one sample, the noise floor (any percentile of a 1-element slice) equals that
        // sample, so `p > noiseFloor + peakThreshold` can never hold: a lone sample can never
        // exceed itself plus a positive threshold. Spec §8's "at most one peak" bound is met
        // trivially by zero.
        let mut analyzer = SweepAnalyzer::new(AnalyzerConfig {
            peak_threshold_db: 1.0,
            noise_floor_percentile: 0.0,
            min_bandwidth_hz: 0,
            ..AnalyzerConfig::default()
        });
        let f = frame(vec![-20.0]);
        let summary = analyzer.analyze(&f);
        assert_eq!(summary.peaks.len(), 0);
    }

    #[test]
    fn peaks_below_min_bandwidth_are_dropped() {
        let mut analyzer = SweepAnalyzer::new(AnalyzerConfig {
            peak_threshold_db: 5.0,
            noise_floor_percentile: 50.0,
            min_bandwidth_hz: 1_000_000,
            ..AnalyzerConfig::default()
        });
        let f = frame(vec![-90.0, -90.0, -30.0, -90.0, -90.0]);
        let summary = analyzer.analyze(&f);
        assert!(summary.peaks.is_empty());
    }

    #[test]
    fn waterfall_caps_at_one_hundred_frames() {
        let mut analyzer = SweepAnalyzer::new(AnalyzerConfig::default());
        for _ in 0..150 {
            analyzer.analyze(&frame(vec![-80.0, -79.0, -78.0]));
        }
        assert_eq!(analyzer.waterfall().len(), MAX_HISTORY_SIZE);
    }

    #[test]
    fn smoothing_preserves_endpoints() {
        let smoothed = smooth(&[-80.0, -20.0, -80.0, -20.0, -80.0], 0.5);
        assert_eq!(smoothed[0], -80.0);
        assert_eq!(smoothed[4], -80.0);
        assert!(smoothed[1] > -50.0);
    }
}
