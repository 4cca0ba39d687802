//! Band pattern table used by the Signal Processor's classifier (C3).
//!
//! A static list of known allocations, each checked against a detection's frequency, bandwidth,
//! and (optional) modulation hint. First-match order in this table is also the tie-break order
//! for equal-confidence classifications, per spec.

/// One frequency range, inclusive on both ends, in Hz.
#[derive(Debug, Clone, Copy)]
pub struct FreqRange {
    pub low_hz: u64,
    pub high_hz: u64,
}

#[derive(Debug, Clone)]
pub struct BandPattern {
    pub label: &'static str,
    pub ranges: &'static [FreqRange],
    pub typical_bandwidth_hz: Option<u64>,
    pub modulation: Option<&'static str>,
}

impl BandPattern {
    fn in_band(&self, freq_hz: u64) -> bool {
        self.ranges.iter().any(|r| freq_hz >= r.low_hz && freq_hz <= r.high_hz)
    }
}

pub const BAND_TABLE: &[BandPattern] = &[
    BandPattern {
        label: "FM Broadcast",
        ranges: &[FreqRange { low_hz: 87_500_000, high_hz: 108_000_000 }],
        typical_bandwidth_hz: Some(200_000),
        modulation: Some("FM"),
    },
    BandPattern {
        label: "Aviation",
        ranges: &[FreqRange { low_hz: 108_000_000, high_hz: 137_000_000 }],
        typical_bandwidth_hz: Some(25_000),
        modulation: Some("AM"),
    },
    BandPattern {
        label: "Amateur 2m",
        ranges: &[FreqRange { low_hz: 144_000_000, high_hz: 148_000_000 }],
        typical_bandwidth_hz: Some(16_000),
        modulation: None,
    },
    BandPattern {
        label: "Amateur 70cm",
        ranges: &[FreqRange { low_hz: 420_000_000, high_hz: 450_000_000 }],
        typical_bandwidth_hz: Some(25_000),
        modulation: None,
    },
    BandPattern {
        label: "Public Safety",
        ranges: &[FreqRange { low_hz: 450_000_000, high_hz: 470_000_000 }],
        typical_bandwidth_hz: Some(25_000),
        modulation: Some("FM"),
    },
    BandPattern {
        label: "Marine VHF",
        ranges: &[FreqRange { low_hz: 156_000_000, high_hz: 162_000_000 }],
        typical_bandwidth_hz: Some(25_000),
        modulation: Some("FM"),
    },
    BandPattern {
        label: "GSM Uplink 900",
        ranges: &[FreqRange { low_hz: 880_000_000, high_hz: 915_000_000 }],
        typical_bandwidth_hz: Some(200_000),
        modulation: None,
    },
    BandPattern {
        label: "GSM Downlink 900",
        ranges: &[FreqRange { low_hz: 925_000_000, high_hz: 960_000_000 }],
        typical_bandwidth_hz: Some(200_000),
        modulation: None,
    },
    BandPattern {
        label: "GSM Uplink 1800",
        ranges: &[FreqRange { low_hz: 1_710_000_000, high_hz: 1_785_000_000 }],
        typical_bandwidth_hz: Some(200_000),
        modulation: None,
    },
    BandPattern {
        label: "GSM Downlink 1800",
        ranges: &[FreqRange { low_hz: 1_805_000_000, high_hz: 1_880_000_000 }],
        typical_bandwidth_hz: Some(200_000),
        modulation: None,
    },
    BandPattern {
        label: "Wi-Fi 2.4GHz",
        ranges: &[FreqRange { low_hz: 2_400_000_000, high_hz: 2_483_500_000 }],
        typical_bandwidth_hz: Some(20_000_000),
        modulation: Some("OFDM"),
    },
    BandPattern {
        label: "Wi-Fi 5GHz",
        ranges: &[FreqRange { low_hz: 5_150_000_000, high_hz: 5_895_000_000 }],
        typical_bandwidth_hz: Some(20_000_000),
        modulation: Some("OFDM"),
    },
];

const CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

/// `classifySignal`: best-scoring band wins; falls back to a generic HF/VHF/UHF/SHF/EHF tag
/// when no band clears `CONFIDENCE_THRESHOLD`.
pub fn classify_signal(frequency_hz: u64, bandwidth_hz: u64, modulation: Option<&str>) -> Classification {
    let mut best: Option<(usize, f64)> = None;

    for (idx, band) in BAND_TABLE.iter().enumerate() {
        let mut checks = 1;
        let mut matches = if band.in_band(frequency_hz) { 1 } else { 0 };

        if let Some(typical) = band.typical_bandwidth_hz {
            checks += 1;
            let tolerance = typical as f64 * 0.2;
            if (bandwidth_hz as f64 - typical as f64).abs() <= tolerance {
                matches += 1;
            }
        }
        if let (Some(band_mod), Some(detected_mod)) = (band.modulation, modulation) {
            checks += 1;
            if detected_mod == band_mod {
                matches += 1;
            }
        }

        let confidence = matches as f64 / checks as f64;
        let better = match best {
            None => true,
            Some((_, best_conf)) => confidence > best_conf,
        };
        if better {
            best = Some((idx, confidence));
        }
    }

    if let Some((idx, confidence)) = best {
        if confidence >= CONFIDENCE_THRESHOLD {
            return Classification { label: BAND_TABLE[idx].label.to_string(), confidence };
        }
    }

    generic_band_tag(frequency_hz)
}

fn generic_band_tag(frequency_hz: u64) -> Classification {
    let label = if frequency_hz < 30_000_000 {
        "HF"
    } else if frequency_hz < 300_000_000 {
        "VHF"
    } else if frequency_hz < 3_000_000_000 {
        "UHF"
    } else if frequency_hz < 30_000_000_000 {
        "SHF"
    } else {
        "EHF"
    };
    Classification { label: label.to_string(), confidence: 0.5 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fm_broadcast_frequency_and_bandwidth_match() {
        let c = classify_signal(100_000_000, 200_000, Some("FM"));
        assert_eq!(c.label, "FM Broadcast");
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn unclassifiable_frequency_falls_back_to_generic_band() {
        let c = classify_signal(10_000_000_000, 500_000, None);
        assert_eq!(c.label, "SHF");
        assert_eq!(c.confidence, 0.5);
    }

    #[test]
    fn low_frequency_falls_back_to_hf() {
        let c = classify_signal(5_000_000, 1000, None);
        assert_eq!(c.label, "HF");
    }

    #[test]
    fn wifi_2_4ghz_band_matches_on_frequency_alone() {
        let c = classify_signal(2_437_000_000, 22_000_000, None);
        assert_eq!(c.label, "Wi-Fi 2.4GHz");
        assert!(c.confidence >= CONFIDENCE_THRESHOLD);
    }
}
