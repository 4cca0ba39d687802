//! Buffer/Stream Parser (C1).
//!
//! Turns a raw byte stream from the sweeper child process into validated [`SpectrumFrame`]s.
//! Modeled on the teacher's device-facing structs (construct-then-feed, never fatal on bad
//! input) rather than on any particular parser crate — the grammar here is a handful of
//! comma-separated fields, not worth pulling in a combinator library for.

use crate::model::{InvalidLine, NonDataLine, ParsedLine, SpectrumFrame};
use chrono::{NaiveDateTime, TimeZone, Utc};

const MIN_POWER_DB: f64 = -150.0;
const MAX_POWER_DB: f64 = 50.0;
const MIN_FIELDS: usize = 5;

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub max_buffer_size: usize,
    pub max_line_length: usize,
    pub overflow_threshold: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 1024 * 1024,
            max_line_length: 10_000,
            overflow_threshold: 5,
        }
    }
}

/// Stateful line-buffering parser. Owned exclusively by the device-reader task.
pub struct StreamParser {
    config: ParserConfig,
    buffer: Vec<u8>,
    overflow_count: u64,
    sweep_generation: u64,
}

impl StreamParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            overflow_count: 0,
            sweep_generation: 0,
        }
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Advance to a new sweep generation, e.g. after a controller restart.
    pub fn begin_generation(&mut self, generation: u64) {
        self.sweep_generation = generation;
    }

    /// Discard buffered-but-incomplete input, flushing it as an invalid partial frame.
    /// Used by `stopSweep`/`forceCleanup` to drain C1's buffer per spec §4.7.
    pub fn reset(&mut self) -> Option<ParsedLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(ParsedLine::Invalid(InvalidLine {
            raw,
            reason: "Partial frame discarded on reset".to_string(),
        }))
    }

    /// Feed newly-read bytes; returns zero or more parsed events in arrival order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ParsedLine> {
        self.buffer.extend_from_slice(bytes);

        if self.buffer.len() > self.config.max_buffer_size {
            self.overflow_count += 1;
            let keep_from = self.buffer.len() / 2;
            self.buffer.drain(0..keep_from);
            if self.overflow_count >= self.config.overflow_threshold {
                tracing::warn!(
                    overflow_count = self.overflow_count,
                    "stream parser buffer overflow threshold reached"
                );
            } else {
                tracing::debug!(overflow_count = self.overflow_count, "stream parser buffer overflow");
            }
        }

        let mut events = Vec::new();
        loop {
            let newline_pos = self.buffer.iter().position(|&b| b == b'\n');
            let Some(pos) = newline_pos else { break };
            let line_bytes: Vec<u8> = self.buffer.drain(0..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if let Some(event) = self.parse_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn parse_line(&mut self, line: &str) -> Option<ParsedLine> {
        if line.len() > self.config.max_line_length {
            return Some(ParsedLine::Invalid(InvalidLine {
                raw: line.chars().take(200).collect(),
                reason: "Line too long".to_string(),
            }));
        }

        if is_non_data_line(line) {
            return Some(ParsedLine::NonData(NonDataLine { raw: line.to_string() }));
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < MIN_FIELDS {
            return Some(ParsedLine::Invalid(InvalidLine {
                raw: line.to_string(),
                reason: "Unrecognized line".to_string(),
            }));
        }

        match self.parse_frame(&fields) {
            Ok(frame) => Some(ParsedLine::Frame(frame)),
            Err(reason) => Some(ParsedLine::Invalid(InvalidLine {
                raw: line.to_string(),
                reason,
            })),
        }
    }

    fn parse_frame(&self, fields: &[&str]) -> Result<SpectrumFrame, String> {
        let date = fields[0];
        let time = fields[1];
        let timestamp = parse_timestamp(date, time).ok_or_else(|| "Unparseable timestamp".to_string())?;

        let now = Utc::now();
        let delta = (now - timestamp).num_seconds().abs();
        if delta > 60 {
            return Err(format!("Timestamp {delta}s outside tolerance"));
        }

        let start_freq: i64 = fields[2].parse().map_err(|_| "Unparseable startFreq".to_string())?;
        let stop_freq: i64 = fields[3].parse().map_err(|_| "Unparseable stopFreq".to_string())?;
        if start_freq >= stop_freq {
            return Err("startFreq must be < stopFreq".to_string());
        }

        let bin_hz: u64 = fields[4].parse().unwrap_or(0);

        let powers: Vec<f64> = fields[5..]
            .iter()
            .filter_map(|f| f.parse::<f64>().ok())
            .collect();
        if powers.is_empty() {
            return Err("No parseable power samples".to_string());
        }
        if let Some(bad) = powers.iter().find(|p| !(MIN_POWER_DB..=MAX_POWER_DB).contains(*p)) {
            return Err(format!("Power {bad} dB outside [{MIN_POWER_DB}, {MAX_POWER_DB}]"));
        }
        if powers.len() > 10 {
            let first = powers[0];
            if powers.iter().all(|p| *p == first) {
                return Err("Stuck device: all powers identical".to_string());
            }
        }

        Ok(SpectrumFrame {
            timestamp,
            start_freq_hz: start_freq as u64,
            stop_freq_hz: stop_freq as u64,
            bin_hz,
            powers,
            sweep_generation: self.sweep_generation,
        })
    }
}

fn parse_timestamp(date: &str, time: &str) -> Option<chrono::DateTime<Utc>> {
    let combined = format!("{date} {time}");
    let naive = NaiveDateTime::parse_from_str(&combined, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Recognized informational/error prefixes, forwarded to C6/C8 instead of C2 (spec §4.1 supplement).
fn is_non_data_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    let trimmed = line.trim_start();

    trimmed.starts_with("hackrf_sweep")
        || trimmed.starts_with('[')
        || lower.contains("sweeping from")
        || lower.contains("samples per second")
        || trimmed.starts_with("RSSI")
        || trimmed.starts_with("rssi")
        || lower.contains("usb_open")
        || lower.contains("hackrf_open")
        || lower.contains("no hackrf boards")
        || lower.contains("resource busy")
        || lower.contains("permission denied")
        || lower.contains("libusb")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_with_now(powers: &str) -> String {
        let now = Utc::now();
        format!(
            "{}, {}, 2400000000, 2500000000, 100000, {}",
            now.format("%Y-%m-%d"),
            now.format("%H:%M:%S%.3f"),
            powers
        )
    }

    #[test]
    fn clean_parse_s1() {
        let mut parser = StreamParser::new(ParserConfig::default());
        let line = line_with_now("-80, -79, -40, -78");
        let events = parser.feed(format!("{line}\n").as_bytes());
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParsedLine::Frame(frame) => {
                assert_eq!(frame.start_freq_hz, 2_400_000_000);
                assert_eq!(frame.stop_freq_hz, 2_500_000_000);
                assert_eq!(frame.powers, vec![-80.0, -79.0, -40.0, -78.0]);
                assert_eq!(frame.max_power(), -40.0);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn rejects_inverted_freq_range() {
        let mut parser = StreamParser::new(ParserConfig::default());
        let now = Utc::now();
        let line = format!(
            "{}, {}, 2500000000, 2400000000, 100000, -80\n",
            now.format("%Y-%m-%d"),
            now.format("%H:%M:%S%.3f")
        );
        let events = parser.feed(line.as_bytes());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ParsedLine::Invalid(_)));
    }

    #[test]
    fn rejects_power_out_of_range() {
        let mut parser = StreamParser::new(ParserConfig::default());
        let line = line_with_now("-80, 999, -40");
        let events = parser.feed(format!("{line}\n").as_bytes());
        assert!(matches!(&events[0], ParsedLine::Invalid(_)));
    }

    #[test]
    fn stuck_device_detected_above_ten_samples() {
        let mut parser = StreamParser::new(ParserConfig::default());
        let powers = vec!["-80"; 11].join(", ");
        let line = line_with_now(&powers);
        let events = parser.feed(format!("{line}\n").as_bytes());
        match &events[0] {
            ParsedLine::Invalid(inv) => assert!(inv.reason.contains("Stuck device")),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn classifies_non_data_lines() {
        let mut parser = StreamParser::new(ParserConfig::default());
        let events = parser.feed(b"hackrf_sweep version 2021.03.1\n");
        assert!(matches!(&events[0], ParsedLine::NonData(_)));

        let events = parser.feed(b"usb_open() failed: -3\n");
        assert!(matches!(&events[0], ParsedLine::NonData(_)));
    }

    #[test]
    fn unrecognized_short_line_is_invalid_not_dropped() {
        let mut parser = StreamParser::new(ParserConfig::default());
        let events = parser.feed(b"garbage\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParsedLine::Invalid(inv) => assert_eq!(inv.reason, "Unrecognized line"),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn overflow_increments_counter_exactly_once_and_retains_tail() {
        let config = ParserConfig {
            max_buffer_size: 100,
            ..Default::default()
        };
        let mut parser = StreamParser::new(config);
        let payload = vec![b'x'; 200];
        let events = parser.feed(&payload);
        assert!(events.is_empty());
        assert_eq!(parser.overflow_count(), 1);
        assert_eq!(parser.buffer.len(), 100);
    }

    #[test]
    fn line_too_long_is_invalid_with_reason() {
        let config = ParserConfig {
            max_line_length: 10,
            ..Default::default()
        };
        let mut parser = StreamParser::new(config);
        let line = line_with_now("-80, -79, -40, -78");
        let events = parser.feed(format!("{line}\n").as_bytes());
        match &events[0] {
            ParsedLine::Invalid(inv) => assert_eq!(inv.reason, "Line too long"),
            other => panic!("expected invalid, got {other:?}"),
        }
    }
}
