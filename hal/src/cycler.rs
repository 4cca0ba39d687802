//! Frequency Cycler (C5).
//!
//! Advances the current sweep target through a normalized plan, on a timer. The cycler itself
//! holds no clock; it exposes `tick`-driven transitions so the owning task (the analysis task,
//! per spec §5) can drive it from a single `tokio::time::Interval` alongside everything else.

use std::collections::HashSet;
use std::time::Duration;

const MIN_TSWITCH_MS: u64 = 500;
const MAX_TSWITCH_MS: u64 = 3000;

/// One target in the cycle: a center frequency plus the span the controller should ask the
/// sweeper to cover around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyTarget {
    pub center_hz: u64,
}

impl FrequencyTarget {
    pub fn new(center_hz: u64) -> Self {
        Self { center_hz }
    }
}

#[derive(Debug, Clone)]
pub struct FrequencyPlan {
    pub frequencies: Vec<FrequencyTarget>,
    pub cycle_time: Duration,
}

/// Normalizes an arbitrary list of frequencies (which may be given in Hz, kHz or MHz-scale
/// integers by a caller) is intentionally *not* done here: `SPEC_FULL.md` leaves frequency units
/// a purely external-interface concern (§6), so this cycler only ever deals in Hz. Idempotence of
/// `normalizeFrequencies` (spec §8) reduces to deduplication + sort, which is what this does.
pub fn normalize_frequencies(freqs: &[u64]) -> Vec<u64> {
    let mut set: Vec<u64> = freqs.to_vec();
    set.sort_unstable();
    set.dedup();
    set
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclerEvent {
    /// `onCycleStart` fired with the now-current index.
    CycleStarted { index: usize },
    /// `onCycleComplete` fired with the newly-settled index.
    CycleCompleted { index: usize },
}

pub struct FrequencyCycler {
    frequencies: Vec<u64>,
    blacklist: HashSet<u64>,
    current_index: usize,
    cycle_time: Duration,
    switch_time: Duration,
    cycling: bool,
    in_transition: bool,
    elapsed_in_dwell: Duration,
    elapsed_in_switch: Duration,
}

impl FrequencyCycler {
    pub fn new() -> Self {
        Self {
            frequencies: Vec::new(),
            blacklist: HashSet::new(),
            current_index: 0,
            cycle_time: Duration::from_secs(5),
            switch_time: Duration::from_millis(MIN_TSWITCH_MS),
            cycling: false,
            in_transition: false,
            elapsed_in_dwell: Duration::ZERO,
            elapsed_in_switch: Duration::ZERO,
        }
    }

    pub fn initialize(&mut self, plan: FrequencyPlan) {
        self.frequencies = normalize_frequencies(
            &plan.frequencies.iter().map(|t| t.center_hz).collect::<Vec<_>>(),
        );
        self.blacklist.clear();
        self.cycle_time = plan.cycle_time;
        self.switch_time = Self::clamp_switch_time(plan.cycle_time);
        self.current_index = 0;
        self.in_transition = false;
        self.elapsed_in_dwell = Duration::ZERO;
        self.elapsed_in_switch = Duration::ZERO;
        self.cycling = self.valid_frequencies().len() > 1;
    }

    fn clamp_switch_time(cycle_time: Duration) -> Duration {
        let quarter = cycle_time.as_millis() as u64 / 4;
        let clamped = quarter.clamp(MIN_TSWITCH_MS, MAX_TSWITCH_MS);
        Duration::from_millis(clamped)
    }

    pub fn switch_time(&self) -> Duration {
        self.switch_time
    }

    pub fn cycle_time(&self) -> Duration {
        self.cycle_time
    }

    pub fn is_cycling(&self) -> bool {
        self.cycling
    }

    pub fn is_in_transition(&self) -> bool {
        self.in_transition
    }

    pub fn valid_frequencies(&self) -> Vec<u64> {
        self.frequencies
            .iter()
            .copied()
            .filter(|f| !self.blacklist.contains(f))
            .collect()
    }

    pub fn current(&self) -> Option<u64> {
        self.frequencies.get(self.current_index).copied()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn start_automatic_cycling(&mut self) -> Option<CyclerEvent> {
        if self.cycling {
            self.elapsed_in_dwell = Duration::ZERO;
            Some(CyclerEvent::CycleStarted { index: self.current_index })
        } else {
            None
        }
    }

    pub fn stop_cycling(&mut self) {
        self.cycling = false;
        self.in_transition = false;
    }

    /// Advance simulated time by `dt`; returns any cycler events that fire as a result. Intended
    /// to be called from the owning task's timer tick.
    pub fn tick(&mut self, dt: Duration) -> Vec<CyclerEvent> {
        let mut events = Vec::new();
        if !self.cycling {
            return events;
        }

        if self.in_transition {
            self.elapsed_in_switch += dt;
            if self.elapsed_in_switch >= self.switch_time {
                self.in_transition = false;
                self.elapsed_in_switch = Duration::ZERO;
                self.elapsed_in_dwell = Duration::ZERO;
                events.push(CyclerEvent::CycleCompleted { index: self.current_index });
            }
            return events;
        }

        self.elapsed_in_dwell += dt;
        if self.elapsed_in_dwell >= self.cycle_time {
            events.extend(self.cycle_to_next());
        }
        events
    }

    fn cycle_to_next(&mut self) -> Vec<CyclerEvent> {
        if self.frequencies.is_empty() {
            return Vec::new();
        }
        self.in_transition = true;
        self.elapsed_in_switch = Duration::ZERO;
        self.current_index = (self.current_index + 1) % self.frequencies.len();
        vec![CyclerEvent::CycleStarted { index: self.current_index }]
    }

    pub fn skip_to_frequency(&mut self, index: usize) {
        if index < self.frequencies.len() {
            self.current_index = index;
            self.in_transition = false;
            self.elapsed_in_dwell = Duration::ZERO;
        }
    }

    pub fn blacklist_frequency(&mut self, freq_hz: u64) {
        self.blacklist.insert(freq_hz);
        self.cycling = self.valid_frequencies().len() > 1;
    }

    pub fn unblacklist_frequency(&mut self, freq_hz: u64) {
        self.blacklist.remove(&freq_hz);
        self.cycling = self.valid_frequencies().len() > 1;
    }

    pub fn clear_blacklist(&mut self) {
        self.blacklist.clear();
        self.cycling = self.valid_frequencies().len() > 1;
    }

    pub fn update_timing(&mut self, cycle_time: Duration) {
        self.cycle_time = cycle_time;
        self.switch_time = Self::clamp_switch_time(cycle_time);
    }
}

impl Default for FrequencyCycler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(freqs: &[u64], cycle_ms: u64) -> FrequencyPlan {
        FrequencyPlan {
            frequencies: freqs.iter().map(|f| FrequencyTarget::new(*f)).collect(),
            cycle_time: Duration::from_millis(cycle_ms),
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let xs = vec![5, 3, 5, 1, 3];
        let once = normalize_frequencies(&xs);
        let twice = normalize_frequencies(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn s3_frequency_cycle_timeline() {
        let mut cycler = FrequencyCycler::new();
        cycler.initialize(plan(&[2_400_000_000, 5_000_000_000], 8000));
        assert_eq!(cycler.switch_time(), Duration::from_millis(2000));
        assert_eq!(cycler.current(), Some(2_400_000_000));

        let events = cycler.start_automatic_cycling();
        assert_eq!(events, Some(CyclerEvent::CycleStarted { index: 0 }));

        let events = cycler.tick(Duration::from_millis(8000));
        assert_eq!(events, vec![CyclerEvent::CycleStarted { index: 1 }]);
        assert!(cycler.is_in_transition());

        let events = cycler.tick(Duration::from_millis(2000));
        assert_eq!(events, vec![CyclerEvent::CycleCompleted { index: 1 }]);
        assert!(!cycler.is_in_transition());
        assert_eq!(cycler.current(), Some(5_000_000_000));
    }

    #[test]
    fn single_frequency_disables_cycling() {
        let mut cycler = FrequencyCycler::new();
        cycler.initialize(plan(&[2_400_000_000], 5000));
        assert!(!cycler.is_cycling());
        assert!(cycler.start_automatic_cycling().is_none());
    }

    #[test]
    fn blacklist_then_unblacklist_restores_valid_set() {
        let mut cycler = FrequencyCycler::new();
        cycler.initialize(plan(&[100, 200, 300], 5000));
        let before = cycler.valid_frequencies();
        cycler.blacklist_frequency(200);
        assert_eq!(cycler.valid_frequencies(), vec![100, 300]);
        cycler.unblacklist_frequency(200);
        assert_eq!(cycler.valid_frequencies(), before);
    }

    #[test]
    fn switch_time_clamped_to_bounds() {
        let mut cycler = FrequencyCycler::new();
        cycler.initialize(plan(&[1, 2], 100));
        assert_eq!(cycler.switch_time(), Duration::from_millis(MIN_TSWITCH_MS));

        cycler.initialize(plan(&[1, 2], 20_000));
        assert_eq!(cycler.switch_time(), Duration::from_millis(MAX_TSWITCH_MS));
    }
}
