//! Rotation-sensor pulse capture.
//!
//! The sampler runs in interrupt context (or on a fast timer in polling
//! mode) and only ever touches the state below inside a critical section.
//! Nothing here allocates.

use crate::hal::PulseLine;
use core::cell::RefCell;
use critical_section::Mutex;
use heapless::HistoryBuffer;
use std::time::Duration;

/// Depth of the pulse ring buffer.
pub const MAX_RPM_PULSES: usize = 16;

pub const MIN_REGISTER_WIDTH: u8 = 3;
pub const MAX_REGISTER_WIDTH: u8 = 8;

/// How sensor levels reach the debounce register. Fixed for the lifetime
/// of the process; the two modes are never active together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Each sensor edge reads the pin. The level read stands for one
    /// sample per `edge_sample_period` until the next edge.
    Interrupt,
    /// A timer samples the sensor once per interval.
    Polling { interval: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub register_width: u8,
    pub edge_sample_period: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Interrupt,
            register_width: 4,
            edge_sample_period: Duration::from_micros(DEFAULT_EDGE_SAMPLE_PERIOD_US),
        }
    }
}

pub const DEFAULT_EDGE_SAMPLE_PERIOD_US: u64 = 250;

/// Fixed-capacity, time-ordered pulse timestamps. The oldest entry is
/// evicted once full.
#[derive(Debug)]
pub struct PulseRingBuffer<const N: usize> {
    entries: HistoryBuffer<u64, N>,
}

impl<const N: usize> PulseRingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            entries: HistoryBuffer::new(),
        }
    }

    /// Stores a timestamp. A value older than the newest entry is clamped
    /// up to it so the buffer never goes out of order.
    pub fn push(&mut self, timestamp_us: u64) {
        let timestamp_us = match self.entries.recent() {
            Some(&last) => timestamp_us.max(last),
            None => timestamp_us,
        };
        self.entries.write(timestamp_us);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn latest(&self) -> Option<u64> {
        self.entries.recent().copied()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.oldest_ordered().copied()
    }

    pub fn to_vec(&self) -> heapless::Vec<u64, N> {
        let mut out = heapless::Vec::new();
        for ts in self.iter() {
            // Capacities match, so this cannot overflow.
            let _ = out.push(ts);
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<const N: usize> Default for PulseRingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Level read on the most recent edge.
#[derive(Debug, Clone, Copy)]
struct HeldLevel {
    level: bool,
    since_us: u64,
    /// Samples of this level already shifted into the register.
    shifted: u64,
}

#[derive(Debug)]
struct CaptureState<const N: usize> {
    register: u8,
    stable_high: bool,
    pulses: PulseRingBuffer<N>,
    total_pulses: u64,
    held: Option<HeldLevel>,
}

impl<const N: usize> CaptureState<N> {
    fn shift(&mut self, level: bool, now_us: u64, mask: u8) -> bool {
        self.register = ((self.register << 1) | level as u8) & mask;

        if self.register == mask {
            self.stable_high = true;
            false
        } else if self.register == 0 && self.stable_high {
            self.stable_high = false;
            self.pulses.push(now_us);
            self.total_pulses += 1;
            true
        } else {
            false
        }
    }

    /// Shifts in one sample of the held level per period elapsed since its
    /// edge, up to a full register.
    fn catch_up(&mut self, now_us: u64, period_us: u64, width: u8, mask: u8) -> bool {
        let Some(mut held) = self.held else {
            return false;
        };
        let due = now_us
            .saturating_sub(held.since_us)
            .div_ceil(period_us)
            .min(u64::from(width));
        let mut recorded = false;
        while held.shifted < due {
            let at_us = held.since_us + held.shifted * period_us;
            recorded |= self.shift(held.level, at_us, mask);
            held.shifted += 1;
        }
        self.held = Some(held);
        recorded
    }
}

/// Debounces the rotation sensor and records falling-edge timestamps.
pub struct PulseCapture<const N: usize = MAX_RPM_PULSES> {
    state: Mutex<RefCell<CaptureState<N>>>,
    width: u8,
    mask: u8,
    edge_period_us: u64,
}

impl<const N: usize> PulseCapture<N> {
    /// `register_width` is clamped to 3..=8 bits.
    pub fn new(register_width: u8) -> Self {
        let width = register_width.clamp(MIN_REGISTER_WIDTH, MAX_REGISTER_WIDTH);
        let mask = if width >= 8 {
            u8::MAX
        } else {
            (1u8 << width) - 1
        };
        Self {
            state: Mutex::new(RefCell::new(CaptureState {
                register: 0,
                stable_high: false,
                pulses: PulseRingBuffer::new(),
                total_pulses: 0,
                held: None,
            })),
            width,
            mask,
            edge_period_us: DEFAULT_EDGE_SAMPLE_PERIOD_US,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.register_width).with_edge_sample_period(config.edge_sample_period)
    }

    /// Sample spacing assumed between edges in interrupt mode. Never below 1 µs.
    pub fn with_edge_sample_period(mut self, period: Duration) -> Self {
        self.edge_period_us = (period.as_micros() as u64).max(1);
        self
    }

    pub fn register_width(&self) -> u8 {
        self.width
    }

    /// Shifts one raw level into the debounce register. Returns true when
    /// this sample completed a stable high-to-low transition and a pulse
    /// was recorded.
    pub fn sample(&self, level: bool, now_us: u64) -> bool {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).shift(level, now_us, self.mask))
    }

    /// Edge handler for interrupt mode. Shifts in the samples the previous
    /// level earned since its own edge, then holds the new reading. A
    /// bounce shorter than one sample period contributes a single sample.
    pub fn on_edge(&self, line: &dyn PulseLine, now_us: u64) -> bool {
        let level = line.level();
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let recorded = state.catch_up(now_us, self.edge_period_us, self.width, self.mask);
            state.held = Some(HeldLevel {
                level,
                since_us: now_us,
                shifted: 0,
            });
            recorded
        })
    }

    /// Shifts in the samples the held level has earned without a further
    /// edge, so the last pulse of a run is not left pending.
    pub fn settle(&self, now_us: u64) -> bool {
        critical_section::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .catch_up(now_us, self.edge_period_us, self.width, self.mask)
        })
    }

    /// Copies the buffered timestamps, oldest first.
    pub fn snapshot(&self) -> heapless::Vec<u64, N> {
        critical_section::with(|cs| self.state.borrow_ref(cs).pulses.to_vec())
    }

    pub fn total_pulses(&self) -> u64 {
        critical_section::with(|cs| self.state.borrow_ref(cs).total_pulses)
    }

    pub fn reset(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.register = 0;
            state.stable_high = false;
            state.held = None;
            state.pulses.clear();
        });
    }
}

impl<const N: usize> Default for PulseCapture<N> {
    fn default() -> Self {
        Self::new(CaptureConfig::default().register_width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse<const N: usize>(capture: &PulseCapture<N>, at_us: u64) -> bool {
        let width = capture.register_width() as usize;
        for _ in 0..width {
            capture.sample(true, at_us);
        }
        let mut recorded = false;
        for _ in 0..width {
            recorded |= capture.sample(false, at_us);
        }
        recorded
    }

    #[test]
    fn records_only_stable_falling_edges() {
        let capture: PulseCapture<8> = PulseCapture::new(3);
        assert!(pulse(&capture, 100));
        assert_eq!(capture.snapshot().as_slice(), &[100]);

        // Two highs then low never stabilise.
        capture.sample(true, 200);
        capture.sample(true, 200);
        capture.sample(false, 200);
        capture.sample(false, 200);
        capture.sample(false, 200);
        assert_eq!(capture.snapshot().len(), 1);
    }

    #[test]
    fn glitch_does_not_break_stable_level() {
        let capture: PulseCapture<8> = PulseCapture::new(4);
        for _ in 0..4 {
            capture.sample(true, 10);
        }
        // Single low glitch surrounded by highs.
        capture.sample(false, 11);
        for _ in 0..4 {
            capture.sample(true, 12);
        }
        assert!(capture.snapshot().is_empty());
    }

    #[test]
    fn ring_evicts_oldest_when_full() {
        let mut ring: PulseRingBuffer<4> = PulseRingBuffer::new();
        for ts in [1, 2, 3, 4, 5, 6] {
            ring.push(ts);
        }
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
        assert_eq!(ring.latest(), Some(6));
    }

    #[test]
    fn ring_clamps_out_of_order_push() {
        let mut ring: PulseRingBuffer<4> = PulseRingBuffer::new();
        ring.push(50);
        ring.push(40);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![50, 50]);
    }

    #[test]
    fn register_width_is_clamped() {
        assert_eq!(PulseCapture::<4>::new(1).register_width(), 3);
        assert_eq!(PulseCapture::<4>::new(12).register_width(), 8);
    }

    struct Fixed(bool);

    impl PulseLine for Fixed {
        fn level(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn clean_edges_record_one_pulse_per_fall() {
        let capture: PulseCapture<4> = PulseCapture::new(4);
        assert!(!capture.on_edge(&Fixed(true), 0));
        assert!(!capture.on_edge(&Fixed(false), 10_000));
        // The low level is confirmed by the samples it earned before the next edge.
        assert!(capture.on_edge(&Fixed(true), 20_000));
        assert_eq!(capture.snapshot().as_slice(), &[10_750]);
        capture.reset();
        assert!(capture.snapshot().is_empty());
    }

    #[test]
    fn bouncing_falling_edge_records_one_pulse() {
        let capture: PulseCapture<4> = PulseCapture::new(4);
        capture.on_edge(&Fixed(true), 0);
        for (i, level) in [false, true, false, true, false].into_iter().enumerate() {
            assert!(!capture.on_edge(&Fixed(level), 1_000 + 10 * i as u64));
        }
        assert_eq!(capture.total_pulses(), 0);

        assert!(capture.settle(5_000));
        assert!(!capture.settle(6_000));
        assert_eq!(capture.total_pulses(), 1);
        assert_eq!(capture.snapshot().as_slice(), &[1_040 + 3 * 250]);
    }

    #[test]
    fn edges_at_one_instant_carry_no_samples() {
        let capture: PulseCapture<4> = PulseCapture::new(4)
            .with_edge_sample_period(Duration::from_micros(100));
        capture.on_edge(&Fixed(true), 0);
        capture.on_edge(&Fixed(false), 1_000);
        capture.on_edge(&Fixed(true), 1_000);
        capture.on_edge(&Fixed(false), 1_000);
        capture.settle(2_000);
        assert_eq!(capture.total_pulses(), 1);
        assert_eq!(capture.snapshot().as_slice(), &[1_300]);
    }
}
