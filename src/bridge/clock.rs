//! Master clock and transport time conversion.
//!
//! The host orders every event on a single monotonic nanosecond clock.
//! Transports stamp events with their own free-running counters (JACK frames,
//! microseconds); those are translated through a reference pair sampled at
//! roughly the same instant on both clocks.

use std::time::Instant;

/// Nanoseconds on the host's monotonic master clock.
pub type MasterClockNanos = i64;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const NANOS_PER_MILLISECOND: i64 = 1_000_000;
pub const NANOS_PER_MICROSECOND: i64 = 1_000;

/// Source of master clock time.
pub trait MasterClock: Send + Sync {
    fn now(&self) -> MasterClockNanos;
}

/// Master clock counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterClock for SystemClock {
    fn now(&self) -> MasterClockNanos {
        self.epoch.elapsed().as_nanos() as MasterClockNanos
    }
}

/// Describes a transport counter: its width and how long one tick lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    /// Width of the free-running counter, 1..=64 bits.
    counter_bits: u32,
    /// One tick lasts `nanos / per_ticks` nanoseconds.
    nanos: u64,
    per_ticks: u64,
}

impl Timebase {
    /// A counter of `counter_bits` bits where `per_ticks` ticks last `nanos` nanoseconds.
    pub const fn new(counter_bits: u32, nanos: u64, per_ticks: u64) -> Self {
        let counter_bits = if counter_bits == 0 || counter_bits > 64 {
            64
        } else {
            counter_bits
        };
        Self {
            counter_bits,
            nanos,
            per_ticks: if per_ticks == 0 { 1 } else { per_ticks },
        }
    }

    /// 64-bit microsecond clock (JACK's `jack_time_t`).
    pub const fn microseconds() -> Self {
        Self::new(64, NANOS_PER_MICROSECOND as u64, 1)
    }

    /// 32-bit frame counter at `sample_rate` (JACK's `jack_nframes_t`).
    pub const fn frames(sample_rate: u32) -> Self {
        Self::new(32, NANOS_PER_SECOND as u64, sample_rate as u64)
    }

    pub fn counter_bits(&self) -> u32 {
        self.counter_bits
    }

    /// Signed distance from `reference` to `event`, in ticks.
    ///
    /// The subtraction is modular in the counter width and the result is
    /// taken as the shortest way round, so a counter that wrapped between
    /// the two readings still yields a small positive delta.
    pub fn delta_ticks(&self, event: u64, reference: u64) -> i64 {
        let diff = event.wrapping_sub(reference);
        if self.counter_bits == 64 {
            return diff as i64;
        }
        let modulus = 1u64 << self.counter_bits;
        let diff = diff & (modulus - 1);
        if diff >= modulus / 2 {
            diff as i64 - modulus as i64
        } else {
            diff as i64
        }
    }

    /// Converts a tick count to nanoseconds, rounding toward zero and
    /// saturating at the `i64` range.
    pub fn ticks_to_nanos(&self, ticks: i64) -> i64 {
        let nanos = i128::from(ticks) * i128::from(self.nanos) / i128::from(self.per_ticks);
        i64::try_from(nanos).unwrap_or(if nanos < 0 { i64::MIN } else { i64::MAX })
    }
}

/// Maps a transport timestamp onto the master clock.
///
/// # Arguments
///
/// * `ref_nanos` - Master clock reading taken with `ref_transport_time`
/// * `event_transport_time` - Transport timestamp of the event
/// * `ref_transport_time` - Transport reading taken with `ref_nanos`
/// * `timebase` - Width and tick length of the transport counter
///
/// # Returns
///
/// `ref_nanos` plus the transport delta expressed in nanoseconds, saturating
/// at the ends of the master clock range.
pub fn transport_time_to_master_clock(
    ref_nanos: MasterClockNanos,
    event_transport_time: u64,
    ref_transport_time: u64,
    timebase: &Timebase,
) -> MasterClockNanos {
    let delta = timebase.delta_ticks(event_transport_time, ref_transport_time);
    ref_nanos.saturating_add(timebase.ticks_to_nanos(delta))
}
