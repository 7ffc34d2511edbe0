use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest accepted bit width for a profile prime.
pub const MIN_BIT_WIDTH: u32 = 16;

/// Largest accepted bit width for a profile prime.
pub const MAX_BIT_WIDTH: u32 = 64;

/// Configuration for the renewal service.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use pot_renewal::RenewalConfig;
///
/// let config = RenewalConfig::new()
///     .wheel_tick(Duration::from_millis(20))
///     .jitter_margin(Duration::from_millis(100));
/// ```
///
/// The config also deserializes from JSON, durations written as
/// humantime strings (`"500ms"`, `"2s"`). Missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Granularity of the schedule wheel.
    #[serde(with = "humantime_serde")]
    pub(crate) wheel_tick: Duration,
    /// Number of slots in the schedule wheel.
    pub(crate) wheel_slots: usize,
    /// Safety margin subtracted from the refresh interval when arming a timer.
    #[serde(with = "humantime_serde")]
    pub(crate) jitter_margin: Duration,
    /// Requested intervals below this are replaced by `default_refresh_interval`.
    #[serde(with = "humantime_serde")]
    pub(crate) min_refresh_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) default_refresh_interval: Duration,
    /// Requested intervals above this are lowered to it.
    #[serde(with = "humantime_serde")]
    pub(crate) max_refresh_interval: Duration,
    /// Requested profile counts below this are replaced by `default_profile_count`.
    pub(crate) min_profile_count: u32,
    pub(crate) default_profile_count: u32,
    /// Bit width used when the requested one is out of range.
    pub(crate) default_bit_width: u32,
    /// Capacity of the event channel handed to the application.
    pub(crate) event_buffer: usize,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RenewalConfig {
    /// Create a new config with defaults.
    ///
    /// If the `POT_WHEEL_TICK_MS` environment variable is set to a positive
    /// integer, it is used as the wheel tick. This can be overridden with
    /// [`.wheel_tick()`](Self::wheel_tick).
    pub fn new() -> Self {
        let wheel_tick = std::env::var("POT_WHEEL_TICK_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(50));

        Self {
            wheel_tick,
            wheel_slots: 512,
            jitter_margin: Duration::from_millis(250),
            min_refresh_interval: Duration::from_millis(500),
            default_refresh_interval: Duration::from_millis(500),
            max_refresh_interval: Duration::from_secs(7 * 24 * 3600),
            min_profile_count: 2,
            default_profile_count: 2,
            default_bit_width: MAX_BIT_WIDTH,
            event_buffer: 256,
        }
    }

    /// Set the wheel granularity (default: 50 ms). Zero is raised to 1 ms.
    pub fn wheel_tick(mut self, tick: Duration) -> Self {
        self.wheel_tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Set the number of wheel slots (default: 512). Zero is raised to 1.
    pub fn wheel_slots(mut self, slots: usize) -> Self {
        self.wheel_slots = slots.max(1);
        self
    }

    /// Set the safety margin before the refresh deadline (default: 250 ms).
    pub fn jitter_margin(mut self, margin: Duration) -> Self {
        self.jitter_margin = margin;
        self
    }

    /// Set the refresh interval floor (default: 500 ms).
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the interval used when the requested one is below the floor (default: 500 ms).
    pub fn default_refresh_interval(mut self, interval: Duration) -> Self {
        self.default_refresh_interval = interval;
        self
    }

    /// Set the refresh interval ceiling (default: 7 days).
    pub fn max_refresh_interval(mut self, interval: Duration) -> Self {
        self.max_refresh_interval = interval;
        self
    }

    /// Set the profile count floor (default: 2).
    pub fn min_profile_count(mut self, count: u32) -> Self {
        self.min_profile_count = count;
        self
    }

    /// Set the profile count used when the requested one is below the floor (default: 2).
    pub fn default_profile_count(mut self, count: u32) -> Self {
        self.default_profile_count = count;
        self
    }

    /// Set the bit width used when the requested one is out of range (default: 64).
    pub fn default_bit_width(mut self, bits: u32) -> Self {
        self.default_bit_width = bits.clamp(MIN_BIT_WIDTH, MAX_BIT_WIDTH);
        self
    }

    /// Set the event channel capacity (default: 256).
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn tick(&self) -> Duration {
        self.wheel_tick
    }

    pub fn margin(&self) -> Duration {
        self.jitter_margin
    }

    /// Apply the interval floor and ceiling. Returns the effective interval
    /// and whether it was clamped.
    pub(crate) fn clamp_interval(&self, requested: Duration) -> (Duration, bool) {
        if requested < self.min_refresh_interval {
            (self.default_refresh_interval, true)
        } else if requested > self.max_refresh_interval {
            (self.max_refresh_interval, true)
        } else {
            (requested, false)
        }
    }

    /// Apply the profile count floor. Returns the effective count and whether it was clamped.
    pub(crate) fn clamp_profile_count(&self, requested: u32) -> (u32, bool) {
        if requested < self.min_profile_count {
            (self.default_profile_count, true)
        } else {
            (requested, false)
        }
    }

    /// Apply the bit width range. Returns the effective width and whether it was clamped.
    pub(crate) fn clamp_bit_width(&self, requested: u32) -> (u32, bool) {
        if (MIN_BIT_WIDTH..=MAX_BIT_WIDTH).contains(&requested) {
            (requested, false)
        } else {
            (self.default_bit_width, true)
        }
    }

    /// Delay before the next renewal of a path refreshed every `interval`.
    pub(crate) fn rearm_delay(&self, interval: Duration) -> Duration {
        interval.saturating_sub(self.jitter_margin)
    }
}
