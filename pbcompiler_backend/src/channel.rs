//! Output channels and the timed intervals placed on them.
//!
//! A PulseBlaster board exposes [`MAX_CHANNELS`] digital output flags. A [`Channel`] is
//! the index of one flag; its only capability is on/off. A [`PulseInterval`] holds a
//! channel high for `[start_ns, start_ns + duration_ns)` within one repeating cycle.
//!
//! Interval bounds are kept as signed nanoseconds so that a sequence whose response-time
//! corrections push a pulse before `t = 0` can be reported as infeasible by
//! [`crate::plan::CyclePlan::on`] rather than wrapping around.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TimingValidationError;
use crate::utils::seconds_to_ns;

/// Number of output flags available on the board.
pub const MAX_CHANNELS: u8 = 24;

/// Hardware output identifier (flag bit index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(pub u8);

impl Channel {
    /// Returns the channel if its index fits on the board.
    pub fn checked(index: u8) -> Result<Self, TimingValidationError> {
        let channel = Channel(index);
        if index >= MAX_CHANNELS {
            return Err(TimingValidationError::ChannelOutOfRange {
                channel,
                max: MAX_CHANNELS,
            });
        }
        Ok(channel)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// Flag-word bit for this channel: bit `n` drives output `n`.
    pub fn mask(self) -> u32 {
        1u32 << self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One channel held high for `duration_ns` nanoseconds starting at `start_ns`.
///
/// Intervals order by start time first, then by channel, so a sorted list reads in
/// playback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PulseInterval {
    pub channel: Channel,
    pub start_ns: i64,
    pub duration_ns: i64,
}

impl PulseInterval {
    pub fn new(channel: Channel, start_ns: i64, duration_ns: i64) -> Self {
        Self {
            channel,
            start_ns,
            duration_ns,
        }
    }

    /// Builds an interval from times in seconds using the crate-wide conversion policy.
    pub fn from_seconds(channel: Channel, start: f64, duration: f64) -> Self {
        Self::new(channel, seconds_to_ns(start), seconds_to_ns(duration))
    }

    /// Exclusive end of the interval.
    pub fn end_ns(&self) -> i64 {
        self.start_ns + self.duration_ns
    }

    /// `(start_ns, duration_ns)`, the form pulses are usually quoted in.
    pub fn span(&self) -> (i64, i64) {
        (self.start_ns, self.duration_ns)
    }

    pub fn contains(&self, t_ns: i64) -> bool {
        self.start_ns <= t_ns && t_ns < self.end_ns()
    }

    /// True if both intervals share at least one nanosecond. Touching intervals
    /// (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &PulseInterval) -> bool {
        self.start_ns < other.end_ns() && other.start_ns < self.end_ns()
    }
}

impl Ord for PulseInterval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start_ns
            .cmp(&other.start_ns)
            .then(self.channel.cmp(&other.channel))
            .then(self.duration_ns.cmp(&other.duration_ns))
    }
}

impl PartialOrd for PulseInterval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PulseInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{} [{}, {}) ns",
            self.channel,
            self.start_ns,
            self.end_ns()
        )
    }
}

#[cfg(test)]
mod test {
    use crate::channel::*;

    #[test]
    fn mask_sets_one_bit_per_channel() {
        assert_eq!(Channel(0).mask(), 0b1);
        assert_eq!(Channel(3).mask(), 0b1000);
        assert_eq!(Channel(23).mask(), 1 << 23);
    }

    #[test]
    fn checked_rejects_missing_flags() {
        assert!(Channel::checked(23).is_ok());
        assert_eq!(
            Channel::checked(24),
            Err(TimingValidationError::ChannelOutOfRange {
                channel: Channel(24),
                max: MAX_CHANNELS
            })
        );
    }

    #[test]
    /// Touching intervals are back-to-back, not overlapping.
    fn overlap_is_exclusive_at_the_end() {
        let a = PulseInterval::new(Channel(1), 0, 500);
        let b = PulseInterval::new(Channel(1), 500, 500);
        let c = PulseInterval::new(Channel(1), 499, 10);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(a.contains(499));
        assert!(!a.contains(500));
    }

    #[test]
    fn ordering_follows_start_then_channel() {
        let mut intervals = vec![
            PulseInterval::new(Channel(1), 7300, 5000),
            PulseInterval::new(Channel(3), 0, 500),
            PulseInterval::new(Channel(0), 0, 5000),
        ];
        intervals.sort();
        let channels: Vec<u8> = intervals.iter().map(|iv| iv.channel.index()).collect();
        assert_eq!(channels, vec![0, 3, 1]);
    }

    #[test]
    fn from_seconds_uses_nanosecond_policy() {
        let iv = PulseInterval::from_seconds(Channel(1), 7.3e-6, 5e-6);
        assert_eq!(iv.span(), (7300, 5000));
        assert_eq!(iv.end_ns(), 12_300);
    }
}
