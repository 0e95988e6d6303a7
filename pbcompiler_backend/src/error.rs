//! Error type for the timing model.

use thiserror::Error;

use crate::channel::Channel;

/// A requested sequence cannot be laid out on the board.
///
/// Raised before any hardware is touched. Every variant carries the offending values
/// so a failed sweep point can be diagnosed from the message alone.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TimingValidationError {
    /// CW-ODMR RF width below the shortest pulse the switch can resolve.
    #[error("RF width too small: {rf_width_ns} ns < {minimum_ns} ns")]
    RfWidthTooShort { rf_width_ns: i64, minimum_ns: i64 },

    /// Pulsed-ODMR pulses do not fit in half of the full cycle.
    #[error(
        "half of the full cycle width, {half_cycle_ns} ns, is not large enough to support \
         the requested pulse sequence, {requested_ns} ns"
    )]
    CycleTooShort { requested_ns: i64, half_cycle_ns: i64 },

    /// Refocusing pulses do not fit in the free precession time.
    #[error(
        "free precession time, {free_precession_ns} ns, is not large enough to support \
         {n_pulses} refocusing pulses of total duration {required_ns} ns"
    )]
    TooManyRefocusingPulses {
        free_precession_ns: i64,
        n_pulses: u32,
        required_ns: i64,
    },

    #[error("channel {channel} interval [{start_ns}, {end_ns}) ns does not fit in the {cycle_width_ns} ns cycle")]
    IntervalOutOfBounds {
        channel: Channel,
        start_ns: i64,
        end_ns: i64,
        cycle_width_ns: i64,
    },

    #[error("channel {channel} interval starting at {start_ns} ns has non-positive duration {duration_ns} ns")]
    EmptyInterval {
        channel: Channel,
        start_ns: i64,
        duration_ns: i64,
    },

    #[error("channel {channel} is not in the configured pin set {pins:?}")]
    ChannelNotConfigured { channel: Channel, pins: Vec<Channel> },

    #[error("channel {channel} exceeds the {max} available output flags")]
    ChannelOutOfRange { channel: Channel, max: u8 },

    #[error("channel {channel} is assigned to more than one output role")]
    DuplicateChannel { channel: Channel },

    #[error("clock period of {clock_period_ns} ns cannot be split into a 50% duty cycle")]
    InvalidClockPeriod { clock_period_ns: i64 },

    #[error("{name} must be a finite, non-negative time in seconds, got {value}")]
    InvalidTime { name: &'static str, value: f64 },

    #[error("{name} of {value} s exceeds the longest representable time, {max} s")]
    TimeOutOfRange {
        name: &'static str,
        value: f64,
        max: f64,
    },

    /// A pulse width that rounds to zero nanoseconds at storage precision.
    #[error("{name} of {value} s is shorter than one nanosecond")]
    EmptyPulse { name: &'static str, value: f64 },
}
