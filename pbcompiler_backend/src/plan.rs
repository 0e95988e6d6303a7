//! The validated output of the timing model: one repeating cycle as per-channel
//! intervals.
//!
//! A [`CyclePlan`] is created for a fixed set of hardware pins and a cycle width, then
//! populated with [`CyclePlan::on`], which checks every interval as it is added, so an
//! infeasible sequence fails at the first interval that does not fit.
//! The clock line is *not* stored as intervals; only its channel and period are
//! recorded and the square wave is synthesized by the program builder
//! ([`crate::instruction::clock_intervals`]).
//!
//! Plans are recomputed from scratch on every programming call and are never diffed
//! against a previous plan.

use std::collections::BTreeSet;

use crate::channel::*;
use crate::error::TimingValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePlan {
    pins: Vec<Channel>,
    intervals: Vec<PulseInterval>,
    cycle_width_ns: i64,
    clock_channel: Option<Channel>,
    clock_period_ns: i64,
    trigger_width_ns: i64,
}

impl CyclePlan {
    /// Starts an empty plan.
    ///
    /// # Errors
    /// - a pin is out of range or listed twice,
    /// - `cycle_width_ns` is not positive,
    /// - `clock_period_ns` is below 2 ns (a 50% duty square wave needs a high half),
    /// - the clock channel is not one of the pins.
    pub fn new(
        pins: &[Channel],
        cycle_width_ns: i64,
        clock_channel: Option<Channel>,
        clock_period_ns: i64,
        trigger_width_ns: i64,
    ) -> Result<Self, TimingValidationError> {
        let mut seen = BTreeSet::new();
        for &pin in pins {
            Channel::checked(pin.index())?;
            if !seen.insert(pin) {
                return Err(TimingValidationError::DuplicateChannel { channel: pin });
            }
        }
        if cycle_width_ns <= 0 {
            return Err(TimingValidationError::InvalidTime {
                name: "cycle_width",
                value: cycle_width_ns as f64 * 1e-9,
            });
        }
        if clock_period_ns < 2 {
            return Err(TimingValidationError::InvalidClockPeriod { clock_period_ns });
        }
        if let Some(clock) = clock_channel {
            if !seen.contains(&clock) {
                return Err(TimingValidationError::ChannelNotConfigured {
                    channel: clock,
                    pins: pins.to_vec(),
                });
            }
        }
        Ok(Self {
            pins: pins.to_vec(),
            intervals: Vec::new(),
            cycle_width_ns,
            clock_channel,
            clock_period_ns,
            trigger_width_ns,
        })
    }

    /// Holds `channel` high for `[start_ns, start_ns + duration_ns)`.
    ///
    /// Intervals may not wrap past the cycle boundary. Overlapping intervals on the
    /// same channel are accepted; the builder ORs them into one flag word.
    pub fn on(
        &mut self,
        channel: Channel,
        start_ns: i64,
        duration_ns: i64,
    ) -> Result<&mut Self, TimingValidationError> {
        if !self.pins.contains(&channel) || self.clock_channel == Some(channel) {
            return Err(TimingValidationError::ChannelNotConfigured {
                channel,
                pins: self.pins.clone(),
            });
        }
        if duration_ns <= 0 {
            return Err(TimingValidationError::EmptyInterval {
                channel,
                start_ns,
                duration_ns,
            });
        }
        let interval = PulseInterval::new(channel, start_ns, duration_ns);
        if start_ns < 0 || interval.end_ns() > self.cycle_width_ns {
            return Err(TimingValidationError::IntervalOutOfBounds {
                channel,
                start_ns,
                end_ns: interval.end_ns(),
                cycle_width_ns: self.cycle_width_ns,
            });
        }
        let pos = self.intervals.partition_point(|iv| *iv <= interval);
        self.intervals.insert(pos, interval);
        Ok(self)
    }

    /// Trigger pulse at the start of the cycle, clamped to the cycle width. A zero
    /// trigger width leaves the trigger line low.
    pub fn trigger(&mut self, channel: Channel) -> Result<&mut Self, TimingValidationError> {
        let width = self.trigger_width_ns.min(self.cycle_width_ns);
        if width == 0 {
            return Ok(self);
        }
        self.on(channel, 0, width)
    }

    pub fn pins(&self) -> &[Channel] {
        &self.pins
    }

    /// Intervals in playback order (start time, then channel).
    pub fn intervals(&self) -> &[PulseInterval] {
        &self.intervals
    }

    /// Intervals placed on one channel, in playback order.
    pub fn channel_intervals(&self, channel: Channel) -> Vec<PulseInterval> {
        self.intervals
            .iter()
            .filter(|iv| iv.channel == channel)
            .copied()
            .collect()
    }

    pub fn cycle_width_ns(&self) -> i64 {
        self.cycle_width_ns
    }

    pub fn clock_channel(&self) -> Option<Channel> {
        self.clock_channel
    }

    pub fn clock_period_ns(&self) -> i64 {
        self.clock_period_ns
    }

    pub fn trigger_width_ns(&self) -> i64 {
        self.trigger_width_ns
    }
}

/// Pulse start times retained for introspection after a plan is computed.
///
/// Times are in seconds, as computed by the timing formulas before conversion to
/// nanoseconds. Nothing reads these back to program hardware.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    /// `(start, duration)` of every RF pulse, in playback order.
    pub rf_pulses: Vec<(f64, f64)>,
    /// Offset of the RF pulse chosen by the justification policy (pulsed ODMR).
    pub delay_rf_channel: Option<f64>,
    pub half_cycle_width: Option<f64>,
    pub left_pi_over_2_pulse_start: Option<f64>,
    pub right_pi_over_2_pulse_start: Option<f64>,
    /// Starts of the refocusing pi pulses (Ramsey/Hahn/DD).
    pub pi_pulse_start_times: Vec<f64>,
}
