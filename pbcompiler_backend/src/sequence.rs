//! Timing model: turns the physical parameters of a sequence family into a validated
//! [`CyclePlan`].
//!
//! ## Families
//!
//! | Params                 | Cycle                                    | Overrides                                   |
//! |------------------------|------------------------------------------|---------------------------------------------|
//! | [`HoldOpenParams`]     | `cycle_width` (arbitrary)                | none                                        |
//! | [`CwOdmrParams`]       | `2 * rf_width`                           | `rf_width`                                  |
//! | [`PulsedOdmrParams`]   | `full_cycle_width`                       | `rf_width`                                  |
//! | [`RamseyHahnDdParams`] | `2 * half_cycle_width` (derived)         | `free_precession_time`, `n_refocussing_pi_pulses` |
//!
//! Every family implements [`SequenceFamily`]. Its provided method
//! [`SequenceFamily::compile`] is the whole timing model:
//!
//! 1. apply the overrides to a *copy* of the stored parameters,
//! 2. check the requested values against the family's width constraint,
//! 3. round every time to [`crate::utils::TIME_DECIMALS`] decimals,
//! 4. lay out the cycle from the rounded values.
//!
//! The constraint is checked before rounding. Storage precision is 10 ns, so a value
//! requested 1 ns inside a boundary is accepted and then stored on the boundary itself.
//!
//! Nothing is mutated; the caller decides whether to commit [`TimingResult::params`].
//! A failed compile therefore leaves the stored parameters untouched.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::*;
use crate::error::TimingValidationError;
use crate::plan::{CyclePlan, Diagnostics};
use crate::utils::{round_seconds, seconds_to_ns, MAX_TIME_SECONDS};

/// Shortest RF pulse (ns) the CW-ODMR sequence will program.
pub const MIN_CW_RF_WIDTH_NS: i64 = 50;

/// Value of one entry of [`SequenceFamily::experimental_conditions`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Seconds(f64),
    Count(u32),
    Text(String),
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionValue::Seconds(t) => write!(f, "{t:e}"),
            ConditionValue::Count(n) => write!(f, "{n}"),
            ConditionValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Where the pulsed-ODMR RF pulse sits between the two AOM pulses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Justify {
    Left,
    #[default]
    Center,
    Right,
    StartCenter,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown RF pulse justification {0:?}, expected one of left, center, right, start_center")]
pub struct ParseJustifyError(pub String);

impl FromStr for Justify {
    type Err = ParseJustifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Justify::Left),
            "center" => Ok(Justify::Center),
            "right" => Ok(Justify::Right),
            "start_center" => Ok(Justify::StartCenter),
            _ => Err(ParseJustifyError(s.to_string())),
        }
    }
}

impl fmt::Display for Justify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Justify::Left => "left",
            Justify::Center => "center",
            Justify::Right => "right",
            Justify::StartCenter => "start_center",
        };
        write!(f, "{name}")
    }
}

/// Output of [`SequenceFamily::compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct TimingResult<S> {
    /// Normalized parameters the plan was computed from. Committing these is how a
    /// caller applies the requested overrides.
    pub params: S,
    pub plan: CyclePlan,
    pub diagnostics: Diagnostics,
}

/// Behaviour shared by all sequence families.
pub trait SequenceFamily: Clone + fmt::Debug {
    /// Values that may be changed per programming call. `None` keeps the stored value.
    type Overrides: Default + Clone + fmt::Debug;

    /// Human-readable family name, used in logs.
    const NAME: &'static str;

    fn board(&self) -> i32;

    /// Output pins the family drives, in the order they are reported.
    fn hardware_pins(&self) -> Vec<Channel>;

    /// Copy of `self` with the overrides applied verbatim (no rounding).
    fn with_overrides(&self, overrides: &Self::Overrides) -> Self;

    /// Copy of `self` with every time rounded to the storage precision.
    fn normalized(&self) -> Self;

    /// Named time values that must be finite and non-negative.
    fn times(&self) -> Vec<(&'static str, f64)>;

    /// Family-specific width constraint.
    fn raise_for_pulse_width(&self) -> Result<(), TimingValidationError>;

    /// Lays out one cycle. Assumes the width constraint already holds.
    fn cycle_plan(&self) -> Result<(CyclePlan, Diagnostics), TimingValidationError>;

    /// Snapshot of the parameters relevant to this family, for experiment metadata.
    fn experimental_conditions(&self) -> IndexMap<String, ConditionValue>;

    fn check_times(&self) -> Result<(), TimingValidationError> {
        for (name, value) in self.times() {
            if !value.is_finite() || value < 0. {
                return Err(TimingValidationError::InvalidTime { name, value });
            }
            if value > MAX_TIME_SECONDS {
                return Err(TimingValidationError::TimeOutOfRange {
                    name,
                    value,
                    max: MAX_TIME_SECONDS,
                });
            }
        }
        Ok(())
    }

    fn compile(&self, overrides: &Self::Overrides) -> Result<TimingResult<Self>, TimingValidationError> {
        let requested = self.with_overrides(overrides);
        requested.check_times()?;
        requested.raise_for_pulse_width()?;
        let params = requested.normalized();
        let (plan, diagnostics) = params.cycle_plan()?;
        Ok(TimingResult {
            params,
            plan,
            diagnostics,
        })
    }
}

/// Empty plan for the common `[aom, rf, clock, trigger]` layout with a trigger at
/// `t = 0`.
fn four_line_plan(
    pins: &[Channel],
    cycle_width_ns: i64,
    clock_period: f64,
    trigger_width: f64,
) -> Result<CyclePlan, TimingValidationError> {
    let mut plan = CyclePlan::new(
        pins,
        cycle_width_ns,
        Some(pins[2]),
        seconds_to_ns(clock_period),
        seconds_to_ns(trigger_width),
    )?;
    plan.trigger(pins[3])?;
    Ok(plan)
}

/// The parameter accessors every family has: board number, output pins, and the
/// time-valued fields that are checked and rounded.
macro_rules! family_fields {
    (pins: [$($pin:ident),+ $(,)?], times: [$($time:ident),+ $(,)?] $(,)?) => {
        fn board(&self) -> i32 {
            self.board
        }

        fn hardware_pins(&self) -> Vec<Channel> {
            vec![$(Channel(self.$pin)),+]
        }

        fn normalized(&self) -> Self {
            Self {
                $($time: round_seconds(self.$time),)+
                ..self.clone()
            }
        }

        fn times(&self) -> Vec<(&'static str, f64)> {
            vec![$((stringify!($time), self.$time)),+]
        }
    };
}

fn seconds(value: f64) -> ConditionValue {
    ConditionValue::Seconds(value)
}

// ---------------------------------------------------------------------------------------
// Hold-open
// ---------------------------------------------------------------------------------------

/// Holds the AOM channel on for the whole (arbitrary) cycle. Used for continuous
/// illumination, e.g. confocal scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HoldOpenParams {
    #[serde(alias = "pb_board_number")]
    pub board: i32,
    pub aom_channel: u8,
    pub cycle_width: f64,
    /// Only used to report a clock-cycle count; no clock line is driven.
    pub clock_period: f64,
}

impl Default for HoldOpenParams {
    fn default() -> Self {
        Self {
            board: 1,
            aom_channel: 0,
            cycle_width: 10e-3,
            clock_period: 200e-9,
        }
    }
}

impl SequenceFamily for HoldOpenParams {
    type Overrides = ();
    const NAME: &'static str = "hold-open";

    family_fields! {
        pins: [aom_channel],
        times: [
            cycle_width,
            clock_period,
        ],
    }

    fn with_overrides(&self, _overrides: &()) -> Self {
        self.clone()
    }

    fn raise_for_pulse_width(&self) -> Result<(), TimingValidationError> {
        Ok(())
    }

    fn cycle_plan(&self) -> Result<(CyclePlan, Diagnostics), TimingValidationError> {
        let cycle_width_ns = seconds_to_ns(self.cycle_width);
        let aom = Channel(self.aom_channel);
        let mut plan = CyclePlan::new(
            &self.hardware_pins(),
            cycle_width_ns,
            None,
            seconds_to_ns(self.clock_period),
            0,
        )?;
        plan.on(aom, 0, cycle_width_ns)?;
        Ok((plan, Diagnostics::default()))
    }

    fn experimental_conditions(&self) -> IndexMap<String, ConditionValue> {
        IndexMap::new()
    }
}

// ---------------------------------------------------------------------------------------
// CW-ODMR
// ---------------------------------------------------------------------------------------

/// AOM always on, RF switched at 50% duty cycle, plus clock and trigger for a DAQ card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CwOdmrParams {
    #[serde(alias = "pb_board_number")]
    pub board: i32,
    pub aom_channel: u8,
    pub rf_channel: u8,
    pub clock_channel: u8,
    pub trigger_channel: u8,
    pub rf_width: f64,
    pub clock_period: f64,
    pub trigger_width: f64,
}

impl Default for CwOdmrParams {
    fn default() -> Self {
        Self {
            board: 1,
            aom_channel: 0,
            rf_channel: 1,
            clock_channel: 2,
            trigger_channel: 3,
            rf_width: 5e-6,
            clock_period: 200e-9,
            trigger_width: 500e-9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CwOdmrOverrides {
    pub rf_width: Option<f64>,
}

impl SequenceFamily for CwOdmrParams {
    type Overrides = CwOdmrOverrides;
    const NAME: &'static str = "CW-ODMR";

    family_fields! {
        pins: [aom_channel, rf_channel, clock_channel, trigger_channel],
        times: [
            rf_width,
            clock_period,
            trigger_width,
        ],
    }

    fn with_overrides(&self, overrides: &CwOdmrOverrides) -> Self {
        Self {
            rf_width: overrides.rf_width.unwrap_or(self.rf_width),
            ..self.clone()
        }
    }

    fn raise_for_pulse_width(&self) -> Result<(), TimingValidationError> {
        let rf_width_ns = seconds_to_ns(self.rf_width);
        if rf_width_ns < MIN_CW_RF_WIDTH_NS {
            return Err(TimingValidationError::RfWidthTooShort {
                rf_width_ns,
                minimum_ns: MIN_CW_RF_WIDTH_NS,
            });
        }
        Ok(())
    }

    fn cycle_plan(&self) -> Result<(CyclePlan, Diagnostics), TimingValidationError> {
        let rf_width_ns = seconds_to_ns(self.rf_width);
        let cycle_width_ns = 2 * rf_width_ns;
        let mut plan = four_line_plan(
            &self.hardware_pins(),
            cycle_width_ns,
            self.clock_period,
            self.trigger_width,
        )?;
        plan.on(Channel(self.aom_channel), 0, cycle_width_ns)?
            .on(Channel(self.rf_channel), 0, rf_width_ns)?;
        let diagnostics = Diagnostics {
            rf_pulses: vec![(0., self.rf_width)],
            ..Default::default()
        };
        Ok((plan, diagnostics))
    }

    fn experimental_conditions(&self) -> IndexMap<String, ConditionValue> {
        IndexMap::from([
            ("rf_width".to_string(), seconds(self.rf_width)),
            ("clock_period".to_string(), seconds(self.clock_period)),
        ])
    }
}

// ---------------------------------------------------------------------------------------
// Pulsed ODMR
// ---------------------------------------------------------------------------------------

/// AOM on / RF off, AOM off / RF on, AOM on / RF off, AOM off / RF off.
///
/// The RF pulse sits in the first half cycle, positioned by [`Justify`]. Response times
/// shift the TTL edges so that the physical pulses land where they are meant to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PulsedOdmrParams {
    #[serde(alias = "pb_board_number")]
    pub board: i32,
    pub aom_channel: u8,
    pub rf_channel: u8,
    pub clock_channel: u8,
    pub trigger_channel: u8,
    pub clock_period: f64,
    pub trigger_width: f64,
    pub rf_width: f64,
    pub aom_width: f64,
    pub aom_response_time: f64,
    pub rf_response_time: f64,
    pub pre_rf_pad: f64,
    pub post_rf_pad: f64,
    pub full_cycle_width: f64,
    pub rf_pulse_justify: Justify,
}

impl Default for PulsedOdmrParams {
    fn default() -> Self {
        Self {
            board: 1,
            aom_channel: 0,
            rf_channel: 1,
            clock_channel: 2,
            trigger_channel: 3,
            clock_period: 200e-9,
            trigger_width: 500e-9,
            rf_width: 5e-6,
            aom_width: 5e-6,
            aom_response_time: 800e-9,
            rf_response_time: 200e-9,
            pre_rf_pad: 100e-9,
            post_rf_pad: 100e-9,
            full_cycle_width: 30e-6,
            rf_pulse_justify: Justify::Center,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PulsedOdmrOverrides {
    pub rf_width: Option<f64>,
}

impl PulsedOdmrParams {
    pub fn half_cycle_width(&self) -> f64 {
        self.full_cycle_width / 2.
    }

    /// Start of the RF TTL pulse, in seconds from the start of the cycle.
    pub fn delay_rf_channel(&self) -> f64 {
        let half_cycle_width = self.half_cycle_width();
        match self.rf_pulse_justify {
            Justify::Center => {
                self.aom_width + (half_cycle_width - self.aom_width) / 2.
                    - self.rf_width / 2.
                    - self.rf_response_time
            }
            Justify::StartCenter => {
                self.aom_width + (half_cycle_width - self.aom_width) / 2. - self.rf_response_time
            }
            Justify::Left => {
                self.aom_width + self.aom_response_time + self.pre_rf_pad - self.rf_response_time
            }
            Justify::Right => {
                half_cycle_width - self.post_rf_pad - self.rf_width - self.rf_response_time
                    + self.aom_response_time
            }
        }
    }
}

impl SequenceFamily for PulsedOdmrParams {
    type Overrides = PulsedOdmrOverrides;
    const NAME: &'static str = "pulsed ODMR";

    family_fields! {
        pins: [aom_channel, rf_channel, clock_channel, trigger_channel],
        times: [
            clock_period,
            trigger_width,
            rf_width,
            aom_width,
            aom_response_time,
            rf_response_time,
            pre_rf_pad,
            post_rf_pad,
            full_cycle_width,
        ],
    }

    fn with_overrides(&self, overrides: &PulsedOdmrOverrides) -> Self {
        Self {
            rf_width: overrides.rf_width.unwrap_or(self.rf_width),
            ..self.clone()
        }
    }

    /// The AOM pulse, its response time, both pads and the RF pulse must fit strictly
    /// inside half the cycle.
    fn raise_for_pulse_width(&self) -> Result<(), TimingValidationError> {
        let requested_ns: i64 = [
            self.aom_width,
            self.aom_response_time,
            self.pre_rf_pad,
            self.rf_width,
            self.post_rf_pad,
        ]
        .into_iter()
        .map(seconds_to_ns)
        .sum();
        let half_cycle_ns = seconds_to_ns(self.half_cycle_width());
        if requested_ns >= half_cycle_ns {
            return Err(TimingValidationError::CycleTooShort {
                requested_ns,
                half_cycle_ns,
            });
        }
        Ok(())
    }

    fn cycle_plan(&self) -> Result<(CyclePlan, Diagnostics), TimingValidationError> {
        let half_cycle_width = self.half_cycle_width();
        let delay_rf_channel = self.delay_rf_channel();
        let aom = Channel(self.aom_channel);
        let aom_width_ns = seconds_to_ns(self.aom_width);

        let mut plan = four_line_plan(
            &self.hardware_pins(),
            seconds_to_ns(self.full_cycle_width),
            self.clock_period,
            self.trigger_width,
        )?;
        plan.on(aom, 0, aom_width_ns)?
            .on(
                Channel(self.rf_channel),
                seconds_to_ns(delay_rf_channel),
                seconds_to_ns(self.rf_width),
            )?
            .on(aom, seconds_to_ns(half_cycle_width), aom_width_ns)?;

        let diagnostics = Diagnostics {
            rf_pulses: vec![(delay_rf_channel, self.rf_width)],
            delay_rf_channel: Some(delay_rf_channel),
            half_cycle_width: Some(half_cycle_width),
            ..Default::default()
        };
        Ok((plan, diagnostics))
    }

    fn experimental_conditions(&self) -> IndexMap<String, ConditionValue> {
        IndexMap::from([
            ("rf_width".to_string(), seconds(self.rf_width)),
            ("aom_width".to_string(), seconds(self.aom_width)),
            ("aom_response_time".to_string(), seconds(self.aom_response_time)),
            ("post_rf_pad".to_string(), seconds(self.post_rf_pad)),
            ("pre_rf_pad".to_string(), seconds(self.pre_rf_pad)),
            ("full_cycle_width".to_string(), seconds(self.full_cycle_width)),
            (
                "rf_pulse_justify".to_string(),
                ConditionValue::Text(self.rf_pulse_justify.to_string()),
            ),
            ("clock_period".to_string(), seconds(self.clock_period)),
        ])
    }
}

// ---------------------------------------------------------------------------------------
// Ramsey / Hahn echo / dynamical decoupling
// ---------------------------------------------------------------------------------------

/// AOM on, pi/2, free precession split by `n` refocusing pi pulses, pi/2, AOM on, idle.
///
/// With no refocusing pulses this is a Ramsey sequence, with one a Hahn echo, and with
/// more a CPMG-style dynamical-decoupling train. The cycle width is derived from the
/// free precession time rather than fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RamseyHahnDdParams {
    #[serde(alias = "pb_board_number")]
    pub board: i32,
    pub aom_channel: u8,
    pub rf_channel: u8,
    pub clock_channel: u8,
    pub trigger_channel: u8,
    pub clock_period: f64,
    pub trigger_width: f64,
    pub rf_pi_pulse_width: f64,
    pub aom_width: f64,
    pub aom_response_time: f64,
    pub rf_response_time: f64,
    pub pre_rf_pad: f64,
    pub post_rf_pad: f64,
    pub free_precession_time: f64,
    pub n_refocussing_pi_pulses: u32,
}

impl Default for RamseyHahnDdParams {
    fn default() -> Self {
        Self {
            board: 1,
            aom_channel: 0,
            rf_channel: 1,
            clock_channel: 2,
            trigger_channel: 3,
            clock_period: 200e-9,
            trigger_width: 500e-9,
            rf_pi_pulse_width: 1e-6,
            aom_width: 5e-6,
            aom_response_time: 800e-9,
            rf_response_time: 200e-9,
            pre_rf_pad: 100e-9,
            post_rf_pad: 100e-9,
            free_precession_time: 5e-6,
            n_refocussing_pi_pulses: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RamseyHahnDdOverrides {
    pub free_precession_time: Option<f64>,
    pub n_refocussing_pi_pulses: Option<u32>,
}

/// RF pulse train of one Ramsey/Hahn/DD cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RfPulseSequence {
    /// `(start, duration)` in seconds, in playback order.
    pub pulses: Vec<(f64, f64)>,
    pub half_cycle_width: f64,
}

impl RamseyHahnDdParams {
    /// Half of the derived cycle width for the stored free precession time.
    pub fn half_cycle_width(&self) -> f64 {
        self.half_cycle_width_for(self.free_precession_time)
    }

    fn half_cycle_width_for(&self, free_precession_time: f64) -> f64 {
        self.aom_width
            + self.aom_response_time
            + self.pre_rf_pad
            + self.rf_pi_pulse_width / 2.
            + free_precession_time
            + self.rf_pi_pulse_width / 2.
            + self.post_rf_pad
    }

    pub fn full_cycle_width(&self) -> f64 {
        2. * self.half_cycle_width()
    }

    fn check_refocusing(
        &self,
        free_precession_time: f64,
        n_refocussing_pi_pulses: u32,
    ) -> Result<(), TimingValidationError> {
        let rf_pi_pulse_ns = seconds_to_ns(self.rf_pi_pulse_width);
        if rf_pi_pulse_ns <= 0 {
            return Err(TimingValidationError::EmptyPulse {
                name: "rf_pi_pulse_width",
                value: self.rf_pi_pulse_width,
            });
        }
        let free_precession_ns = seconds_to_ns(free_precession_time);
        let required_ns = i64::from(n_refocussing_pi_pulses)
            .checked_mul(rf_pi_pulse_ns)
            .unwrap_or(i64::MAX);
        if free_precession_ns < required_ns {
            return Err(TimingValidationError::TooManyRefocusingPulses {
                free_precession_ns,
                n_pulses: n_refocussing_pi_pulses,
                required_ns,
            });
        }
        Ok(())
    }

    /// RF pulses for a given free precession time and number of refocusing pulses.
    ///
    /// The first pi/2 pulse starts once the AOM pulse, its response time and the pre-RF
    /// pad have elapsed (less the RF response time). Refocusing pi pulses are centered on
    /// the `n` interior boundaries of `n + 1` equal segments of the free precession time.
    /// The closing pi/2 pulse starts `free_precession_time + rf_pi_pulse_width / 2` after
    /// the first.
    ///
    /// Does not touch the stored parameters.
    pub fn compute_rf_pulse_sequence(
        &self,
        free_precession_time: f64,
        n_refocussing_pi_pulses: u32,
    ) -> Result<RfPulseSequence, TimingValidationError> {
        self.check_refocusing(free_precession_time, n_refocussing_pi_pulses)?;

        let pi_over_2 = self.rf_pi_pulse_width / 2.;
        let left_start =
            self.aom_width + self.aom_response_time + self.pre_rf_pad - self.rf_response_time;
        let mut pulses = vec![(left_start, pi_over_2)];

        let n_segments = n_refocussing_pi_pulses + 1;
        let delta_t = free_precession_time / n_segments as f64;
        let refocusing_start = left_start + pi_over_2;
        for i in 1..=n_refocussing_pi_pulses {
            let start = refocusing_start + i as f64 * delta_t - pi_over_2;
            pulses.push((start, self.rf_pi_pulse_width));
        }

        let right_start = left_start + free_precession_time + pi_over_2;
        pulses.push((right_start, pi_over_2));

        Ok(RfPulseSequence {
            pulses,
            half_cycle_width: self.half_cycle_width_for(free_precession_time),
        })
    }
}

impl SequenceFamily for RamseyHahnDdParams {
    type Overrides = RamseyHahnDdOverrides;
    const NAME: &'static str = "Ramsey/Hahn/DD";

    family_fields! {
        pins: [aom_channel, rf_channel, clock_channel, trigger_channel],
        times: [
            clock_period,
            trigger_width,
            rf_pi_pulse_width,
            aom_width,
            aom_response_time,
            rf_response_time,
            pre_rf_pad,
            post_rf_pad,
            free_precession_time,
        ],
    }

    fn with_overrides(&self, overrides: &RamseyHahnDdOverrides) -> Self {
        Self {
            free_precession_time: overrides
                .free_precession_time
                .unwrap_or(self.free_precession_time),
            n_refocussing_pi_pulses: overrides
                .n_refocussing_pi_pulses
                .unwrap_or(self.n_refocussing_pi_pulses),
            ..self.clone()
        }
    }

    /// `free_precession_time >= n_refocussing_pi_pulses * rf_pi_pulse_width`.
    ///
    /// This does not account for the half-widths of the pulses at either end of the
    /// train, so a passing combination can still yield overlapping refocusing pulses
    /// when the pi pulse is long compared to the free precession time.
    fn raise_for_pulse_width(&self) -> Result<(), TimingValidationError> {
        self.check_refocusing(self.free_precession_time, self.n_refocussing_pi_pulses)
    }

    fn cycle_plan(&self) -> Result<(CyclePlan, Diagnostics), TimingValidationError> {
        let RfPulseSequence {
            pulses,
            half_cycle_width,
        } = self.compute_rf_pulse_sequence(self.free_precession_time, self.n_refocussing_pi_pulses)?;
        let half_cycle_ns = seconds_to_ns(half_cycle_width);
        let aom = Channel(self.aom_channel);
        let rf = Channel(self.rf_channel);
        let aom_width_ns = seconds_to_ns(self.aom_width);

        let mut plan = four_line_plan(
            &self.hardware_pins(),
            2 * half_cycle_ns,
            self.clock_period,
            self.trigger_width,
        )?;
        plan.on(aom, 0, aom_width_ns)?;
        for &(start, duration) in &pulses {
            let pulse = PulseInterval::from_seconds(rf, start, duration);
            plan.on(rf, pulse.start_ns, pulse.duration_ns)?;
        }
        plan.on(aom, half_cycle_ns, aom_width_ns)?;

        let diagnostics = Diagnostics {
            half_cycle_width: Some(half_cycle_width),
            left_pi_over_2_pulse_start: pulses.first().map(|p| p.0),
            right_pi_over_2_pulse_start: pulses.last().map(|p| p.0),
            pi_pulse_start_times: pulses[1..pulses.len() - 1].iter().map(|p| p.0).collect(),
            rf_pulses: pulses,
            ..Default::default()
        };
        Ok((plan, diagnostics))
    }

    fn experimental_conditions(&self) -> IndexMap<String, ConditionValue> {
        IndexMap::from([
            ("rf_pi_pulse_width".to_string(), seconds(self.rf_pi_pulse_width)),
            ("aom_width".to_string(), seconds(self.aom_width)),
            ("aom_response_time".to_string(), seconds(self.aom_response_time)),
            ("post_rf_pad".to_string(), seconds(self.post_rf_pad)),
            ("pre_rf_pad".to_string(), seconds(self.pre_rf_pad)),
            (
                "full_cycle_width".to_string(),
                seconds(round_seconds(self.full_cycle_width())),
            ),
            (
                "free_precession_time".to_string(),
                seconds(self.free_precession_time),
            ),
            (
                "n_refocussing_pi_pulses".to_string(),
                ConditionValue::Count(self.n_refocussing_pi_pulses),
            ),
            ("clock_period".to_string(), seconds(self.clock_period)),
        ])
    }
}

#[cfg(test)]
mod test {
    use crate::sequence::*;

    fn spans(plan: &CyclePlan, channel: u8) -> Vec<(i64, i64)> {
        plan.channel_intervals(Channel(channel))
            .iter()
            .map(|iv| iv.span())
            .collect()
    }

    mod hold_open {
        use super::*;

        #[test]
        fn aom_is_on_for_the_whole_cycle() {
            let result = HoldOpenParams::default().compile(&()).unwrap();
            assert_eq!(result.plan.cycle_width_ns(), 10_000_000);
            assert_eq!(spans(&result.plan, 0), vec![(0, 10_000_000)]);
            assert_eq!(result.plan.clock_channel(), None);
            assert!(HoldOpenParams::default().experimental_conditions().is_empty());
        }

        #[test]
        /// Times whose picosecond count would not fit in an `i64` are rejected by name.
        fn rejects_cycle_too_long_to_represent() {
            let params = HoldOpenParams {
                cycle_width: 1e8,
                ..Default::default()
            };
            assert!(matches!(
                params.compile(&()),
                Err(TimingValidationError::TimeOutOfRange {
                    name: "cycle_width",
                    ..
                })
            ));
        }
    }

    mod cw_odmr {
        use super::*;

        #[test]
        fn default_layout() {
            let result = CwOdmrParams::default()
                .compile(&CwOdmrOverrides::default())
                .unwrap();
            assert_eq!(result.plan.cycle_width_ns(), 10_000);
            assert_eq!(spans(&result.plan, 1), vec![(0, 5_000)]);
            assert_eq!(spans(&result.plan, 0), vec![(0, 10_000)]);
            assert_eq!(spans(&result.plan, 3), vec![(0, 500)]);
            assert_eq!(result.plan.clock_period_ns(), 200);
        }

        #[test]
        /// 50 ns is the shortest RF width, and it is checked on the requested value
        /// before rounding to 10 ns storage precision.
        fn minimum_rf_width() {
            let params = CwOdmrParams::default();
            let too_short = params.compile(&CwOdmrOverrides {
                rf_width: Some(49e-9),
            });
            assert_eq!(
                too_short.unwrap_err(),
                TimingValidationError::RfWidthTooShort {
                    rf_width_ns: 49,
                    minimum_ns: 50
                }
            );

            let result = params
                .compile(&CwOdmrOverrides {
                    rf_width: Some(50e-9),
                })
                .unwrap();
            assert_eq!(result.params.rf_width, 50e-9);
            assert_eq!(result.plan.cycle_width_ns(), 100);
            // The 500 ns trigger is clamped to the 100 ns cycle
            assert_eq!(spans(&result.plan, 3), vec![(0, 100)]);
        }

        #[test]
        fn override_is_stored_rounded() {
            let result = CwOdmrParams::default()
                .compile(&CwOdmrOverrides {
                    rf_width: Some(1.234567891e-6),
                })
                .unwrap();
            assert_eq!(result.params.rf_width, 1.23e-6);
            assert_eq!(
                result.params.experimental_conditions()["rf_width"],
                ConditionValue::Seconds(1.23e-6)
            );
        }

        #[test]
        fn rejects_nonsense_times() {
            let params = CwOdmrParams {
                clock_period: f64::NAN,
                ..Default::default()
            };
            assert!(matches!(
                params.compile(&CwOdmrOverrides::default()),
                Err(TimingValidationError::InvalidTime {
                    name: "clock_period",
                    ..
                })
            ));
            assert!(matches!(
                CwOdmrParams::default().compile(&CwOdmrOverrides {
                    rf_width: Some(-1e-6)
                }),
                Err(TimingValidationError::InvalidTime {
                    name: "rf_width",
                    ..
                })
            ));
        }

        #[test]
        fn zero_trigger_width_drops_the_trigger() {
            let params = CwOdmrParams {
                trigger_width: 0.,
                ..Default::default()
            };
            let result = params.compile(&CwOdmrOverrides::default()).unwrap();
            assert!(spans(&result.plan, 3).is_empty());
            assert_eq!(spans(&result.plan, 1), vec![(0, 5_000)]);
        }

        #[test]
        fn channels_must_be_distinct() {
            let params = CwOdmrParams {
                rf_channel: 0,
                ..Default::default()
            };
            assert_eq!(
                params.compile(&CwOdmrOverrides::default()).unwrap_err(),
                TimingValidationError::DuplicateChannel {
                    channel: Channel(0)
                }
            );
        }
    }

    mod pulsed_odmr {
        use super::*;

        #[test]
        fn default_layout() {
            let params = PulsedOdmrParams::default();
            let result = params.compile(&PulsedOdmrOverrides::default()).unwrap();
            let expected_delay = 5e-6 + (15e-6 - 5e-6) / 2. - 5e-6 / 2. - 200e-9;

            assert_eq!(result.diagnostics.half_cycle_width, Some(15e-6));
            assert_eq!(result.diagnostics.delay_rf_channel, Some(expected_delay));
            assert_eq!(result.plan.cycle_width_ns(), 30_000);
            assert_eq!(spans(&result.plan, 0), vec![(0, 5_000), (15_000, 5_000)]);
            assert_eq!(spans(&result.plan, 1), vec![(7_300, 5_000)]);
        }

        #[test]
        fn justification() {
            let cases = [
                (Justify::Left, 5_700),
                (Justify::Center, 7_300),
                (Justify::StartCenter, 9_800),
                (Justify::Right, 10_500),
            ];
            for (justify, start_ns) in cases {
                let params = PulsedOdmrParams {
                    rf_pulse_justify: justify,
                    ..Default::default()
                };
                let result = params.compile(&PulsedOdmrOverrides::default()).unwrap();
                assert_eq!(spans(&result.plan, 1), vec![(start_ns, 5_000)], "{justify}");
            }
        }

        #[test]
        /// A pulse train exactly filling half the cycle fails; one nanosecond less fits.
        fn half_cycle_boundary_is_strict() {
            let params = PulsedOdmrParams::default();
            // 5000 + 800 + 100 + 9000 + 100 == 15000
            assert_eq!(
                params
                    .compile(&PulsedOdmrOverrides {
                        rf_width: Some(9e-6)
                    })
                    .unwrap_err(),
                TimingValidationError::CycleTooShort {
                    requested_ns: 15_000,
                    half_cycle_ns: 15_000
                }
            );

            let result = params
                .compile(&PulsedOdmrOverrides {
                    rf_width: Some(8.999e-6),
                })
                .unwrap();
            assert_eq!(result.plan.cycle_width_ns(), 30_000);
        }

        #[test]
        /// The check runs on the requested value. 8.999 us passes and is stored as
        /// 9.00 us, which no longer passes on its own.
        fn boundary_value_is_stored_rounded() {
            let result = PulsedOdmrParams::default()
                .compile(&PulsedOdmrOverrides {
                    rf_width: Some(8.999e-6),
                })
                .unwrap();
            assert_eq!(result.params.rf_width, 9e-6);
            assert_eq!(spans(&result.plan, 1), vec![(5_300, 9_000)]);
            assert!(result.params.raise_for_pulse_width().is_err());
        }

        #[test]
        /// Response-time corrections that push the RF pulse before `t = 0` are reported.
        fn negative_delay_is_out_of_bounds() {
            let params = PulsedOdmrParams {
                rf_pulse_justify: Justify::Left,
                rf_response_time: 7e-6,
                ..Default::default()
            };
            assert!(matches!(
                params.compile(&PulsedOdmrOverrides::default()),
                Err(TimingValidationError::IntervalOutOfBounds { start_ns: -1_100, .. })
            ));
        }

        #[test]
        fn justify_parses() {
            assert_eq!("start_center".parse::<Justify>(), Ok(Justify::StartCenter));
            assert!("middle".parse::<Justify>().is_err());
            assert_eq!(Justify::Right.to_string(), "right");
        }

        #[test]
        fn conditions() {
            let conditions = PulsedOdmrParams::default().experimental_conditions();
            let keys: Vec<&str> = conditions.keys().map(String::as_str).collect();
            assert_eq!(
                keys,
                vec![
                    "rf_width",
                    "aom_width",
                    "aom_response_time",
                    "post_rf_pad",
                    "pre_rf_pad",
                    "full_cycle_width",
                    "rf_pulse_justify",
                    "clock_period"
                ]
            );
            assert_eq!(
                conditions["rf_pulse_justify"],
                ConditionValue::Text("center".into())
            );
        }
    }

    mod ramsey_hahn_dd {
        use super::*;

        fn overrides(free_precession_time: f64, n: u32) -> RamseyHahnDdOverrides {
            RamseyHahnDdOverrides {
                free_precession_time: Some(free_precession_time),
                n_refocussing_pi_pulses: Some(n),
            }
        }

        #[test]
        /// Ramsey: just the two pi/2 pulses.
        fn no_refocusing_pulses() {
            let result = RamseyHahnDdParams::default()
                .compile(&RamseyHahnDdOverrides::default())
                .unwrap();
            assert_eq!(spans(&result.plan, 1), vec![(5_700, 500), (11_200, 500)]);
            assert_eq!(spans(&result.plan, 0), vec![(0, 5_000), (12_000, 5_000)]);
            assert_eq!(result.plan.cycle_width_ns(), 24_000);
            assert!(result.diagnostics.pi_pulse_start_times.is_empty());
        }

        #[test]
        fn two_refocusing_pulses() {
            let result = RamseyHahnDdParams::default()
                .compile(&overrides(5e-6, 2))
                .unwrap();
            let rf = result.plan.channel_intervals(Channel(1));
            let got: Vec<(i64, i64)> = rf.iter().map(|iv| iv.span()).collect();
            assert_eq!(
                got,
                vec![(5_700, 500), (7_367, 1_000), (9_033, 1_000), (11_200, 500)]
            );
            for pair in rf.windows(2) {
                assert!(pair[0].end_ns() <= pair[1].start_ns);
            }
            assert_eq!(result.diagnostics.pi_pulse_start_times.len(), 2);
            let left_start = result.diagnostics.left_pi_over_2_pulse_start.unwrap();
            assert_eq!(seconds_to_ns(left_start), 5_700);
        }

        #[test]
        fn too_many_refocusing_pulses() {
            assert_eq!(
                RamseyHahnDdParams::default()
                    .compile(&overrides(0., 3))
                    .unwrap_err(),
                TimingValidationError::TooManyRefocusingPulses {
                    free_precession_ns: 0,
                    n_pulses: 3,
                    required_ns: 3_000
                }
            );
        }

        #[test]
        /// A refocusing train whose total length overflows is reported, not wrapped.
        fn refocusing_train_overflow() {
            let params = RamseyHahnDdParams {
                rf_pi_pulse_width: 10.,
                ..Default::default()
            };
            assert_eq!(
                params.compile(&overrides(1., u32::MAX)).unwrap_err(),
                TimingValidationError::TooManyRefocusingPulses {
                    free_precession_ns: 1_000_000_000,
                    n_pulses: u32::MAX,
                    required_ns: i64::MAX
                }
            );
        }

        #[test]
        /// 1 ns passes the check as requested but is stored as 0 at 10 ns precision;
        /// the train is refused before any pulse is laid out.
        fn pi_pulse_rounding_to_zero() {
            let params = RamseyHahnDdParams {
                rf_pi_pulse_width: 1e-9,
                ..Default::default()
            };
            assert!(params.raise_for_pulse_width().is_ok());
            assert!(matches!(
                params.compile(&overrides(5e-6, 2)),
                Err(TimingValidationError::EmptyPulse {
                    name: "rf_pi_pulse_width",
                    ..
                })
            ));
            assert!(params.normalized().compute_rf_pulse_sequence(5e-6, 2).is_err());
        }

        #[test]
        /// The feasibility check ignores the pulse half-widths at the segment
        /// boundaries. Two 1 us pulses in 2 us of free precession pass the check, yet the
        /// refocusing pulses are centered 667 ns apart and therefore overlap.
        fn check_passes_overlapping_train() {
            let result = RamseyHahnDdParams::default()
                .compile(&overrides(2e-6, 2))
                .unwrap();
            let rf = result.plan.channel_intervals(Channel(1));
            assert_eq!(rf[1].span(), (6_367, 1_000));
            assert_eq!(rf[2].span(), (7_033, 1_000));
            assert!(rf[1].overlaps(&rf[2]));
        }

        #[test]
        fn compute_rf_pulse_sequence_is_pure() {
            let params = RamseyHahnDdParams::default();
            let seq = params.compute_rf_pulse_sequence(10e-6, 1).unwrap();
            assert_eq!(seq.pulses.len(), 3);
            assert_eq!(seconds_to_ns(seq.half_cycle_width), 17_000);
            assert_eq!(seconds_to_ns(seq.pulses[1].0), 10_700);
            assert_eq!(params, RamseyHahnDdParams::default());
        }

        #[test]
        fn conditions_report_derived_cycle() {
            let params = RamseyHahnDdParams::default();
            let conditions = params.experimental_conditions();
            assert_eq!(conditions["full_cycle_width"], ConditionValue::Seconds(24e-6));
            assert_eq!(conditions["n_refocussing_pi_pulses"], ConditionValue::Count(0));
        }
    }

    #[test]
    /// Compiling twice from the same parameters gives identical plans.
    fn compile_is_idempotent() {
        let params = PulsedOdmrParams::default();
        let first = params.compile(&PulsedOdmrOverrides::default()).unwrap();
        let second = first.params.compile(&PulsedOdmrOverrides::default()).unwrap();
        assert_eq!(first.plan, second.plan);
        assert_eq!(first.params, second.params);
    }
}
