//! # Programming a board with a sequence family
//!
//! [`PulseBlaster`] pairs the stored parameters of one sequence family
//! ([`pbcompiler_backend::SequenceFamily`]) with a [`DeviceSession`]. The four aliases
//! [`PulseBlasterHoldAom`], [`PulseBlasterCwOdmr`], [`PulseBlasterPulsedOdmr`] and
//! [`PulseBlasterRamHahnDd`] name the concrete variants.
//!
//! ## Programming
//!
//! [`PulseBlaster::program_pulser_state`] is all-or-nothing with respect to the stored
//! parameters:
//!
//! 1. the overrides are compiled against a copy of the parameters; a
//!    [`pbcompiler_backend::TimingValidationError`] returns early and leaves the stored
//!    values exactly as they were,
//! 2. the validated (rounded) parameters are committed,
//! 3. the program is uploaded in one open/program/close transaction,
//! 4. the clock-cycle count is returned for sizing an acquisition buffer.
//!
//! Hardware failures in step 3 do not roll back step 2: the parameters describe the
//! requested sequence, whether or not the board accepted it.
//!
//! ## Example
//!
//! ```
//! use pbexpctrl_backend::*;
//! use pbcompiler_backend::*;
//!
//! let mut pulser = PulseBlasterCwOdmr::new(CwOdmrParams::default(), FakeDriver::new());
//! let n = pulser
//!     .program_pulser_state(&CwOdmrOverrides { rf_width: Some(2e-6) })
//!     .unwrap();
//! assert_eq!(n, 20);
//! assert_eq!(pulser.params().rf_width, 2e-6);
//! ```

use indexmap::IndexMap;
use pbcompiler_backend::*;
use tracing::{debug, info};

use crate::device::DeviceSession;
use crate::driver::PulserDriver;
use crate::error::Result;

/// What the last successful compile produced. For inspection only; never read back to
/// program hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct LastProgrammed {
    pub plan: CyclePlan,
    pub program: PulseProgram,
    pub diagnostics: Diagnostics,
}

pub struct PulseBlaster<S: SequenceFamily, D: PulserDriver> {
    params: S,
    session: DeviceSession<D>,
    last: Option<LastProgrammed>,
}

pub type PulseBlasterHoldAom<D> = PulseBlaster<HoldOpenParams, D>;
pub type PulseBlasterCwOdmr<D> = PulseBlaster<CwOdmrParams, D>;
pub type PulseBlasterPulsedOdmr<D> = PulseBlaster<PulsedOdmrParams, D>;
pub type PulseBlasterRamHahnDd<D> = PulseBlaster<RamseyHahnDdParams, D>;

impl<S: SequenceFamily, D: PulserDriver> PulseBlaster<S, D> {
    /// Stores the parameters rounded to storage precision. Nothing is validated or sent
    /// to the board until [`PulseBlaster::program_pulser_state`].
    pub fn new(params: S, driver: D) -> Self {
        let params = params.normalized();
        let session = DeviceSession::new(driver, params.board());
        Self {
            params,
            session,
            last: None,
        }
    }

    pub fn params(&self) -> &S {
        &self.params
    }

    pub fn session(&self) -> &DeviceSession<D> {
        &self.session
    }

    pub fn last_programmed(&self) -> Option<&LastProgrammed> {
        self.last.as_ref()
    }

    /// Compiles the overrides without storing anything or touching the board.
    pub fn preview(&self, overrides: &S::Overrides) -> Result<(TimingResult<S>, PulseProgram)> {
        let result = self.params.compile(overrides)?;
        let program = PulseProgram::build(&result.plan);
        Ok((result, program))
    }

    /// Validates the overrides, commits them and uploads the resulting program.
    ///
    /// Returns the number of clock periods per cycle.
    pub fn program_pulser_state(&mut self, overrides: &S::Overrides) -> Result<u64> {
        let (result, program) = self.preview(overrides)?;
        debug!(family = S::NAME, ?overrides, "sequence validated");

        let TimingResult {
            params,
            plan,
            diagnostics,
        } = result;
        self.params = params;
        self.session.program(&program)?;

        let clock_cycle_count = program.clock_cycle_count();
        info!(
            family = S::NAME,
            board = self.session.board(),
            cycle_width_ns = program.cycle_width_ns(),
            clock_cycle_count,
            "pulser programmed"
        );
        self.last = Some(LastProgrammed {
            plan,
            program,
            diagnostics,
        });
        Ok(clock_cycle_count)
    }

    pub fn experimental_conditions(&self) -> IndexMap<String, ConditionValue> {
        self.params.experimental_conditions()
    }

    pub fn start(&mut self) -> Result<()> {
        self.session.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.session.stop()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.session.reset()
    }
}

impl<D: PulserDriver> PulseBlasterRamHahnDd<D> {
    /// RF pulse train for the given values, computed from the stored parameters
    /// without changing them.
    pub fn compute_rf_pulse_sequence(
        &self,
        free_precession_time: f64,
        n_refocussing_pi_pulses: u32,
    ) -> Result<RfPulseSequence> {
        Ok(self
            .params
            .compute_rf_pulse_sequence(free_precession_time, n_refocussing_pi_pulses)?)
    }
}

#[cfg(test)]
mod test {
    use crate::driver::*;
    use crate::error::PulserError;
    use crate::experiment::*;

    mod rollback {
        use super::*;

        #[test]
        /// An infeasible override leaves the stored values alone and never opens the board.
        fn failed_validation_keeps_params() {
            let fake = FakeDriver::new();
            let mut pulser = PulseBlasterRamHahnDd::new(RamseyHahnDdParams::default(), fake.clone());
            let err = pulser
                .program_pulser_state(&RamseyHahnDdOverrides {
                    free_precession_time: Some(0.),
                    n_refocussing_pi_pulses: Some(3),
                })
                .unwrap_err();
            assert!(matches!(
                err,
                PulserError::Timing(TimingValidationError::TooManyRefocusingPulses { .. })
            ));
            assert_eq!(pulser.params().free_precession_time, 5e-6);
            assert_eq!(pulser.params().n_refocussing_pi_pulses, 0);
            assert!(fake.inspect(|b| b.calls.is_empty()));
            assert!(pulser.last_programmed().is_none());
        }

        #[test]
        fn cw_rf_width_too_short() {
            let mut pulser = PulseBlasterCwOdmr::new(CwOdmrParams::default(), FakeDriver::new());
            assert!(pulser
                .program_pulser_state(&CwOdmrOverrides {
                    rf_width: Some(49e-9)
                })
                .is_err());
            assert_eq!(pulser.params().rf_width, 5e-6);
        }
    }

    #[test]
    fn override_is_committed_rounded() {
        let mut pulser = PulseBlasterPulsedOdmr::new(PulsedOdmrParams::default(), FakeDriver::new());
        let n = pulser
            .program_pulser_state(&PulsedOdmrOverrides {
                rf_width: Some(3.0000004e-6),
            })
            .unwrap();
        assert_eq!(n, 150);
        assert_eq!(pulser.params().rf_width, 3e-6);
        let last = pulser.last_programmed().unwrap();
        assert_eq!(last.diagnostics.half_cycle_width, Some(15e-6));
        assert_eq!(last.program.cycle_width_ns(), 30_000);
    }

    #[test]
    /// A board that refuses the upload still leaves the validated values stored.
    fn hardware_failure_after_validation() {
        let fake = FakeDriver::new();
        fake.fail(DriverCall::Commit, -4);
        let mut pulser = PulseBlasterCwOdmr::new(CwOdmrParams::default(), fake.clone());
        assert!(matches!(
            pulser.program_pulser_state(&CwOdmrOverrides {
                rf_width: Some(1e-6)
            }),
            Err(PulserError::Operation {
                call: DriverCall::Commit,
                ..
            })
        ));
        assert_eq!(pulser.params().rf_width, 1e-6);
        assert!(pulser.last_programmed().is_none());
        // The board was released after the failed upload
        assert_eq!(fake.inspect(|b| b.count(DriverCall::Close)), 1);
    }

    #[test]
    fn construction_rounds_params() {
        let pulser = PulseBlasterHoldAom::new(
            HoldOpenParams {
                cycle_width: 1.0000000001e-3,
                ..Default::default()
            },
            FakeDriver::new(),
        );
        assert_eq!(pulser.params().cycle_width, 1e-3);
        assert_eq!(pulser.session().board(), 1);
    }

    #[test]
    fn preview_leaves_the_board_alone() {
        let fake = FakeDriver::new();
        let pulser = PulseBlasterRamHahnDd::new(RamseyHahnDdParams::default(), fake.clone());
        let (result, program) = pulser
            .preview(&RamseyHahnDdOverrides {
                free_precession_time: Some(10e-6),
                n_refocussing_pi_pulses: Some(1),
            })
            .unwrap();
        assert_eq!(result.params.free_precession_time, 10e-6);
        assert_eq!(program.cycle_width_ns(), 34_000);
        assert_eq!(pulser.params().free_precession_time, 5e-6);
        assert!(fake.inspect(|b| b.calls.is_empty()));

        let seq = pulser.compute_rf_pulse_sequence(10e-6, 1).unwrap();
        assert_eq!(seq.pulses.len(), 3);
    }
}
