//! Pulse-sequence timing compiler for PulseBlaster-style TTL boards.
//!
//! The crate is pure: nothing here talks to hardware. It is organized bottom-up:
//!
//! - [`utils`]: the seconds-to-nanoseconds policy and the clock-cycle count.
//! - [`channel`]: output flags ([`Channel`]) and timed intervals ([`PulseInterval`]).
//! - [`plan`]: [`CyclePlan`], the validated set of intervals within one repeating
//!   cycle, plus [`Diagnostics`].
//! - [`sequence`]: the timing model. Each sequence family (hold-open, CW-ODMR,
//!   pulsed ODMR, Ramsey/Hahn/DD) implements [`SequenceFamily`] and compiles its
//!   parameters into a plan.
//! - [`instruction`]: [`PulseProgram`], the flag-mask segment list uploaded to a board.
//!
//! ```
//! use pbcompiler_backend::*;
//!
//! let params = PulsedOdmrParams::default();
//! let result = params.compile(&PulsedOdmrOverrides { rf_width: Some(2e-6) }).unwrap();
//! let program = PulseProgram::build(&result.plan);
//! assert_eq!(program.cycle_width_ns(), 30_000);
//! assert_eq!(program.clock_cycle_count(), 150);
//! ```

pub mod channel;
pub mod error;
pub mod instruction;
pub mod plan;
pub mod sequence;
pub mod utils;

pub use channel::*;
pub use error::*;
pub use instruction::*;
pub use plan::*;
pub use sequence::*;
