//! Drives SpinCore PulseBlaster boards with sequences compiled by
//! [`pbcompiler_backend`].
//!
//! - [`driver`]: the vendor driver surface ([`PulserDriver`]) and an in-memory
//!   [`FakeDriver`]; the SpinAPI binding lives in `spinapi` (feature `spinapi`).
//! - [`device`]: [`DeviceSession`], the open/program/close lifecycle.
//! - [`experiment`]: [`PulseBlaster`], one sequence family bound to a session.
//! - [`error`]: [`PulserError`].
//! - [`utils`]: per-board locks.
//!
//! With the `python` feature the crate also builds the `pbexpctrl_backend` Python
//! extension module.

pub mod device;
pub mod driver;
pub mod error;
pub mod experiment;
#[cfg(feature = "python")]
mod python;
#[cfg(feature = "spinapi")]
pub mod spinapi;
pub mod utils;

pub use crate::device::*;
pub use crate::driver::*;
pub use crate::error::PulserError;
pub use crate::experiment::*;
#[cfg(feature = "spinapi")]
pub use crate::spinapi::SpinApiDriver;
