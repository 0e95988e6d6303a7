//! Board session lifecycle on top of a [`PulserDriver`].
//!
//! A [`DeviceSession`] is not a persistent connection. Every top-level operation is
//! a complete transaction that opens the board, does its work and closes it again:
//!
//! - [`DeviceSession::program`]: open, start programming, upload, stop programming, close,
//! - [`DeviceSession::start`], [`DeviceSession::stop`], [`DeviceSession::reset`]: open,
//!   one playback command, close.
//!
//! Any of them can therefore be retried on its own after a failure. The lower-level
//! steps (`open`, `start_programming`, ...) are public as well and enforce the session
//! state machine:
//!
//! ```text
//! Closed --open--> Open --start_programming--> Programming --stop_programming--> Programmed
//!   ^                                                                                |
//!   +------------------------------- close (from any state) -------------------------+
//! ```
//!
//! Every driver status is checked by [`DeviceSession::pb_call`]; nothing is retried.

use std::fmt;

use pbcompiler_backend::{PulseProgram, Repeat};
use tracing::{debug, info, warn};

use crate::driver::*;
use crate::error::{PulserError, Result};
use crate::utils::board_lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
    Programming,
    Programmed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Open => "open",
            SessionState::Programming => "programming",
            SessionState::Programmed => "programmed",
        };
        write!(f, "{name}")
    }
}

/// Last playback command this session issued successfully. The board keeps playing
/// after the session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Idle,
    Running,
}

pub struct DeviceSession<D: PulserDriver> {
    driver: D,
    board: i32,
    state: SessionState,
    playback: Playback,
}

impl<D: PulserDriver> DeviceSession<D> {
    pub fn new(driver: D, board: i32) -> Self {
        Self {
            driver,
            board,
            state: SessionState::Closed,
            playback: Playback::Idle,
        }
    }

    pub fn board(&self) -> i32 {
        self.board
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn playback(&self) -> Playback {
        self.playback
    }

    /// Issues one driver call and converts a nonzero status into
    /// [`PulserError::Operation`] carrying the driver's own error text.
    pub fn pb_call<F: FnOnce(&mut D) -> Status>(&mut self, call: DriverCall, func: F) -> Result<()> {
        let code = func(&mut self.driver);
        if code != 0 {
            let message = self.driver.last_error();
            warn!(board = self.board, %call, code, %message, "driver call failed");
            return Err(PulserError::Operation {
                call,
                code,
                message,
                cause: None,
            });
        }
        debug!(board = self.board, %call, "driver call ok");
        Ok(())
    }

    fn require(&self, op: &'static str, allowed: &[SessionState]) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(PulserError::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Selects and initializes the board, then fixes the core clock.
    ///
    /// On failure the board is closed before [`PulserError::Initialization`] is raised.
    /// If that close fails as well, the close failure is raised with the initialization
    /// error as its cause.
    pub fn open(&mut self) -> Result<()> {
        self.require("open", &[SessionState::Closed])?;
        let board = self.board;

        let mut code = self.driver.select_board(board);
        if code == 0 {
            code = self.driver.init();
        }
        if code != 0 {
            let message = self.driver.last_error();
            warn!(board, code, %message, "board initialization failed");
            let init_error = PulserError::Initialization {
                board,
                code,
                message,
            };
            return Err(match self.close() {
                Ok(()) => init_error,
                Err(PulserError::Operation {
                    call, code, message, ..
                }) => PulserError::Operation {
                    call,
                    code,
                    message,
                    cause: Some(Box::new(init_error)),
                },
                Err(other) => other,
            });
        }

        self.driver.set_core_clock(CORE_CLOCK_HZ);
        self.state = SessionState::Open;
        debug!(board, "board opened");
        Ok(())
    }

    pub fn start_programming(&mut self) -> Result<()> {
        self.require(
            "start programming",
            &[SessionState::Open, SessionState::Programmed],
        )?;
        self.pb_call(DriverCall::StartProgramming, |d| d.start_programming(PULSE_PROGRAM))?;
        self.state = SessionState::Programming;
        Ok(())
    }

    /// Writes the program's instructions, looping forever.
    pub fn upload(&mut self, program: &PulseProgram) -> Result<()> {
        self.require("upload", &[SessionState::Programming])?;
        let handles: Vec<PulseHandle> = program
            .instructions()
            .iter()
            .map(|instr| self.driver.define_pulse(instr.flags, instr.start_ns, instr.duration_ns))
            .collect();
        self.pb_call(DriverCall::Commit, |d| d.commit(&handles, Repeat::Infinite))
    }

    pub fn stop_programming(&mut self) -> Result<()> {
        self.require("stop programming", &[SessionState::Programming])?;
        self.pb_call(DriverCall::StopProgramming, |d| d.stop_programming())?;
        self.state = SessionState::Programmed;
        Ok(())
    }

    /// Releases the board. The session is closed afterwards even if the driver
    /// reports an error, which is still raised.
    pub fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.pb_call(DriverCall::Close, |d| d.close())
    }

    /// Closes after a failed step, keeping the step's error.
    fn abort(&mut self, err: PulserError) -> PulserError {
        if let Err(close_err) = self.close() {
            warn!(board = self.board, %close_err, "close after failure also failed");
        }
        err
    }

    /// Runs `body` between `open` and `close`, holding the per-board lock.
    fn transaction<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let lock = board_lock(self.board);
        let _guard = lock.lock();
        self.open()?;
        match body(self) {
            Ok(value) => {
                self.close()?;
                Ok(value)
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    /// Uploads `program` in one open/program/close transaction.
    pub fn program(&mut self, program: &PulseProgram) -> Result<()> {
        self.transaction(|session| {
            session.start_programming()?;
            session.upload(program)?;
            session.stop_programming()
        })?;
        info!(
            board = self.board,
            cycle_width_ns = program.cycle_width_ns(),
            n_instructions = program.instructions().len(),
            "pulse program uploaded"
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transaction(|session| session.pb_call(DriverCall::Start, |d| d.start()))?;
        self.playback = Playback::Running;
        info!(board = self.board, "playback started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.transaction(|session| session.pb_call(DriverCall::Stop, |d| d.stop()))?;
        self.playback = Playback::Idle;
        info!(board = self.board, "playback stopped");
        Ok(())
    }

    /// Stops playback and clears the outputs.
    pub fn reset(&mut self) -> Result<()> {
        self.transaction(|session| session.pb_call(DriverCall::Reset, |d| d.reset()))?;
        self.playback = Playback::Idle;
        info!(board = self.board, "board reset");
        Ok(())
    }
}
