//! The vendor driver surface a [`crate::device::DeviceSession`] is written against.
//!
//! [`PulserDriver`] mirrors the SpinAPI calls one-to-one and keeps their C-style
//! contract: every call that can fail returns a [`Status`], zero meaning success, and the
//! diagnostic text is fetched separately with [`PulserDriver::last_error`]. Turning
//! statuses into [`crate::error::PulserError`]s is the session's job.
//!
//! Two implementations exist:
//! - `SpinApiDriver` (feature `spinapi`): the FFI binding to the vendor library,
//! - [`FakeDriver`]: an in-memory board for tests and hardware-free runs. It records
//!   every call and can be scripted to fail any of them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use pbcompiler_backend::Repeat;

/// Status code returned by a driver call. Zero is success.
pub type Status = i32;

/// `pb_start_programming` target for the pulse program memory.
pub const PULSE_PROGRAM: i32 = 0;

/// Core clock the board is fixed to on every open.
pub const CORE_CLOCK_HZ: f64 = 100e6;

/// Driver entry points, named after their SpinAPI functions in messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverCall {
    SelectBoard,
    Init,
    CoreClock,
    StartProgramming,
    DefinePulse,
    Commit,
    StopProgramming,
    Start,
    Stop,
    Reset,
    Close,
}

impl fmt::Display for DriverCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverCall::SelectBoard => "pb_select_board",
            DriverCall::Init => "pb_init",
            DriverCall::CoreClock => "pb_core_clock",
            DriverCall::StartProgramming => "pb_start_programming",
            DriverCall::DefinePulse => "pb_inst_pbonly",
            DriverCall::Commit => "pb_commit",
            DriverCall::StopProgramming => "pb_stop_programming",
            DriverCall::Start => "pb_start",
            DriverCall::Stop => "pb_stop",
            DriverCall::Reset => "pb_reset",
            DriverCall::Close => "pb_close",
        };
        write!(f, "{name}")
    }
}

/// Opaque reference to a pulse defined during programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PulseHandle(pub usize);

pub trait PulserDriver {
    fn select_board(&mut self, board: i32) -> Status;
    fn init(&mut self) -> Status;
    fn set_core_clock(&mut self, freq_hz: f64);
    fn start_programming(&mut self, target: i32) -> Status;
    /// Defines one constant-output segment. Segments are committed in the order their
    /// handles are passed to [`PulserDriver::commit`].
    fn define_pulse(&mut self, flags: u32, start_ns: u64, duration_ns: u64) -> PulseHandle;
    fn commit(&mut self, pulses: &[PulseHandle], repeat: Repeat) -> Status;
    fn stop_programming(&mut self) -> Status;
    fn start(&mut self) -> Status;
    fn stop(&mut self) -> Status;
    fn reset(&mut self) -> Status;
    fn close(&mut self) -> Status;
    fn last_error(&mut self) -> String;
}

impl<D: PulserDriver + ?Sized> PulserDriver for Box<D> {
    fn select_board(&mut self, board: i32) -> Status {
        (**self).select_board(board)
    }
    fn init(&mut self) -> Status {
        (**self).init()
    }
    fn set_core_clock(&mut self, freq_hz: f64) {
        (**self).set_core_clock(freq_hz)
    }
    fn start_programming(&mut self, target: i32) -> Status {
        (**self).start_programming(target)
    }
    fn define_pulse(&mut self, flags: u32, start_ns: u64, duration_ns: u64) -> PulseHandle {
        (**self).define_pulse(flags, start_ns, duration_ns)
    }
    fn commit(&mut self, pulses: &[PulseHandle], repeat: Repeat) -> Status {
        (**self).commit(pulses, repeat)
    }
    fn stop_programming(&mut self) -> Status {
        (**self).stop_programming()
    }
    fn start(&mut self) -> Status {
        (**self).start()
    }
    fn stop(&mut self) -> Status {
        (**self).stop()
    }
    fn reset(&mut self) -> Status {
        (**self).reset()
    }
    fn close(&mut self) -> Status {
        (**self).close()
    }
    fn last_error(&mut self) -> String {
        (**self).last_error()
    }
}

/// A pulse as the fake board received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakePulse {
    pub flags: u32,
    pub start_ns: u64,
    pub duration_ns: u64,
}

/// Observable state of a [`FakeDriver`].
#[derive(Debug, Default)]
pub struct FakeBoard {
    /// Every call in the order it was made.
    pub calls: Vec<DriverCall>,
    pub selected_board: Option<i32>,
    pub core_clock_hz: Option<f64>,
    pub initialized: bool,
    /// Pulses defined since the last `start_programming`.
    pub pending: Vec<FakePulse>,
    /// Every committed pulse list, oldest first.
    pub committed: Vec<Vec<FakePulse>>,
    pub running: bool,
    failures: HashMap<DriverCall, Status>,
    last_error: String,
}

impl FakeBoard {
    /// The most recently committed program.
    pub fn program(&self) -> Option<&[FakePulse]> {
        self.committed.last().map(Vec::as_slice)
    }

    pub fn count(&self, call: DriverCall) -> usize {
        self.calls.iter().filter(|&&c| c == call).count()
    }
}

/// In-memory board. Clones share the same [`FakeBoard`], so a test can keep one clone
/// and hand the other to a session.
#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    board: Arc<Mutex<FakeBoard>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every future `call` return `code` (nonzero) until [`FakeDriver::clear_failures`].
    pub fn fail(&self, call: DriverCall, code: Status) {
        self.board.lock().failures.insert(call, code);
    }

    pub fn clear_failures(&self) {
        self.board.lock().failures.clear();
    }

    /// Runs `f` with the board state locked.
    pub fn inspect<T>(&self, f: impl FnOnce(&FakeBoard) -> T) -> T {
        f(&self.board.lock())
    }

    /// Records `call` and returns its scripted status.
    fn record(&self, call: DriverCall) -> (Status, parking_lot::MutexGuard<'_, FakeBoard>) {
        let mut board = self.board.lock();
        board.calls.push(call);
        let status = board.failures.get(&call).copied().unwrap_or(0);
        if status != 0 {
            board.last_error = format!("{call} rejected by fake board ({status})");
        }
        (status, board)
    }
}

impl PulserDriver for FakeDriver {
    fn select_board(&mut self, board_number: i32) -> Status {
        let (status, mut board) = self.record(DriverCall::SelectBoard);
        if status == 0 {
            board.selected_board = Some(board_number);
        }
        status
    }

    fn init(&mut self) -> Status {
        let (status, mut board) = self.record(DriverCall::Init);
        if status == 0 {
            board.initialized = true;
        }
        status
    }

    fn set_core_clock(&mut self, freq_hz: f64) {
        let (_, mut board) = self.record(DriverCall::CoreClock);
        board.core_clock_hz = Some(freq_hz);
    }

    fn start_programming(&mut self, _target: i32) -> Status {
        let (status, mut board) = self.record(DriverCall::StartProgramming);
        if status == 0 {
            board.pending.clear();
        }
        status
    }

    fn define_pulse(&mut self, flags: u32, start_ns: u64, duration_ns: u64) -> PulseHandle {
        let (_, mut board) = self.record(DriverCall::DefinePulse);
        board.pending.push(FakePulse {
            flags,
            start_ns,
            duration_ns,
        });
        PulseHandle(board.pending.len() - 1)
    }

    fn commit(&mut self, pulses: &[PulseHandle], _repeat: Repeat) -> Status {
        let (status, mut board) = self.record(DriverCall::Commit);
        if status == 0 {
            let program: Vec<FakePulse> = pulses
                .iter()
                .filter_map(|h| board.pending.get(h.0).copied())
                .collect();
            board.committed.push(program);
        }
        status
    }

    fn stop_programming(&mut self) -> Status {
        self.record(DriverCall::StopProgramming).0
    }

    fn start(&mut self) -> Status {
        let (status, mut board) = self.record(DriverCall::Start);
        if status == 0 {
            board.running = true;
        }
        status
    }

    fn stop(&mut self) -> Status {
        let (status, mut board) = self.record(DriverCall::Stop);
        if status == 0 {
            board.running = false;
        }
        status
    }

    fn reset(&mut self) -> Status {
        let (status, mut board) = self.record(DriverCall::Reset);
        if status == 0 {
            board.running = false;
        }
        status
    }

    fn close(&mut self) -> Status {
        let (status, mut board) = self.record(DriverCall::Close);
        if status == 0 {
            board.initialized = false;
        }
        status
    }

    fn last_error(&mut self) -> String {
        self.board.lock().last_error.clone()
    }
}
