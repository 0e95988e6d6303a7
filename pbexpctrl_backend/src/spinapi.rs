//! Minimal binding to the parts of the SpinCore SpinAPI C library this crate uses.
//!
//! Only compiled with the `spinapi` feature. The library is linked as `spinapi64` on
//! Windows and `spinapi` elsewhere; set `SPINAPI_LIB_DIR` if it is not on the default
//! linker path.
//!
//! SpinAPI has no notion of a pulse handle: instructions are written to the board as
//! they are issued. [`SpinApiDriver`] therefore buffers the pulses passed to
//! `define_pulse` and writes them during `commit`, each as a `CONTINUE` instruction
//! except the last, which branches back to address 0 to loop the cycle forever.
//!
//! The library keeps one implicit "current board" per process. Callers that drive more
//! than one board from different threads must serialize through
//! [`crate::utils::board_lock`].

use std::ffi::CStr;

use libc::{c_char, c_double, c_int, c_uint};
use pbcompiler_backend::Repeat;
use tracing::trace;

use crate::driver::{PulseHandle, PulserDriver, Status};

/// Continue to the next instruction.
const CONTINUE: c_int = 0;
/// Jump to the address in `inst_data`.
const BRANCH: c_int = 6;

#[cfg_attr(windows, link(name = "spinapi64"))]
#[cfg_attr(not(windows), link(name = "spinapi"))]
extern "C" {
    fn pb_select_board(board_num: c_int) -> c_int;
    fn pb_init() -> c_int;
    /// Clock frequency in MHz.
    fn pb_core_clock(clock_freq: c_double);
    fn pb_start_programming(device: c_int) -> c_int;
    /// Returns the address of the written instruction, negative on failure.
    fn pb_inst_pbonly(flags: c_uint, inst: c_int, inst_data: c_int, length: c_double) -> c_int;
    fn pb_stop_programming() -> c_int;
    fn pb_start() -> c_int;
    fn pb_stop() -> c_int;
    fn pb_reset() -> c_int;
    fn pb_close() -> c_int;
    fn pb_get_error() -> *const c_char;
}

/// The real board, through the vendor library.
#[derive(Debug, Default)]
pub struct SpinApiDriver {
    pending: Vec<(u32, u64)>,
}

impl SpinApiDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PulserDriver for SpinApiDriver {
    fn select_board(&mut self, board: i32) -> Status {
        unsafe { pb_select_board(board) }
    }

    fn init(&mut self) -> Status {
        unsafe { pb_init() }
    }

    fn set_core_clock(&mut self, freq_hz: f64) {
        unsafe { pb_core_clock(freq_hz / 1e6) }
    }

    fn start_programming(&mut self, target: i32) -> Status {
        self.pending.clear();
        unsafe { pb_start_programming(target) }
    }

    fn define_pulse(&mut self, flags: u32, _start_ns: u64, duration_ns: u64) -> PulseHandle {
        self.pending.push((flags, duration_ns));
        PulseHandle(self.pending.len() - 1)
    }

    fn commit(&mut self, pulses: &[PulseHandle], repeat: Repeat) -> Status {
        let Repeat::Infinite = repeat;
        for (i, handle) in pulses.iter().enumerate() {
            let Some(&(flags, duration_ns)) = self.pending.get(handle.0) else {
                return -1;
            };
            let (inst, inst_data) = if i + 1 == pulses.len() {
                (BRANCH, 0)
            } else {
                (CONTINUE, 0)
            };
            let addr = unsafe { pb_inst_pbonly(flags, inst, inst_data, duration_ns as c_double) };
            trace!(addr, flags, duration_ns, "pb_inst_pbonly");
            if addr < 0 {
                return addr;
            }
        }
        0
    }

    fn stop_programming(&mut self) -> Status {
        unsafe { pb_stop_programming() }
    }

    fn start(&mut self) -> Status {
        unsafe { pb_start() }
    }

    fn stop(&mut self) -> Status {
        unsafe { pb_stop() }
    }

    fn reset(&mut self) -> Status {
        unsafe { pb_reset() }
    }

    fn close(&mut self) -> Status {
        unsafe { pb_close() }
    }

    fn last_error(&mut self) -> String {
        let ptr = unsafe { pb_get_error() };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    }
}
