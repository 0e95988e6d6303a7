//! Error taxonomy for board sessions and sequence variants.

use pbcompiler_backend::TimingValidationError;
use thiserror::Error;

use crate::driver::{DriverCall, Status};
use crate::device::SessionState;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PulserError {
    /// The board could not be selected or initialized. Raised by `open` only, after a
    /// best-effort close.
    #[error("failed to initialize PulseBlaster board {board}: {code}: {message}")]
    Initialization {
        board: i32,
        code: Status,
        message: String,
    },

    /// A driver call on an opened board returned a nonzero status.
    ///
    /// `cause` carries an earlier failure this one followed from, e.g. the
    /// initialization error that triggered the failing close.
    #[error("{call} failed: {code}: {message}")]
    Operation {
        call: DriverCall,
        code: Status,
        message: String,
        #[source]
        cause: Option<Box<PulserError>>,
    },

    #[error(transparent)]
    Timing(#[from] TimingValidationError),

    #[error("cannot {op} while the session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
}

impl PulserError {
    /// Driver status code, if the error came from the driver.
    pub fn code(&self) -> Option<Status> {
        match self {
            PulserError::Initialization { code, .. } | PulserError::Operation { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// The failure this error followed from, if any.
    pub fn cause(&self) -> Option<&PulserError> {
        match self {
            PulserError::Operation {
                cause: Some(cause), ..
            } => Some(cause),
            _ => None,
        }
    }
}

pub type Result<T, E = PulserError> = std::result::Result<T, E>;
