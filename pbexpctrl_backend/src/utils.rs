use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// Process-wide lock for one board number.
///
/// The driver keeps a single implicit "selected board", and every session operation
/// opens and closes the board on its own, so two sessions on the same board must not
/// interleave. [`crate::device::DeviceSession`] holds this lock for the duration of each
/// transaction. Sessions on different boards do not contend.
pub fn board_lock(board: i32) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<i32, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS
        .get_or_init(Default::default)
        .lock()
        .entry(board)
        .or_default()
        .clone()
}

#[cfg(test)]
mod test {
    use crate::utils::*;

    #[test]
    fn one_lock_per_board() {
        assert!(Arc::ptr_eq(&board_lock(7), &board_lock(7)));
        assert!(!Arc::ptr_eq(&board_lock(7), &board_lock(8)));

        let lock = board_lock(9);
        let _held = lock.lock();
        assert!(board_lock(9).try_lock().is_none());
        assert!(board_lock(10).try_lock().is_some());
    }
}
