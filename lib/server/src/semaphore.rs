//! A capacity-1 counting semaphore backed by `parking_lot`, standing in
//! for the shutdown semaphore described in §5: released by the last
//! read loop to exit while the owner is in the `Stopping` state.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct Semaphore {
    count: Mutex<isize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: isize) -> Self {
        Semaphore {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }

    /// Blocks until a permit is available or `timeout` elapses. Returns
    /// true iff a permit was acquired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            return true;
        }
        let result = self.cond.wait_for(&mut count, timeout);
        if !result.timed_out() && *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_times_out_with_no_permits() {
        let sem = Semaphore::new(0);
        assert!(!sem.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn release_unblocks_a_waiter() {
        let sem = Semaphore::new(0);
        assert!(!sem.wait_timeout(Duration::from_millis(1)));
        sem.release();
        assert!(sem.wait_timeout(Duration::from_millis(20)));
    }
}
