//! Bounded writer slots with a wait timeout.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub(crate) struct WriterSlots {
    max: usize,
    active: Mutex<usize>,
    released: Condvar,
}

impl WriterSlots {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            active: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Take a slot, waiting at most `timeout` for one to free up.
    pub fn acquire(&self, timeout: Duration) -> Result<WriterGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut active = self.active.lock();
        while *active >= self.max {
            if self.released.wait_until(&mut active, deadline).timed_out() && *active >= self.max {
                return Err(Error::WriteTimeout(timeout));
            }
        }
        *active += 1;
        Ok(WriterGuard { slots: self })
    }

    /// Block until no writer holds a slot.
    pub fn wait_idle(&self) {
        let mut active = self.active.lock();
        while *active > 0 {
            self.released.wait(&mut active);
        }
    }

    fn release(&self) {
        let mut active = self.active.lock();
        *active -= 1;
        self.released.notify_all();
    }
}

pub(crate) struct WriterGuard<'a> {
    slots: &'a WriterSlots,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.slots.release();
    }
}
