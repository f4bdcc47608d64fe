//! Read-side critical sections backed by `crossbeam_epoch`.
//!
//! Readers never block: entering a section pins the current thread. A writer
//! publishes its change first and then calls [`ReadEpoch::synchronize`],
//! which returns only after every reader that could have observed the
//! previous value has left its section. Writers must be serialized by the
//! caller, and must not call `synchronize` from inside a section.

use crossbeam_epoch::{self as epoch, Guard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) struct ReadEpoch {
    spin_limit: u32,
    grace_periods: AtomicU64,
}

/// An active read section. Leaving it is dropping it.
pub(crate) struct ReadSection {
    _guard: Guard,
}

impl ReadEpoch {
    pub fn new(spin_limit: u32) -> Self {
        ReadEpoch {
            spin_limit,
            grace_periods: AtomicU64::new(0),
        }
    }

    pub fn enter(&self) -> ReadSection {
        ReadSection {
            _guard: epoch::pin(),
        }
    }

    /// Wait until all readers that entered before this call have left.
    ///
    /// The deferred signal only runs once the global epoch has moved past
    /// every thread pinned when it was queued.
    pub fn synchronize(&self) {
        let elapsed = Arc::new(AtomicBool::new(false));
        {
            let guard = epoch::pin();
            let signal = Arc::clone(&elapsed);
            guard.defer(move || signal.store(true, Ordering::Release));
            guard.flush();
        }

        let mut spins = 0u32;
        while !elapsed.load(Ordering::Acquire) {
            epoch::pin().flush();
            if spins < self.spin_limit {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        self.grace_periods.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    fn grace_periods(&self) -> u64 {
        self.grace_periods.load(Ordering::Relaxed)
    }
}
