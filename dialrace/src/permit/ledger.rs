//! Request-local permit accounting.
//!
//! Both counters change in the same critical section, so the recycle/release
//! decision never observes one updated without the other.

use std::sync::Mutex as StdMutex;

/// What to do with a permit once its attempt finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the permit to the next waiting attempt.
    Recycle,
    /// Return the permit to the allocator.
    Release,
}

#[derive(Debug)]
struct Counts {
    remaining: usize,
    outstanding: usize,
}

/// Tracks addresses still to be attempted and permits still held by the request.
#[derive(Debug)]
pub struct PermitLedger {
    counts: StdMutex<Counts>,
}

impl PermitLedger {
    pub fn new(addresses: usize, permits: usize) -> Self {
        Self {
            counts: StdMutex::new(Counts {
                remaining: addresses,
                outstanding: permits,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counts> {
        match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Permit ledger mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Record one finished attempt and decide its permit's disposition.
    ///
    /// The permit is kept while at least as many addresses remain as permits
    /// are held; otherwise it goes back to the allocator and the request's
    /// footprint shrinks by one.
    pub fn complete_attempt(&self) -> Disposition {
        let mut counts = self.lock();
        counts.remaining = counts.remaining.saturating_sub(1);

        if counts.remaining >= counts.outstanding {
            Disposition::Recycle
        } else {
            counts.outstanding = counts.outstanding.saturating_sub(1);
            Disposition::Release
        }
    }

    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }
}
