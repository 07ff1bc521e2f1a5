#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dialrace::{CancellationToken, Dial, DialPermit, LocalAllocator, PermitAllocator};

pub type Outcome = Result<&'static str, &'static str>;

/// Dials address `i` by sleeping `plan[i].0` ms and returning `plan[i].1`.
pub struct ScriptedDialer {
    plan: Vec<(u64, Outcome)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    signals: Mutex<Vec<(usize, CancellationToken)>>,
}

impl ScriptedDialer {
    pub fn new(plan: Vec<(u64, Outcome)>) -> Self {
        Self {
            plan,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn addresses(&self) -> Vec<usize> {
        (0..self.plan.len()).collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn dialled(&self) -> Vec<usize> {
        self.signals.lock().unwrap().iter().map(|(i, _)| *i).collect()
    }

    pub fn signal(&self, address: usize) -> Option<CancellationToken> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .find(|(i, _)| *i == address)
            .map(|(_, s)| s.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dial<usize> for ScriptedDialer {
    type Connection = &'static str;
    type Error = &'static str;

    async fn dial(&self, address: &usize, cancel: CancellationToken) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        self.signals.lock().unwrap().push((*address, cancel.clone()));

        let (delay, outcome) = self.plan[*address];
        tokio::select! {
            _ = cancel.cancelled() => Err("cancelled"),
            _ = tokio::time::sleep(Duration::from_millis(delay)) => outcome,
        }
    }
}

/// Counts every borrow and release passing through to a `LocalAllocator`.
pub struct CountingAllocator {
    inner: LocalAllocator,
    borrowed: AtomicUsize,
    released: AtomicUsize,
}

impl CountingAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LocalAllocator::new(capacity).with_per_request_limit(capacity),
            borrowed: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn borrowed(&self) -> usize {
        self.borrowed.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.inner.available()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl PermitAllocator for CountingAllocator {
    type Permit = DialPermit;

    fn borrow_permits(&self, max: usize) -> Vec<DialPermit> {
        let permits = self.inner.borrow_permits(max);
        self.borrowed.fetch_add(permits.len(), Ordering::SeqCst);
        permits
    }

    fn release_permit(&self, permit: DialPermit) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release_permit(permit);
    }
}
