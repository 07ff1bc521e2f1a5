//! Process-wide dial permit allocation.
//!
//! `PermitAllocator` is the contract a dial request borrows against. The
//! budget it hands out is shared by every request in the process; a request
//! only ever borrows and returns.
//!
//! `LocalAllocator` is an in-process implementation with a global capacity and
//! a per-request cap.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Source of dial permits shared across requests.
///
/// `borrow_permits` may return fewer permits than asked for, including none.
/// Every permit it returns must be passed to `release_permit` exactly once.
pub trait PermitAllocator {
    type Permit;

    fn borrow_permits(&self, max: usize) -> Vec<Self::Permit>;

    fn release_permit(&self, permit: Self::Permit);
}

impl<T: PermitAllocator + ?Sized> PermitAllocator for &T {
    type Permit = T::Permit;

    fn borrow_permits(&self, max: usize) -> Vec<Self::Permit> {
        (**self).borrow_permits(max)
    }

    fn release_permit(&self, permit: Self::Permit) {
        (**self).release_permit(permit)
    }
}

/// Unique identifier for a dial permit.
///
/// UUID v4 so a stale or forged permit can never alias a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermitId(uuid::Uuid);

impl PermitId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for PermitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PermitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A permit handed out by [`LocalAllocator`]. Move-only.
#[derive(Debug, PartialEq, Eq)]
pub struct DialPermit {
    id: PermitId,
}

impl DialPermit {
    pub fn id(&self) -> PermitId {
        self.id
    }
}

/// In-process permit allocator.
///
/// Hands out at most `capacity` permits across all requests and at most
/// `per_request_limit` to any single borrow.
pub struct LocalAllocator {
    capacity: usize,
    per_request_limit: usize,
    available: AtomicUsize,
    /// Permits currently on loan. Guards against double release.
    borrowed: StdMutex<HashSet<PermitId>>,
}

impl LocalAllocator {
    pub const DEFAULT_CAPACITY: usize = 100;
    pub const DEFAULT_PER_REQUEST_LIMIT: usize = 4;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            per_request_limit: Self::DEFAULT_PER_REQUEST_LIMIT,
            available: AtomicUsize::new(capacity),
            borrowed: StdMutex::new(HashSet::with_capacity(capacity)),
        }
    }

    pub fn with_per_request_limit(mut self, limit: usize) -> Self {
        self.per_request_limit = limit;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn per_request_limit(&self) -> usize {
        self.per_request_limit
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    fn lock_borrowed(&self) -> std::sync::MutexGuard<'_, HashSet<PermitId>> {
        match self.borrowed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Permit ledger mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for LocalAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl PermitAllocator for LocalAllocator {
    type Permit = DialPermit;

    fn borrow_permits(&self, max: usize) -> Vec<DialPermit> {
        let wanted = max.min(self.per_request_limit);
        let mut borrowed = self.lock_borrowed();

        let granted = wanted.min(self.available());
        self.available.fetch_sub(granted, Ordering::Release);

        let permits: Vec<DialPermit> = (0..granted)
            .map(|_| {
                let id = PermitId::new();
                borrowed.insert(id);
                DialPermit { id }
            })
            .collect();

        tracing::trace!(
            requested = max,
            granted,
            available = self.available(),
            "Borrowed dial permits"
        );
        permits
    }

    fn release_permit(&self, permit: DialPermit) {
        let mut borrowed = self.lock_borrowed();
        if !borrowed.remove(&permit.id) {
            tracing::warn!(permit = %permit.id, "Released permit that is not on loan - ignoring");
            return;
        }
        self.available.fetch_add(1, Ordering::Release);
        tracing::trace!(permit = %permit.id, available = self.available(), "Released dial permit");
    }
}
