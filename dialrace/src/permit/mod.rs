//! Dial permits.
//!
//! A request borrows a batch of permits from a process-wide `PermitAllocator`
//! and cycles them through a local `PermitQueue`:
//! - `PermitQueue` → `HeldPermit` via `acquire()`
//! - `HeldPermit` → queue via `into_recycled()`
//! - `HeldPermit` → allocator via `into_released()` or drop
//! - queue → allocator when the queue is dropped

mod ledger;
mod limiter;
mod queue;

pub use ledger::{Disposition, PermitLedger};
pub use limiter::{DialPermit, LocalAllocator, PermitAllocator, PermitId};
pub use queue::{HeldPermit, PermitQueue};
