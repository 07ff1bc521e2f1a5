//! dialrace: race dials to one peer across its candidate addresses.
//!
//! A request borrows permits from a shared [`PermitAllocator`], dials
//! addresses in parallel within that budget, returns the first connection to
//! succeed and cancels the rest. Every borrowed permit goes back to the
//! allocator exactly once, whatever the outcome.

mod attempt;
mod race;
mod request;

pub mod dial;
pub mod error;
pub mod logging;
pub mod permit;
pub mod tcp;

pub use attempt::AttemptOutcome;
pub use dial::{CancellationToken, Dial, DialOptions};
pub use error::{AttemptError, AttemptFailure, ConfigError, DialError};
pub use permit::{DialPermit, LocalAllocator, PermitAllocator, PermitId};
pub use request::{RequestSummary, run, run_with_summary};
pub use tcp::TcpDialer;
