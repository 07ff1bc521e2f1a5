//! One dial request: borrow permits, race attempts, tear down.
//!
//! Flow:
//! 1. Borrow up to one permit per address from the allocator
//! 2. Start one attempt per address; each waits for a permit before dialling
//! 3. Settle on the first success, on all failures, or on external cancellation
//! 4. Cancel the losers, drop unfinished attempts, release every permit
//!
//! Step 4 also runs when the request future is dropped: attempt state cancels
//! on drop, held permits release on drop, and the permit queue releases its
//! idle permits on drop.

use serde::Serialize;

use crate::attempt::{AttemptOutcome, AttemptState, run_attempt};
use crate::dial::{Dial, DialOptions};
use crate::error::{AttemptFailure, DialError};
use crate::permit::{PermitAllocator, PermitLedger, PermitQueue};
use crate::race::FirstSuccess;

/// How a request ended, per address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    /// Outcome for each address, by input position. Empty if no attempt started.
    pub attempts: Vec<AttemptOutcome>,
    /// Index of the winning address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<usize>,
    /// Permits borrowed from the allocator.
    pub permits_borrowed: usize,
}

impl RequestSummary {
    pub fn count(&self, outcome: AttemptOutcome) -> usize {
        self.attempts.iter().filter(|o| **o == outcome).count()
    }
}

enum Settlement<C> {
    Won(usize, C),
    Exhausted,
    Cancelled,
}

/// Dial `addresses` in parallel and return the first connection to succeed.
///
/// At most as many dials run at once as the allocator grants permits. Every
/// permit is back with the allocator by the time this returns.
///
/// An empty `addresses` fails with [`DialError::NoAddresses`] without asking
/// the allocator, so callers can tell it apart from an exhausted allocator
/// ([`DialError::NoPermitsAvailable`]).
pub async fn run<A, D, Al>(
    addresses: &[A],
    dialer: &D,
    allocator: &Al,
    options: DialOptions,
) -> Result<D::Connection, DialError<D::Error>>
where
    A: Sync,
    D: Dial<A> + ?Sized,
    Al: PermitAllocator + ?Sized,
{
    run_with_summary(addresses, dialer, allocator, options).await.0
}

/// Like [`run`], also reporting what happened to each address.
pub async fn run_with_summary<A, D, Al>(
    addresses: &[A],
    dialer: &D,
    allocator: &Al,
    options: DialOptions,
) -> (Result<D::Connection, DialError<D::Error>>, RequestSummary)
where
    A: Sync,
    D: Dial<A> + ?Sized,
    Al: PermitAllocator + ?Sized,
{
    if addresses.is_empty() {
        return (Err(DialError::NoAddresses), RequestSummary::default());
    }
    if options.cancel.is_cancelled() {
        return (Err(DialError::Cancelled), RequestSummary::default());
    }

    let budget = options.permit_budget(addresses.len());
    let Some(permits) = PermitQueue::borrow(allocator, budget) else {
        tracing::debug!(
            addresses = addresses.len(),
            requested = budget,
            "No dial permits available"
        );
        return (Err(DialError::NoPermitsAvailable), RequestSummary::default());
    };

    tracing::debug!(
        addresses = addresses.len(),
        permits = permits.borrowed(),
        "Starting dial request"
    );

    let ledger = PermitLedger::new(addresses.len(), permits.borrowed());
    let mut attempts: Vec<AttemptState> = (0..addresses.len())
        .map(|index| AttemptState::new(index, &options.cancel))
        .collect();

    let mut race = FirstSuccess::new(addresses.iter().zip(&attempts).map(|(address, attempt)| {
        run_attempt(
            attempt.index(),
            address,
            dialer,
            attempt.signal(),
            &permits,
            &ledger,
            options.attempt_timeout,
        )
    }));

    let settlement = tokio::select! {
        biased;

        _ = options.cancel.cancelled() => Settlement::Cancelled,
        winner = race.settle() => match winner {
            Some((index, connection)) => Settlement::Won(index, connection),
            None => Settlement::Exhausted,
        },
    };

    // Teardown.
    for (index, error) in race.failures() {
        attempts[*index].record(AttemptOutcome::from_failure(error));
    }
    let winner = match &settlement {
        Settlement::Won(index, _) => {
            let attempt = &mut attempts[*index];
            attempt.record(AttemptOutcome::Succeeded);
            attempt.disarm();
            Some(*index)
        }
        _ => None,
    };
    for attempt in attempts.iter_mut() {
        if Some(attempt.index()) != winner {
            attempt.cancel();
        }
    }
    let abandoned = race.abandon();
    let failures = race.into_failures();
    let permits_borrowed = permits.borrowed();
    drop(permits);

    let summary = RequestSummary {
        attempts: attempts.iter().map(AttemptState::outcome).collect(),
        winner,
        permits_borrowed,
    };
    tracing::debug!(
        winner = ?summary.winner,
        failed = summary.count(AttemptOutcome::Failed),
        cancelled = summary.count(AttemptOutcome::Cancelled),
        abandoned = abandoned.len(),
        "Dial request settled"
    );

    let result = match settlement {
        Settlement::Won(_, connection) => Ok(connection),
        Settlement::Cancelled => Err(DialError::Cancelled),
        Settlement::Exhausted => Err(DialError::AllDialsFailed {
            causes: failures
                .into_iter()
                .map(|(index, error)| AttemptFailure { index, error })
                .collect(),
        }),
    };
    (result, summary)
}
