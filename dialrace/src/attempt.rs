//! Per-address attempt state and the attempt worker.
//!
//! Each address gets a child of the request's external cancellation token.
//! Cancelling the child stops only that attempt; cancelling the external token
//! stops them all. The child is the signal handed to the dialer.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::dial::Dial;
use crate::error::AttemptError;
use crate::permit::{Disposition, PermitAllocator, PermitLedger, PermitQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal outcome for an attempt that ended with `error`.
    pub(crate) fn from_failure<E>(error: &AttemptError<E>) -> Self {
        if error.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Failed
        }
    }
}

/// Bookkeeping for the attempt on one address.
///
/// Dropping the state cancels the attempt unless it was disarmed as the winner.
pub(crate) struct AttemptState {
    index: usize,
    cancel: CancellationToken,
    guard: Option<DropGuard>,
    outcome: AttemptOutcome,
}

impl AttemptState {
    pub fn new(index: usize, external: &CancellationToken) -> Self {
        let cancel = external.child_token();
        let guard = cancel.clone().drop_guard();
        Self {
            index,
            cancel,
            guard: Some(guard),
            outcome: AttemptOutcome::Pending,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Combined signal: fires when this attempt or the whole request is cancelled.
    pub fn signal(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn outcome(&self) -> AttemptOutcome {
        self.outcome
    }

    pub fn record(&mut self, outcome: AttemptOutcome) {
        if self.outcome.is_terminal() {
            tracing::error!(
                attempt = self.index,
                previous = self.outcome.as_str(),
                next = outcome.as_str(),
                "Attempt outcome recorded twice"
            );
            return;
        }
        self.outcome = outcome;
    }

    /// Cancel a losing attempt. Idempotent.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if !self.outcome.is_terminal() {
            self.outcome = AttemptOutcome::Cancelled;
        }
    }

    /// Keep the winner's signal from firing when the request is torn down.
    pub fn disarm(&mut self) {
        if let Some(guard) = self.guard.take() {
            let _ = guard.disarm();
        }
    }
}

/// Wait for a permit, dial, then hand the permit on or back.
pub(crate) async fn run_attempt<A, D, Al>(
    index: usize,
    address: &A,
    dialer: &D,
    signal: CancellationToken,
    permits: &PermitQueue<Al>,
    ledger: &PermitLedger,
    timeout: Option<Duration>,
) -> Result<D::Connection, AttemptError<D::Error>>
where
    A: Sync + ?Sized,
    D: Dial<A> + ?Sized,
    Al: PermitAllocator,
{
    let Some(permit) = permits.acquire().await else {
        // The queue owns a sender, so it never closes while attempts run.
        tracing::error!(attempt = index, "Permit queue closed while waiting");
        return Err(AttemptError::Cancelled);
    };

    let result = if signal.is_cancelled() {
        tracing::debug!(attempt = index, "Attempt cancelled before dialling");
        Err(AttemptError::Cancelled)
    } else {
        tracing::debug!(attempt = index, "Dialling");
        dial_once(dialer, address, signal, timeout).await
    };

    match ledger.complete_attempt() {
        Disposition::Recycle => permit.into_recycled(),
        Disposition::Release => permit.into_released(),
    }

    match &result {
        Ok(_) => tracing::debug!(attempt = index, "Dial succeeded"),
        Err(AttemptError::TimedOut(limit)) => {
            tracing::debug!(attempt = index, timeout = ?limit, "Dial timed out")
        }
        Err(_) => tracing::debug!(attempt = index, "Dial failed"),
    }
    result
}

async fn dial_once<A, D>(
    dialer: &D,
    address: &A,
    signal: CancellationToken,
    timeout: Option<Duration>,
) -> Result<D::Connection, AttemptError<D::Error>>
where
    A: Sync + ?Sized,
    D: Dial<A> + ?Sized,
{
    let Some(limit) = timeout else {
        return dialer.dial(address, signal).await.map_err(AttemptError::Dial);
    };

    match tokio::time::timeout(limit, dialer.dial(address, signal.clone())).await {
        Ok(result) => result.map_err(AttemptError::Dial),
        Err(_) => {
            signal.cancel();
            Err(AttemptError::TimedOut(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_is_terminal() {
        assert!(!AttemptOutcome::Pending.is_terminal());
        assert!(AttemptOutcome::Succeeded.is_terminal());
        assert!(AttemptOutcome::Failed.is_terminal());
        assert!(AttemptOutcome::Cancelled.is_terminal());
    }

    #[test]
    fn skipped_attempt_counts_as_cancelled() {
        let cancelled: AttemptError<&str> = AttemptError::Cancelled;
        assert_eq!(
            AttemptOutcome::from_failure(&cancelled),
            AttemptOutcome::Cancelled
        );

        let refused: AttemptError<&str> = AttemptError::Dial("refused");
        assert_eq!(AttemptOutcome::from_failure(&refused), AttemptOutcome::Failed);

        let timed_out: AttemptError<&str> = AttemptError::TimedOut(Duration::from_secs(1));
        assert_eq!(AttemptOutcome::from_failure(&timed_out), AttemptOutcome::Failed);
    }

    #[test]
    fn outcome_serializes_lowercase() {
        insta::assert_json_snapshot!(
            [
                AttemptOutcome::Pending,
                AttemptOutcome::Succeeded,
                AttemptOutcome::Failed,
                AttemptOutcome::Cancelled,
            ],
            @r#"
        [
          "pending",
          "succeeded",
          "failed",
          "cancelled"
        ]
        "#
        );
    }

    #[test]
    fn external_cancel_reaches_every_attempt() {
        let external = CancellationToken::new();
        let a = AttemptState::new(0, &external);
        let b = AttemptState::new(1, &external);

        external.cancel();
        assert!(a.signal().is_cancelled());
        assert!(b.signal().is_cancelled());
    }

    #[test]
    fn attempt_cancel_is_isolated_and_idempotent() {
        let external = CancellationToken::new();
        let mut a = AttemptState::new(0, &external);
        let b = AttemptState::new(1, &external);

        a.cancel();
        a.cancel();
        assert!(a.signal().is_cancelled());
        assert!(!b.signal().is_cancelled());
        assert!(!external.is_cancelled());
        assert_eq!(a.outcome(), AttemptOutcome::Cancelled);
    }

    #[test]
    fn cancel_keeps_recorded_outcome() {
        let external = CancellationToken::new();
        let mut a = AttemptState::new(0, &external);
        a.record(AttemptOutcome::Failed);
        a.cancel();
        assert_eq!(a.outcome(), AttemptOutcome::Failed);
    }

    #[test]
    fn dropping_state_cancels_unless_disarmed() {
        let external = CancellationToken::new();

        let loser = AttemptState::new(0, &external);
        let loser_signal = loser.signal();
        drop(loser);
        assert!(loser_signal.is_cancelled());

        let mut winner = AttemptState::new(1, &external);
        let winner_signal = winner.signal();
        winner.disarm();
        drop(winner);
        assert!(!winner_signal.is_cancelled());
    }
}
