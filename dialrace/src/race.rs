//! First-success race over attempt workers.
//!
//! Workers are polled in start order on every wake. The first one to finish
//! with `Ok` wins; when several finish within the same poll the lowest index
//! wins. Failures are kept in the order they were observed. The race fails
//! only once every worker has failed.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pub(crate) struct FirstSuccess<F, E> {
    workers: Vec<Option<Pin<Box<F>>>>,
    failures: Vec<(usize, E)>,
}

impl<F, T, E> FirstSuccess<F, E>
where
    F: Future<Output = Result<T, E>>,
{
    pub fn new(workers: impl IntoIterator<Item = F>) -> Self {
        let workers: Vec<_> = workers.into_iter().map(|w| Some(Box::pin(w))).collect();
        let failures = Vec::with_capacity(workers.len());
        Self { workers, failures }
    }

    /// `Ready(Some(..))` with the winner, or `Ready(None)` once every worker failed.
    pub fn poll_settle(&mut self, cx: &mut Context<'_>) -> Poll<Option<(usize, T)>> {
        for (index, slot) in self.workers.iter_mut().enumerate() {
            let Some(worker) = slot.as_mut() else {
                continue;
            };
            match worker.as_mut().poll(cx) {
                Poll::Ready(Ok(value)) => {
                    *slot = None;
                    return Poll::Ready(Some((index, value)));
                }
                Poll::Ready(Err(e)) => {
                    *slot = None;
                    self.failures.push((index, e));
                }
                Poll::Pending => {}
            }
        }

        if self.running() == 0 {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }

    pub async fn settle(&mut self) -> Option<(usize, T)> {
        futures::future::poll_fn(|cx| self.poll_settle(cx)).await
    }

    /// Number of workers that have not finished.
    pub fn running(&self) -> usize {
        self.workers.iter().filter(|w| w.is_some()).count()
    }

    pub fn failures(&self) -> &[(usize, E)] {
        &self.failures
    }

    /// Drop every unfinished worker, returning their indices.
    pub fn abandon(&mut self) -> Vec<usize> {
        self.workers
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|_| index))
            .collect()
    }

    pub fn into_failures(self) -> Vec<(usize, E)> {
        self.failures
    }
}
