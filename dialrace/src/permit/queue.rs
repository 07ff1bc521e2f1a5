//! Request-local permit queue with typestate for compile-time disposition safety.
//!
//! A permit taken from the queue is a `HeldPermit`. It leaves that state
//! exactly one way:
//! - `into_recycled()` puts it back on the queue for the next waiting attempt
//! - `into_released()` returns it to the allocator
//! - dropping it (attempt cancelled mid-dial) returns it to the allocator
//!
//! Dropping the queue returns every permit still queued. Between the two, each
//! borrowed permit reaches `release_permit` exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use super::limiter::PermitAllocator;

/// FIFO of idle permits borrowed for one dial request.
pub struct PermitQueue<Al: PermitAllocator> {
    allocator: Al,
    available_rx: Mutex<mpsc::Receiver<Al::Permit>>,
    available_tx: mpsc::Sender<Al::Permit>,
    borrowed: usize,
    queued: AtomicUsize,
    released: AtomicUsize,
}

impl<Al: PermitAllocator> PermitQueue<Al> {
    /// Borrow up to `max` permits from `allocator`.
    ///
    /// Returns `None` when the allocator grants nothing; there is then nothing
    /// to release.
    pub fn borrow(allocator: Al, max: usize) -> Option<Self> {
        let permits = allocator.borrow_permits(max);
        if permits.is_empty() {
            return None;
        }

        let borrowed = permits.len();
        let (tx, rx) = mpsc::channel(borrowed);
        let queue = Self {
            allocator,
            available_rx: Mutex::new(rx),
            available_tx: tx,
            borrowed,
            queued: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        };

        for permit in permits {
            queue.push(permit);
        }
        tracing::trace!(permits = borrowed, requested = max, "Seeded permit queue");
        Some(queue)
    }

    fn push(&self, permit: Al::Permit) {
        match self.available_tx.try_send(permit) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Release);
            }
            Err(e) => {
                // Capacity equals the borrow count, so this means a permit was
                // duplicated. Hand it back rather than leak it.
                tracing::error!("Permit queue full - releasing permit directly");
                self.release(e.into_inner());
            }
        }
    }

    fn release(&self, permit: Al::Permit) {
        self.allocator.release_permit(permit);
        self.released.fetch_add(1, Ordering::Release);
    }

    /// Wait for an idle permit. Waiters are served in the order they queued.
    pub async fn acquire(&self) -> Option<HeldPermit<'_, Al>> {
        let mut rx = self.available_rx.lock().await;
        let permit = rx.recv().await?;
        self.queued.fetch_sub(1, Ordering::Release);

        Some(HeldPermit {
            permit: Some(permit),
            queue: self,
        })
    }

    pub fn try_acquire(&self) -> Option<HeldPermit<'_, Al>> {
        let mut rx = self.available_rx.try_lock().ok()?;
        let permit = rx.try_recv().ok()?;
        self.queued.fetch_sub(1, Ordering::Release);

        Some(HeldPermit {
            permit: Some(permit),
            queue: self,
        })
    }

    /// Number of permits borrowed when the queue was seeded.
    pub fn borrowed(&self) -> usize {
        self.borrowed
    }

    /// Number of idle permits waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Number of permits already returned to the allocator.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }
}

impl<Al: PermitAllocator> Drop for PermitQueue<Al> {
    fn drop(&mut self) {
        let rx = self.available_rx.get_mut();
        let mut drained = 0;
        while let Ok(permit) = rx.try_recv() {
            self.allocator.release_permit(permit);
            drained += 1;
        }
        let released = self.released.load(Ordering::Acquire) + drained;
        tracing::trace!(
            drained,
            released,
            borrowed = self.borrowed,
            "Permit queue torn down"
        );
        if released != self.borrowed {
            tracing::error!(
                released,
                borrowed = self.borrowed,
                "Permit queue dropped with permits unaccounted for"
            );
        }
    }
}

/// A permit held by an attempt that is dialling.
#[must_use = "dropping a held permit releases it to the allocator"]
pub struct HeldPermit<'q, Al: PermitAllocator> {
    permit: Option<Al::Permit>,
    queue: &'q PermitQueue<Al>,
}

impl<Al: PermitAllocator> HeldPermit<'_, Al> {
    /// Put the permit back on the queue for the next waiting attempt.
    pub fn into_recycled(mut self) {
        if let Some(permit) = self.permit.take() {
            self.queue.push(permit);
            tracing::trace!(queued = self.queue.queued(), "Recycled permit");
        }
    }

    /// Return the permit to the allocator.
    pub fn into_released(mut self) {
        if let Some(permit) = self.permit.take() {
            self.queue.release(permit);
            tracing::trace!(released = self.queue.released(), "Released permit");
        }
    }
}

impl<Al: PermitAllocator> Drop for HeldPermit<'_, Al> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            tracing::trace!("Releasing permit held by abandoned attempt");
            self.queue.release(permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::LocalAllocator;

    #[tokio::test]
    async fn borrow_seeds_queue() {
        let allocator = LocalAllocator::new(4);
        let queue = PermitQueue::borrow(&allocator, 3).unwrap();

        assert_eq!(queue.borrowed(), 3);
        assert_eq!(queue.queued(), 3);
        assert_eq!(allocator.available(), 1);
    }

    #[tokio::test]
    async fn borrow_of_nothing_is_none() {
        let allocator = LocalAllocator::new(0);
        assert!(PermitQueue::borrow(&allocator, 3).is_none());
    }

    #[tokio::test]
    async fn recycled_permit_is_acquired_again() {
        let allocator = LocalAllocator::new(1);
        let queue = PermitQueue::borrow(&allocator, 1).unwrap();

        let permit = queue.acquire().await.unwrap();
        assert!(queue.try_acquire().is_none());

        permit.into_recycled();
        assert_eq!(queue.queued(), 1);
        assert!(queue.try_acquire().is_some());
    }

    #[tokio::test]
    async fn released_permit_returns_to_allocator() {
        let allocator = LocalAllocator::new(2);
        let queue = PermitQueue::borrow(&allocator, 2).unwrap();

        queue.acquire().await.unwrap().into_released();
        assert_eq!(allocator.available(), 1);
        assert_eq!(queue.released(), 1);
        assert_eq!(queue.queued(), 1);
    }

    #[tokio::test]
    async fn dropped_permit_returns_to_allocator() {
        let allocator = LocalAllocator::new(1);
        let queue = PermitQueue::borrow(&allocator, 1).unwrap();

        {
            let _held = queue.acquire().await.unwrap();
        }

        assert_eq!(allocator.available(), 1);
        assert!(queue.try_acquire().is_none());
    }

    #[tokio::test]
    async fn dropping_queue_releases_idle_permits() {
        let allocator = LocalAllocator::new(3);
        {
            let queue = PermitQueue::borrow(&allocator, 3).unwrap();
            queue.acquire().await.unwrap().into_released();
            assert_eq!(allocator.available(), 1);
        }
        assert_eq!(allocator.available(), 3);
    }

    #[tokio::test]
    async fn waiters_are_served_in_queue_order() {
        let allocator = LocalAllocator::new(1);
        let queue = PermitQueue::borrow(&allocator, 1).unwrap();
        let held = queue.acquire().await.unwrap();

        let order = std::sync::Mutex::new(Vec::new());
        let waiter = |n: usize| {
            let queue = &queue;
            let order = &order;
            async move {
                let permit = queue.acquire().await.unwrap();
                order.lock().unwrap().push(n);
                tokio::task::yield_now().await;
                permit.into_recycled();
            }
        };

        let release = async {
            tokio::task::yield_now().await;
            held.into_recycled();
        };

        futures::join!(waiter(1), waiter(2), waiter(3), release);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }
}
