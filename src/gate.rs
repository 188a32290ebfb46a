//! Bounded dispatch gate.
//!
//! A counting semaphore capping how many chunks are outstanding at the
//! worker. A [`Slot`] is taken before a chunk is dispatched and dropped
//! when that chunk's result arrives; dropping the slot is the release.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Returned by [`Gate::acquire`] once the gate has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dispatch gate closed")]
pub struct GateClosed;

/// Largest capacity a gate can hold and still drain in one request.
pub const MAX_CAPACITY: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

#[derive(Clone, Debug)]
pub struct Gate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One reserved dispatch. Releases on drop.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl Gate {
    /// Capacities above [`MAX_CAPACITY`] are clamped to it.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CAPACITY);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Slot, GateClosed> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)?;
        Ok(Slot { _permit: permit })
    }

    /// Slots currently held.
    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Wait until every slot has been released.
    ///
    /// Returns immediately with `Err` if the gate is (or becomes) closed.
    pub async fn drain(&self) -> Result<(), GateClosed> {
        // `new` keeps capacity within u32.
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        let permits = self
            .semaphore
            .acquire_many(all)
            .await
            .map_err(|_| GateClosed)?;
        drop(permits);
        Ok(())
    }

    /// Wake every waiter with [`GateClosed`]. Held slots stay valid until
    /// dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn caps_outstanding_slots() {
        let gate = Gate::new(2);
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
        assert!(blocked.is_err());

        drop(a);
        assert_eq!(gate.in_flight(), 1);
        let _c = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let gate = Gate::new(1);
        let _held = gate.acquire().await.unwrap();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::task::yield_now().await;
        gate.close();
        assert_eq!(waiter.await.unwrap().unwrap_err(), GateClosed);
        assert!(gate.is_closed());
    }

    #[tokio::test]
    async fn drain_waits_for_release() {
        let gate = Gate::new(3);
        let slot = gate.acquire().await.unwrap();
        let drained = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());
        drop(slot);
        drained.await.unwrap().unwrap();
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn oversized_capacity_is_clamped() {
        let gate = Gate::new(usize::MAX);
        assert_eq!(gate.capacity(), MAX_CAPACITY);
        assert!(u32::try_from(gate.capacity()).is_ok());
    }

    #[tokio::test]
    async fn drain_fails_once_closed() {
        let gate = Gate::new(1);
        let _held = gate.acquire().await.unwrap();
        gate.close();
        assert!(gate.drain().await.is_err());
    }
}
