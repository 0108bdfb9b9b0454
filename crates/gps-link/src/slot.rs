//! Single-slot rendezvous between a waiting caller and the reader task
//!
//! Each resource (waypoints, PVT, screenshot, ...) owns one [`ResultSlot`].
//! A caller acquires the slot, which registers it as the waiter, sends its
//! request and waits. The reader task delivers the result when the device
//! answers. Only one caller per slot waits at a time; others queue on the
//! slot's gate. A result arriving with nobody waiting is dropped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, trace};

/// A typed result slot for one resource
#[derive(Debug)]
pub struct ResultSlot<T> {
    name: &'static str,
    gate: AsyncMutex<()>,
    waiter: Mutex<Option<oneshot::Sender<T>>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl<T> ResultSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            gate: AsyncMutex::new(()),
            waiter: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take the slot and register as its waiter
    pub async fn acquire(&self) -> SlotGuard<'_, T> {
        let gate = self.gate.lock().await;
        let (tx, rx) = oneshot::channel();
        *self.lock_waiter() = Some(tx);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            // Dropping the sender makes the wait return at once
            self.lock_waiter().take();
        }
        SlotGuard {
            slot: self,
            _gate: gate,
            rx,
        }
    }

    /// Acquire, run the request, then wait for the result
    ///
    /// A zero `timeout` waits until a result arrives or the slot closes.
    pub async fn exchange<F, Fut, E>(&self, timeout: Duration, request: F) -> Result<Option<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let guard = self.acquire().await;
        request().await?;
        Ok(guard.wait(timeout).await)
    }

    /// Hand a result to the current waiter; false when nobody was waiting
    pub fn deliver(&self, value: T) -> bool {
        match self.lock_waiter().take() {
            Some(tx) => {
                trace!("Delivering {} result", self.name);
                tx.send(value).is_ok()
            }
            None => {
                debug!("Dropping {} result, nobody waiting", self.name);
                false
            }
        }
    }

    /// Whether a caller is currently waiting
    pub fn is_waiting(&self) -> bool {
        self.lock_waiter().is_some()
    }

    /// Number of acquisitions so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Wake the current waiter with no result and refuse future waits
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.lock_waiter().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock_waiter(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<T>>> {
        self.waiter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on a slot with a registered waiter
pub struct SlotGuard<'a, T> {
    slot: &'a ResultSlot<T>,
    _gate: MutexGuard<'a, ()>,
    rx: oneshot::Receiver<T>,
}

impl<T> SlotGuard<'_, T> {
    /// Wait for the result; `None` on timeout or close
    pub async fn wait(mut self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return (&mut self.rx).await.ok();
        }
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(result) => result.ok(),
            Err(_) => {
                debug!("Timed out waiting for {} after {:?}", self.slot.name, timeout);
                None
            }
        }
    }
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        // Still holding the gate, so the waiter is ours
        self.slot.lock_waiter().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_delivery_reaches_waiter() {
        let slot = Arc::new(ResultSlot::<u32>::new("serial"));
        let s = slot.clone();
        let result = slot
            .exchange(Duration::from_secs(1), || async move {
                assert!(s.deliver(42));
                Ok::<_, ()>(())
            })
            .await;
        assert_eq!(result, Ok(Some(42)));
        assert!(!slot.is_waiting());
    }

    #[tokio::test]
    async fn test_delivery_without_waiter_is_dropped() {
        let slot = ResultSlot::<u32>::new("serial");
        assert!(!slot.deliver(7));
        let result = slot
            .exchange(Duration::from_millis(10), || async { Ok::<_, ()>(()) })
            .await;
        assert_eq!(result, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_none() {
        let slot = ResultSlot::<u32>::new("pvt");
        let guard = slot.acquire().await;
        assert!(slot.is_waiting());
        assert_eq!(guard.wait(Duration::from_secs(2)).await, None);
        assert!(!slot.is_waiting());
    }

    #[tokio::test]
    async fn test_close_unblocks_forever_wait() {
        let slot = Arc::new(ResultSlot::<u32>::new("tracks"));
        let s = slot.clone();
        let waiter = tokio::spawn(async move {
            s.exchange(Duration::ZERO, || async { Ok::<_, ()>(()) }).await
        });
        while !slot.is_waiting() {
            tokio::task::yield_now().await;
        }
        slot.close();
        assert_eq!(waiter.await.unwrap(), Ok(None));

        // Later waits return at once
        let later = slot.exchange(Duration::ZERO, || async { Ok::<_, ()>(()) }).await;
        assert_eq!(later, Ok(None));
    }

    #[tokio::test]
    async fn test_request_error_releases_slot() {
        let slot = ResultSlot::<u32>::new("file");
        let result = slot
            .exchange(Duration::ZERO, || async { Err::<(), _>("write failed") })
            .await;
        assert_eq!(result, Err("write failed"));
        assert!(!slot.is_waiting());
        assert_eq!(slot.generation(), 1);
    }

    #[tokio::test]
    async fn test_second_caller_queues_behind_first() {
        let slot = Arc::new(ResultSlot::<u32>::new("waypoints"));
        let first = slot.acquire().await;
        let s = slot.clone();
        let second = tokio::spawn(async move {
            s.exchange(Duration::from_secs(5), || async { Ok::<_, ()>(()) })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(slot.generation(), 1);

        assert!(slot.deliver(1));
        assert_eq!(first.wait(Duration::from_secs(1)).await, Some(1));

        while slot.generation() < 2 || !slot.is_waiting() {
            tokio::task::yield_now().await;
        }
        assert!(slot.deliver(2));
        assert_eq!(second.await.unwrap(), Ok(Some(2)));
    }
}
