//! Latest-value queue
//!
//! Holds at most one pending value. Enqueueing replaces whatever was
//! pending, so a slow consumer only ever sees the most recent state.

use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
pub struct AsyncQueue<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(None), notify: Notify::new() }
    }

    /// Replace the pending value and wake the consumer
    pub fn enqueue(&self, value: T) {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value);
        self.notify.notify_one();
    }

    /// Wait for and take the pending value
    pub async fn dequeue(&self) -> T {
        loop {
            if let Some(value) = self.try_dequeue() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn keeps_only_latest_value() {
        let queue = AsyncQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.dequeue().await, 3);
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = Arc::new(AsyncQueue::new());
        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());
        queue.enqueue("ready");
        assert_eq!(consumer.await.unwrap(), "ready");
    }

    #[tokio::test]
    async fn stale_wakeup_does_not_return_early() {
        let queue = AsyncQueue::new();
        queue.enqueue(());
        queue.try_dequeue();
        let waited = tokio::time::timeout(Duration::from_millis(50), queue.dequeue()).await;
        assert!(waited.is_err());
    }
}
