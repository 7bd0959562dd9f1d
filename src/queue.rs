//! Bounded in-memory statement queue
//!
//! A Mutex-guarded `VecDeque` with a `Notify` for wakeups. Enqueue never
//! blocks and reports rejection at capacity; dequeue waits up to a deadline
//! for an item to arrive.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Bounded FIFO queue shared between producers and the write worker
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Maximum number of items the queue accepts
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an item; returns `false` without mutating when full
    pub async fn enqueue(&self, item: T) -> bool {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
        true
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the deadline passes with the queue still empty.
    pub async fn dequeue(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for a wakeup before re-checking, so a notify between
            // the check and the wait is not lost.
            let notified = self.notify.notified();
            if let Some(item) = self.items.lock().await.pop_front() {
                return Some(item);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.items.lock().await.pop_front();
            }
        }
    }

    /// Remove and return every queued item, oldest first
    pub async fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock().await;
        items.drain(..).collect()
    }

    /// Discard every queued item; returns how many were dropped
    pub async fn wipeout(&self) -> usize {
        let mut items = self.items.lock().await;
        let dropped = items.len();
        items.clear();
        dropped
    }

    /// Current number of queued items
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Whether the queue is currently empty
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedQueue::new(8);
        assert!(queue.enqueue(1).await);
        assert!(queue.enqueue(2).await);
        assert!(queue.enqueue(3).await);

        assert_eq!(queue.dequeue(Duration::from_millis(10)).await, Some(1));
        assert_eq!(queue.dequeue(Duration::from_millis(10)).await, Some(2));
        assert_eq!(queue.dequeue(Duration::from_millis(10)).await, Some(3));
    }

    #[tokio::test]
    async fn test_rejects_at_capacity() {
        let queue = BoundedQueue::new(2);
        assert!(queue.enqueue("a").await);
        assert!(queue.enqueue("b").await);
        assert!(!queue.enqueue("c").await);
        assert_eq!(queue.len().await, 2);

        // Rejection drops the item, not an older one.
        assert_eq!(queue.dequeue(Duration::from_millis(10)).await, Some("a"));
    }

    #[tokio::test]
    async fn test_dequeue_times_out_empty() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(4);
        let start = std::time::Instant::now();
        assert_eq!(queue.dequeue(Duration::from_millis(50)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(BoundedQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.enqueue(99).await);

        let got = consumer.await.expect("task");
        assert_eq!(got, Some(99));
    }

    #[tokio::test]
    async fn test_drain_and_wipeout() {
        let queue = BoundedQueue::new(8);
        for n in 0..5 {
            assert!(queue.enqueue(n).await);
        }

        let drained = queue.drain().await;
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty().await);

        for n in 0..3 {
            assert!(queue.enqueue(n).await);
        }
        assert_eq!(queue.wipeout().await, 3);
        assert_eq!(queue.len().await, 0);
    }
}
