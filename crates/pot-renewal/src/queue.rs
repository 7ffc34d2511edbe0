/// Refresh request queue: unbounded FIFO of paths awaiting renewal.
///
/// Duplicates are kept: a path enqueued twice is renewed twice, one after
/// the other. Every enqueue wakes one waiter of [`RefreshQueue::next`].
use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::types::PathId;
use crate::util::lock;

#[derive(Debug, Default)]
pub struct RefreshQueue {
    items: Mutex<VecDeque<PathId>>,
    notify: Notify,
}

impl RefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path to the tail and wake the worker.
    pub fn enqueue(&self, path: PathId) {
        lock(&self.items).push_back(path);
        self.notify.notify_one();
    }

    /// Pop the head, if any.
    pub fn dequeue(&self) -> Option<PathId> {
        lock(&self.items).pop_front()
    }

    /// Wait until an entry is available and pop it.
    pub async fn next(&self) -> PathId {
        loop {
            if let Some(path) = self.dequeue() {
                return path;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_order_and_duplicates_kept() {
        let queue = RefreshQueue::new();
        queue.enqueue(PathId::new("a"));
        queue.enqueue(PathId::new("b"));
        queue.enqueue(PathId::new("a"));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.dequeue(), Some(PathId::new("a")));
        assert_eq!(queue.dequeue(), Some(PathId::new("b")));
        assert_eq!(queue.dequeue(), Some(PathId::new("a")));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn next_returns_queued_entry_immediately() {
        let queue = RefreshQueue::new();
        queue.enqueue(PathId::new("a"));
        assert_eq!(queue.next().await, PathId::new("a"));
    }

    #[tokio::test]
    async fn next_wakes_on_enqueue() {
        let queue = Arc::new(RefreshQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.enqueue(PathId::new("late"));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woken")
            .unwrap();
        assert_eq!(got, PathId::new("late"));
    }

    #[test]
    fn concurrent_enqueue() {
        let queue = Arc::new(RefreshQueue::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(PathId::new(format!("p{t}-{i}")));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(queue.len(), 800);
    }
}
