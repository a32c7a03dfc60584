//! Server-to-client message queue.
//!
//! The integration frontend long-polls `POST /client`; each poll takes one
//! message or, when nothing arrives in time, a heartbeat.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

pub const HEARTBEAT: &str = "heartbeat";

/// Bounded FIFO of notifications for the client.
#[derive(Debug)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<String>>,
    notify: Notify,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a message, dropping the oldest one when full.
    pub fn push(&self, message: impl Into<String>) {
        {
            let mut messages = self.messages.lock();
            if messages.len() >= self.capacity {
                messages.pop_front();
            }
            messages.push_back(message.into());
        }
        self.notify.notify_one();
    }

    /// Copy of the pending messages, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.messages.lock().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Take the oldest message, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.messages.lock().pop_front() {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.messages.lock().pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MessageQueue::new(8);
        queue.push("first");
        queue.push("second");

        assert_eq!(queue.snapshot(), vec!["first", "second"]);
        assert_eq!(queue.pop(Duration::ZERO).await.as_deref(), Some("first"));
        assert_eq!(queue.pop(Duration::ZERO).await.as_deref(), Some("second"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let queue = MessageQueue::new(2);
        queue.push("a");
        queue.push("b");
        queue.push("c");
        assert_eq!(queue.snapshot(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_pop_times_out() {
        let queue = MessageQueue::new(2);
        assert_eq!(queue.pop(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(MessageQueue::new(4));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("session created");

        assert_eq!(waiter.await.unwrap().as_deref(), Some("session created"));
    }
}
