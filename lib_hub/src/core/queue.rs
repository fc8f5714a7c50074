//! # Message Queue Seam
//!
//! The relay loop only needs "block until the next item" and publishers only
//! need "append an item". `RedisQueue` implements both against the broker;
//! `MemoryQueue` implements them in-process.

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::HubError;

/// A FIFO queue of raw envelope strings.
pub trait MessageQueue: Send {
    /// Waits for the next item.
    ///
    /// `Ok(None)` means the wait window elapsed without an item; callers
    /// simply wait again.
    fn pop(&mut self) -> impl Future<Output = Result<Option<String>, HubError>> + Send;

    /// Appends an item to the back of the queue.
    fn push(&mut self, item: String) -> impl Future<Output = Result<(), HubError>> + Send;
}

/// In-process queue backed by an unbounded channel.
#[derive(Debug)]
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Cloneable producer side of a `MemoryQueue`.
#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    tx: mpsc::UnboundedSender<String>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A producer handle that can outlive borrows of the queue.
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            tx: self.tx.clone(),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPublisher {
    /// Appends an item.
    pub fn publish(&self, item: impl Into<String>) {
        // The queue keeps its own sender, so the channel stays open while the
        // queue is alive; a send only fails after the queue is dropped.
        let _ = self.tx.send(item.into());
    }
}

impl MessageQueue for MemoryQueue {
    async fn pop(&mut self) -> Result<Option<String>, HubError> {
        // The queue holds a sender itself, so `recv` never observes a closed channel.
        Ok(self.rx.recv().await)
    }

    async fn push(&mut self, item: String) -> Result<(), HubError> {
        self.tx
            .send(item)
            .map_err(|_| HubError::Config("memory queue closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let mut queue = MemoryQueue::new();
        let publisher = queue.publisher();
        publisher.publish("first");
        queue.push("second".to_string()).await.expect("open");
        publisher.publish("third");

        assert_eq!(queue.pop().await.unwrap().as_deref(), Some("first"));
        assert_eq!(queue.pop().await.unwrap().as_deref(), Some("second"));
        assert_eq!(queue.pop().await.unwrap().as_deref(), Some("third"));
    }
}
