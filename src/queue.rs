//! Bounded ingress queue shared between the HTTP surface and the
//! dispatcher pool.
//!
//! Producers await capacity instead of dropping, which turns overload into
//! end-to-end back-pressure that ingress callers observe as latency. The
//! dispatcher's "no target" path uses the non-blocking [`IngressQueue::try_requeue`]
//! so a worker never deadlocks against a queue it is supposed to drain.

use crate::error::{FanoutError, Result};
use metrics::gauge;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};

/// Bounded FIFO of opaque JSON packets.
#[derive(Debug)]
pub struct IngressQueue {
    tx: mpsc::Sender<Value>,
    rx: Mutex<mpsc::Receiver<Value>>,
    depth: AtomicUsize,
    capacity: usize,
}

impl IngressQueue {
    /// Create a queue holding at most `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Enqueue a packet, awaiting free capacity if the queue is full.
    pub async fn push(&self, packet: Value) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| FanoutError::QueueClosed)?;
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("queue_size").set(depth as f64);
        Ok(())
    }

    /// Re-append a packet at the tail without blocking.
    ///
    /// Best-effort: fails when the queue is full, in which case the packet
    /// is lost and the caller escalates to system-wide back-pressure.
    pub fn try_requeue(&self, packet: Value) -> Result<()> {
        self.tx.try_send(packet).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => FanoutError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => FanoutError::QueueClosed,
        })?;
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("queue_size").set(depth as f64);
        Ok(())
    }

    /// Dequeue the next packet, awaiting one if the queue is empty.
    ///
    /// Returns `None` only once the queue has shut down.
    pub async fn pop(&self) -> Option<Value> {
        let packet = self.rx.lock().await.recv().await?;
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!("queue_size").set(depth as f64);
        Some(packet)
    }

    /// Approximate number of packets currently queued.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = IngressQueue::new(8);
        assert_ok!(queue.push(json!({"seq": 1})).await);
        assert_ok!(queue.push(json!({"seq": 2})).await);
        assert_ok!(queue.push(json!({"seq": 3})).await);

        assert_eq!(queue.depth(), 3);
        assert_eq!(queue.pop().await.unwrap()["seq"], 1);
        assert_eq!(queue.pop().await.unwrap()["seq"], 2);
        assert_eq!(queue.pop().await.unwrap()["seq"], 3);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_requeue_appends_at_tail() {
        let queue = IngressQueue::new(8);
        queue.push(json!({"seq": 1})).await.unwrap();
        queue.try_requeue(json!({"seq": 2})).unwrap();

        assert_eq!(queue.pop().await.unwrap()["seq"], 1);
        assert_eq!(queue.pop().await.unwrap()["seq"], 2);
    }

    #[tokio::test]
    async fn test_requeue_fails_when_full() {
        let queue = IngressQueue::new(2);
        queue.push(json!(1)).await.unwrap();
        queue.push(json!(2)).await.unwrap();

        assert!(matches!(
            queue.try_requeue(json!(3)),
            Err(FanoutError::QueueFull)
        ));
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn test_push_blocks_until_capacity_frees() {
        let queue = IngressQueue::new(1);
        queue.push(json!(1)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.push(json!(2))).await;
        assert!(blocked.is_err(), "push should wait for capacity");

        queue.pop().await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), queue.push(json!(2)))
            .await
            .expect("capacity freed")
            .unwrap();
    }
}
