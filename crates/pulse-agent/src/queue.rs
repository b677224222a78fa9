//! Fixed-capacity queue with a blocking push and a drop-if-full push.
//!
//! The receiving half is cloneable so several workers can share one queue.
//! The queue closes once every sender is dropped; receivers then drain what
//! is left and see `None`.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

/// `try_push` refusal, handing the item back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryPushError<T> {
    #[error("queue is full")]
    Full(T),
    #[error("queue is closed")]
    Closed(T),
}

/// `push` on a queue whose receivers are gone.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue is closed")]
pub struct Closed<T>(pub T);

/// Create a queue holding at most `capacity` items (at least one).
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender { tx, capacity },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    capacity: usize,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> QueueSender<T> {
    /// Wait for a free slot.
    pub async fn push(&self, item: T) -> Result<(), Closed<T>> {
        self.tx.send(item).await.map_err(|e| Closed(e.0))
    }

    /// Enqueue only if a slot is free right now.
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) => TryPushError::Full(item),
            mpsc::error::TrySendError::Closed(item) => TryPushError::Closed(item),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Next item, or `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Take everything queued right now without waiting for more.
    pub async fn drain(&self) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        let mut items = Vec::with_capacity(rx.len());
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_push_hands_back_overflow() {
        let (tx, rx) = bounded(2);
        tx.try_push(1).unwrap();
        tx.try_push(2).unwrap();
        assert_eq!(tx.try_push(3), Err(TryPushError::Full(3)));
        assert_eq!(rx.drain().await, vec![1, 2]);
        tx.try_push(4).unwrap();
    }

    #[tokio::test]
    async fn zero_capacity_means_one() {
        let (tx, _rx) = bounded(0);
        assert_eq!(tx.capacity(), 1);
        tx.try_push("a").unwrap();
        assert!(matches!(tx.try_push("b"), Err(TryPushError::Full("b"))));
    }

    #[tokio::test]
    async fn receivers_drain_then_see_close() {
        let (tx, rx) = bounded(4);
        tx.push(1).await.unwrap();
        tx.push(2).await.unwrap();
        drop(tx);

        let other = rx.clone();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(other.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
        assert_eq!(other.recv().await, None);
    }

    #[tokio::test]
    async fn push_fails_without_receivers() {
        let (tx, rx) = bounded(1);
        drop(rx);
        assert_eq!(tx.push(7).await, Err(Closed(7)));
        assert_eq!(tx.try_push(8), Err(TryPushError::Closed(8)));
    }

    #[tokio::test]
    async fn blocking_push_waits_for_a_slot() {
        let (tx, rx) = bounded(1);
        tx.push(1).await.unwrap();

        let pusher = tokio::spawn({
            let tx = tx.clone();
            async move { tx.push(2).await }
        });
        tokio::task::yield_now().await;
        assert!(!pusher.is_finished());

        assert_eq!(rx.recv().await, Some(1));
        pusher.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, Some(2));
    }
}
