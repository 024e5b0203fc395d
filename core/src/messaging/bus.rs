//! The main loop's inbound queue: a multi-producer, single-consumer
//! channel that task messages, subprocess results, and operator commands
//! are all funneled through.
//!
//! The shape follows the usual actor-handle split (`StateManager`, `Coordinator`):
//! a cheaply-cloned sender paired with one owned receiver, except here the
//! receiver is drained by the scheduler's own main loop rather than a spawned
//! actor task — the main loop *is* the single consumer.

use tokio::sync::mpsc;

/// A cloneable handle producers use to enqueue events for the main loop.
#[derive(Clone)]
pub struct BusSender<T>(mpsc::Sender<T>);

impl<T> BusSender<T> {
    pub async fn send(&self, event: T) -> Result<(), mpsc::error::SendError<T>> {
        self.0.send(event).await
    }

    pub fn try_send(&self, event: T) -> Result<(), mpsc::error::TrySendError<T>> {
        self.0.try_send(event)
    }
}

/// The main loop's side: only the scheduler's own loop ever holds this.
pub struct BusReceiver<T>(mpsc::Receiver<T>);

impl<T> BusReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }

    /// Drain everything currently queued without waiting, for a scheduling
    /// quantum that processes a batch before re-checking timers.
    pub fn drain_available(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(event) = self.0.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Construct a bounded inbound queue. `capacity` backpressures producers
/// (subprocess workers, message listeners) rather than growing unbounded.
pub fn channel<T>(capacity: usize) -> (BusSender<T>, BusReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (BusSender(tx), BusReceiver(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_drain() {
        let (tx, mut rx) = channel::<i32>(8);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        let drained = rx.drain_available();
        assert_eq!(drained, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_recv_single() {
        let (tx, mut rx) = channel::<&'static str>(8);
        tx.send("hello").await.unwrap();
        assert_eq!(rx.recv().await, Some("hello"));
    }
}
