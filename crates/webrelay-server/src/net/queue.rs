//! Bounded FIFO shared by every session's inbound read worker and drained
//! by the single engine consumer.

use super::Datagram;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub struct DatagramQueue {
    tx: mpsc::Sender<Datagram>,
    rx: Mutex<mpsc::Receiver<Datagram>>,
    capacity: usize,
}

/// Producer side handed to read workers
#[derive(Clone)]
pub struct DatagramProducer {
    tx: mpsc::Sender<Datagram>,
}

impl DatagramProducer {
    /// Enqueue, waiting for room while the queue is full
    pub async fn push(&self, datagram: Datagram) {
        // The queue owns a sender and receiver for its whole life, so the
        // channel cannot be closed while a producer exists.
        if self.tx.send(datagram).await.is_err() {
            tracing::error!("Datagram queue closed while producers were attached");
        }
    }
}

impl DatagramQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    pub fn producer(&self) -> DatagramProducer {
        DatagramProducer {
            tx: self.tx.clone(),
        }
    }

    /// Pop one datagram, waiting at most `timeout`
    pub async fn poll(&self, timeout: Duration) -> Option<Datagram> {
        tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued datagrams
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
