//! Bounded outcome queue between the connection worker and the consumer
//!
//! The producer side applies backpressure: when the queue is full, `push`
//! waits until the consumer drains an item, which stalls frame processing
//! on the connection worker until then.

use crate::data::Outcome;
use crate::error::SinkError;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Create a connected sink/receiver pair
///
/// With `deliver == false` outcomes pushed into the sink are discarded.
pub fn channel(capacity: usize, deliver: bool) -> (OutputSink, OutputReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutputSink {
            tx,
            capacity: capacity.max(1),
            deliver,
        },
        OutputReceiver { rx },
    )
}

/// Producer half
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::Sender<Outcome>,
    capacity: usize,
    deliver: bool,
}

impl OutputSink {
    /// Queue an outcome, waiting for room when the queue is full
    pub async fn push(&self, outcome: Outcome) -> Result<(), SinkError> {
        if !self.deliver {
            tracing::trace!("Delivery suppressed, discarding {} outcome", outcome.category());
            return Ok(());
        }

        if self.tx.capacity() == 0 {
            tracing::debug!("Outcome queue full ({} items), waiting for consumer", self.capacity);
        }
        self.tx.send(outcome).await.map_err(|_| SinkError::Closed)
    }

    /// Queue an outcome without waiting; returns the outcome back when full
    pub fn try_push(&self, outcome: Outcome) -> Result<(), (Outcome, SinkError)> {
        if !self.deliver {
            return Ok(());
        }

        self.tx.try_send(outcome).map_err(|e| match e {
            TrySendError::Full(outcome) => (outcome, SinkError::Full),
            TrySendError::Closed(outcome) => (outcome, SinkError::Closed),
        })
    }

    /// Number of queued, not yet consumed outcomes
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn delivers(&self) -> bool {
        self.deliver
    }
}

/// Consumer half
#[derive(Debug)]
pub struct OutputReceiver {
    rx: mpsc::Receiver<Outcome>,
}

impl OutputReceiver {
    /// Retrieve the next outcome
    ///
    /// * `block == false`: return immediately, `SinkError::Empty` if nothing is queued
    /// * `block == true, timeout == None`: wait until an outcome arrives
    /// * `block == true, timeout == Some(t)`: wait at most `t`, then `SinkError::Timeout`
    pub async fn pop(&mut self, block: bool, timeout: Option<Duration>) -> Result<Outcome, SinkError> {
        if !block {
            return self.rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => SinkError::Empty,
                TryRecvError::Disconnected => SinkError::Closed,
            });
        }

        match timeout {
            None => self.rx.recv().await.ok_or(SinkError::Closed),
            Some(timeout) => match tokio::time::timeout(timeout, self.rx.recv()).await {
                Ok(Some(outcome)) => Ok(outcome),
                Ok(None) => Err(SinkError::Closed),
                Err(_) => Err(SinkError::Timeout),
            },
        }
    }

    /// Drain everything that is queued right now
    pub fn drain(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Params;

    fn stream_event(n: usize) -> Outcome {
        Outcome::StreamEvent {
            method: "ticker".into(),
            symbol: format!("SYM{}", n),
            params: Params::new(),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (sink, mut rx) = channel(10, true);
        for n in 0..5 {
            sink.push(stream_event(n)).await.unwrap();
        }
        assert_eq!(sink.len(), 5);

        for n in 0..5 {
            assert_eq!(rx.pop(false, None).await.unwrap(), stream_event(n));
        }
        assert_eq!(rx.pop(false, None).await, Err(SinkError::Empty));
    }

    #[tokio::test]
    async fn test_pop_timeout() {
        let (_sink, mut rx) = channel(10, true);
        let result = rx.pop(true, Some(Duration::from_millis(20))).await;
        assert_eq!(result, Err(SinkError::Timeout));
    }

    #[tokio::test]
    async fn test_suppressed_delivery() {
        let (sink, mut rx) = channel(10, false);
        sink.push(stream_event(0)).await.unwrap();
        assert!(sink.try_push(stream_event(1)).is_ok());
        assert_eq!(rx.pop(false, None).await, Err(SinkError::Empty));
    }

    #[tokio::test]
    async fn test_backpressure_blocks_producer() {
        let (sink, mut rx) = channel(1, true);
        sink.push(stream_event(0)).await.unwrap();
        assert!(sink.try_push(stream_event(1)).is_err());

        let producer = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.push(stream_event(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(rx.pop(true, None).await.unwrap(), stream_event(0));
        producer.await.unwrap().unwrap();
        assert_eq!(rx.pop(true, Some(Duration::from_secs(1))).await.unwrap(), stream_event(1));
    }

    #[tokio::test]
    async fn test_closed_when_producers_dropped() {
        let (sink, mut rx) = channel(4, true);
        drop(sink);
        assert_eq!(rx.pop(true, None).await, Err(SinkError::Closed));
    }
}
