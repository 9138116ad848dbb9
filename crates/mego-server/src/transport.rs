//! Outbound side of a connection.
//!
//! The engine never touches sockets directly. Each session owns a
//! [`Transport`] that queues encoded frames for the connection's writer task.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{ServerError, ServerResult};

/// Writes raw frames back to one connection.
pub trait Transport: Send + Sync {
    /// Queues a frame for delivery.
    fn send(&self, frame: Vec<u8>) -> ServerResult<()>;

    /// Asks the connection to close.
    fn close(&self);

    /// True once the connection is gone or closing.
    fn is_closed(&self) -> bool;
}

/// Instruction consumed by a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded envelope.
    Frame(Vec<u8>),
    /// Close the connection.
    Close,
}

/// A [`Transport`] backed by a bounded mpsc queue.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Creates a transport and the receiver its writer task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transport = Self {
            tx,
            closed: AtomicBool::new(false),
        };
        (transport, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Vec<u8>) -> ServerResult<()> {
        if self.is_closed() {
            return Err(ServerError::TransportClosed);
        }
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ServerError::TransportFull),
            Err(TrySendError::Closed(_)) => {
                self.closed.store(true, Ordering::Release);
                Err(ServerError::TransportClosed)
            }
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.try_send(Outbound::Close);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_reach_the_receiver() {
        let (transport, mut rx) = ChannelTransport::new(4);
        transport.send(b"one".to_vec()).unwrap();
        transport.send(b"two".to_vec()).unwrap();

        assert_eq!(rx.recv().await, Some(Outbound::Frame(b"one".to_vec())));
        assert_eq!(rx.recv().await, Some(Outbound::Frame(b"two".to_vec())));
    }

    #[test]
    fn full_queue_is_reported() {
        let (transport, _rx) = ChannelTransport::new(1);
        transport.send(vec![1]).unwrap();
        assert!(matches!(
            transport.send(vec![2]),
            Err(ServerError::TransportFull)
        ));
        assert!(!transport.is_closed());
    }

    #[test]
    fn dropped_receiver_closes_transport() {
        let (transport, rx) = ChannelTransport::new(1);
        drop(rx);
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send(vec![1]),
            Err(ServerError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn close_sends_marker_once() {
        let (transport, mut rx) = ChannelTransport::new(4);
        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(transport.send(vec![1]).is_err());

        assert_eq!(rx.recv().await, Some(Outbound::Close));
        assert!(rx.try_recv().is_err());
    }
}
