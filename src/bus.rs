//! The bus a peer sends and receives frames on.
//!
//! Transports implement [`Bus`]. [`LoopbackBus`] is an in-process bus where
//! every frame sent by one endpoint is delivered to all the others, like a
//! virtual CAN interface.

use crate::protocol::Frame;
use crate::Error;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A specialized `Result` type for bus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A frame transport.
pub trait Bus: Send {
    /// Queues `frame` for transmission without waiting for it to go out.
    fn send(&self, frame: Frame) -> Result<()>;

    /// Waits for the next frame from another node.
    ///
    /// Must be cancel safe: dropping the future before it completes loses
    /// no frame.
    fn recv(&mut self) -> impl Future<Output = Result<Frame>> + Send;
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: usize,
    frame: Frame,
}

/// An in-process bus shared by any number of endpoints.
#[derive(Debug, Clone)]
pub struct LoopbackBus {
    sender: broadcast::Sender<Envelope>,
    next_endpoint: Arc<AtomicUsize>,
}

impl LoopbackBus {
    /// Frames buffered per endpoint before a slow receiver starts losing them.
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_endpoint: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attaches a new node to the bus.
    ///
    /// The endpoint only sees frames sent after it was attached.
    pub fn endpoint(&self) -> LoopbackEndpoint {
        let id = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        log::trace!("attach loopback endpoint #{id}");
        LoopbackEndpoint {
            id,
            sender: self.sender.clone(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[derive(Debug)]
pub struct LoopbackEndpoint {
    id: usize,
    sender: broadcast::Sender<Envelope>,
    receiver: broadcast::Receiver<Envelope>,
}

impl Bus for LoopbackEndpoint {
    fn send(&self, frame: Frame) -> Result<()> {
        log::trace!("endpoint #{} send {frame:?}", self.id);
        // Our own receiver keeps the channel open, so this cannot fail
        let _ = self.sender.send(Envelope {
            origin: self.id,
            frame,
        });
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.origin == self.id => continue,
                Ok(envelope) => {
                    log::trace!("endpoint #{} recv {:?}", self.id, envelope.frame);
                    return Ok(envelope.frame);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("endpoint #{} lagged, {skipped} frames lost", self.id);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::BusClosed),
            }
        }
    }
}
