use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One outbound text frame. Shared so a broadcast encodes once and every
/// dashboard queue holds a pointer to the same buffer.
pub type Frame = Arc<str>;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The bounded queue is full: the peer is not keeping up.
    #[error("outbound queue full")]
    Full,
    #[error("channel closed")]
    Closed,
}

/// Sending half of a live connection, as held by the registry.
///
/// Transport-agnostic: the WebSocket layer owns the matching
/// [`ChannelReceiver`] and pumps frames to the socket; tests read the
/// receiver directly.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    peer: Option<IpAddr>,
}

impl Channel {
    /// Create a channel with a bounded outbound queue of `buffer` frames.
    pub fn new(buffer: usize) -> (Channel, ChannelReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let closed = CancellationToken::new();
        let channel = Channel {
            id: ChannelId::next(),
            tx,
            closed: closed.clone(),
            peer: None,
        };
        (channel, ChannelReceiver { rx, closed })
    }

    /// Tag the channel with the remote address of its transport.
    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn peer(&self) -> Option<IpAddr> {
        self.peer
    }

    /// Queue a frame without waiting. Never blocks the caller.
    pub fn try_send(&self, frame: Frame) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask the transport to close this connection. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Receiving half, owned exclusively by the connection's writer task.
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: mpsc::Receiver<Frame>,
    closed: CancellationToken,
}

impl ChannelReceiver {
    /// Next queued frame, or `None` once the channel has been closed.
    /// Close wins over frames still queued.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            frame = self.rx.recv() => frame,
        }
    }

    /// Non-blocking read of the next queued frame.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Resolves when the registry (or anyone holding the [`Channel`]) closes it.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (tx, mut rx) = Channel::new(4);
        tx.try_send("a".into()).unwrap();
        tx.try_send("b".into()).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[test]
    fn full_queue_reports_full() {
        let (tx, _rx) = Channel::new(1);
        tx.try_send("a".into()).unwrap();
        assert_eq!(tx.try_send("b".into()), Err(SendError::Full));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_receiver() {
        let (tx, mut rx) = Channel::new(4);
        tx.try_send("queued".into()).unwrap();
        tx.close();
        tx.close();
        assert!(tx.is_closed());
        assert_eq!(tx.try_send("late".into()), Err(SendError::Closed));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ra) = Channel::new(1);
        let (b, _rb) = Channel::new(1);
        assert_ne!(a.id(), b.id());
    }
}
