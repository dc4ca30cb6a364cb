//! Per-stream chunk channels.
//!
//! The hub delivers decoded chunk frames into the bounded channel registered
//! for each stream id; the HTTP handler consumes the other end. A full
//! channel blocks the delivering connection, which is exactly the
//! backpressure the pipeline wants.

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Event delivered on a stream channel, in arrival order.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(Bytes),
    /// Agent-reported end of stream; an error means the stream failed.
    End { error: Option<String> },
}

/// Outcome of delivering one chunk into a stream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    Delivered,
    /// The stream was cancelled or its consumer went away; the caller
    /// should drop further chunks for this stream id.
    Dropped,
    /// No stream registered under this id.
    Unknown,
}

struct StreamEntry {
    tx: mpsc::Sender<StreamEvent>,
    connection_id: String,
    cancel: CancellationToken,
}

/// Consumer half of a registered stream.
pub struct StreamReceiver {
    pub rx: mpsc::Receiver<StreamEvent>,
    pub cancel: CancellationToken,
}

/// Routes inbound chunk frames to their per-stream channels.
#[derive(Default)]
pub struct StreamRouter {
    streams: DashMap<Uuid, StreamEntry>,
}

impl StreamRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream bound to the delivering connection. `capacity` is
    /// the chunk-channel depth; capacity × chunk size bounds in-flight
    /// bytes for the download.
    pub fn register(
        &self,
        stream_id: Uuid,
        connection_id: &str,
        capacity: usize,
    ) -> StreamReceiver {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        self.streams.insert(
            stream_id,
            StreamEntry {
                tx,
                connection_id: connection_id.to_string(),
                cancel: cancel.clone(),
            },
        );
        StreamReceiver { rx, cancel }
    }

    /// Deliver one chunk, blocking while the channel is full. Returns
    /// `Dropped` (and forgets the stream) once the stream is cancelled or
    /// its consumer is gone.
    pub async fn deliver_chunk(&self, stream_id: Uuid, bytes: Bytes) -> DeliverOutcome {
        let (tx, cancel) = match self.streams.get(&stream_id) {
            Some(entry) => (entry.tx.clone(), entry.cancel.clone()),
            None => return DeliverOutcome::Unknown,
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                self.remove(stream_id);
                DeliverOutcome::Dropped
            }
            sent = tx.send(StreamEvent::Chunk(bytes)) => {
                if sent.is_ok() {
                    DeliverOutcome::Delivered
                } else {
                    self.remove(stream_id);
                    DeliverOutcome::Dropped
                }
            }
        }
    }

    /// Deliver the end-of-stream marker and forget the stream.
    pub async fn finish(&self, stream_id: Uuid, error: Option<String>) {
        if let Some((_, entry)) = self.streams.remove(&stream_id) {
            let _ = entry.tx.send(StreamEvent::End { error }).await;
        }
    }

    /// Trip a stream's cancellation token and forget it.
    pub fn cancel(&self, stream_id: Uuid) {
        if let Some((_, entry)) = self.streams.remove(&stream_id) {
            entry.cancel.cancel();
        }
    }

    /// Cancel every stream fed by a disconnecting agent connection.
    pub fn cancel_for_connection(&self, connection_id: &str) {
        let dead: Vec<Uuid> = self
            .streams
            .iter()
            .filter(|entry| entry.value().connection_id == connection_id)
            .map(|entry| *entry.key())
            .collect();
        for stream_id in dead {
            debug!(%stream_id, connection_id, "Cancelling stream for dead connection");
            self.cancel(stream_id);
        }
    }

    fn remove(&self, stream_id: Uuid) {
        self.streams.remove(&stream_id);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_and_finish_in_order() {
        let router = StreamRouter::new();
        let stream_id = Uuid::new_v4();
        let mut receiver = router.register(stream_id, "c1", 4);

        assert_eq!(
            router.deliver_chunk(stream_id, Bytes::from_static(b"one")).await,
            DeliverOutcome::Delivered
        );
        assert_eq!(
            router.deliver_chunk(stream_id, Bytes::from_static(b"two")).await,
            DeliverOutcome::Delivered
        );
        router.finish(stream_id, None).await;

        match receiver.rx.recv().await.unwrap() {
            StreamEvent::Chunk(bytes) => assert_eq!(&bytes[..], b"one"),
            other => panic!("unexpected event: {other:?}"),
        }
        match receiver.rx.recv().await.unwrap() {
            StreamEvent::Chunk(bytes) => assert_eq!(&bytes[..], b"two"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            receiver.rx.recv().await.unwrap(),
            StreamEvent::End { error: None }
        ));
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_stream() {
        let router = StreamRouter::new();
        assert_eq!(
            router.deliver_chunk(Uuid::new_v4(), Bytes::new()).await,
            DeliverOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn test_cancel_drops_further_chunks() {
        let router = StreamRouter::new();
        let stream_id = Uuid::new_v4();
        let receiver = router.register(stream_id, "c1", 1);

        router.cancel(stream_id);
        assert!(receiver.cancel.is_cancelled());
        assert_eq!(
            router.deliver_chunk(stream_id, Bytes::from_static(b"x")).await,
            DeliverOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn test_cancelled_while_blocked_on_full_channel() {
        let router = StreamRouter::new();
        let stream_id = Uuid::new_v4();
        let receiver = router.register(stream_id, "c1", 1);

        // Fill the channel; the consumer is not draining.
        assert_eq!(
            router.deliver_chunk(stream_id, Bytes::from_static(b"a")).await,
            DeliverOutcome::Delivered
        );

        let cancel = receiver.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });

        // Blocks on the full channel until the cancel fires.
        assert_eq!(
            router.deliver_chunk(stream_id, Bytes::from_static(b"b")).await,
            DeliverOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn test_connection_teardown_cancels_its_streams() {
        let router = StreamRouter::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let r1 = router.register(s1, "c1", 4);
        let r2 = router.register(s2, "c2", 4);

        router.cancel_for_connection("c1");
        assert!(r1.cancel.is_cancelled());
        assert!(!r2.cancel.is_cancelled());
        assert_eq!(router.len(), 1);
    }
}
