//! Outbound senders for live agent connections.

use agent_proto::ServerMessage;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Per-connection outbound queue depth.
///
/// Control messages only; stream chunks travel agent→server and never queue
/// here.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Maps connection ids to their outbound message queues.
///
/// The write half of each WebSocket is owned by a forwarder task; everything
/// else sends through this map. Sends are best-effort: a closed or full
/// queue means the connection is dying and the dispatcher will retry via
/// reconnect replay.
#[derive(Default)]
pub struct ConnectionMap {
    senders: DashMap<String, mpsc::Sender<ServerMessage>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection_id: &str, sender: mpsc::Sender<ServerMessage>) {
        self.senders.insert(connection_id.to_string(), sender);
    }

    pub fn remove(&self, connection_id: &str) {
        self.senders.remove(connection_id);
    }

    /// Queue a message for a connection. Returns false when the connection
    /// is unknown or its queue is unavailable; errors are swallowed by
    /// design — dispatch is best-effort.
    pub async fn send(&self, connection_id: &str, message: ServerMessage) -> bool {
        let sender = match self.senders.get(connection_id) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        sender.send(message).await.is_ok()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_send_to_known_and_unknown() {
        let map = ConnectionMap::new();
        let (tx, mut rx) = mpsc::channel(4);
        map.insert("c1", tx);

        let message = ServerMessage::ReplayPending {
            command_ids: vec![Uuid::nil()],
        };
        assert!(map.send("c1", message.clone()).await);
        assert!(!map.send("ghost", message).await);

        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::ReplayPending { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_after_remove_is_false() {
        let map = ConnectionMap::new();
        let (tx, _rx) = mpsc::channel(4);
        map.insert("c1", tx);
        map.remove("c1");
        assert!(
            !map.send(
                "c1",
                ServerMessage::ReplayPending {
                    command_ids: vec![]
                }
            )
            .await
        );
    }
}
