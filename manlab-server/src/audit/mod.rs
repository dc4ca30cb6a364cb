//! Asynchronous audit trail.
//!
//! Audit events are enqueued onto a bounded channel and drained by a
//! background writer. Enqueueing never blocks and never fails the caller;
//! durability is best-effort within the channel window.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::models::AuditEventDbModel;
use crate::database::repositories::AuditRepository;

/// Bounded queue depth for in-flight audit events.
const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Handle for enqueueing audit events.
#[derive(Clone)]
pub struct AuditQueue {
    sender: mpsc::Sender<AuditEventDbModel>,
}

impl AuditQueue {
    /// Spawn the drain task and return the queue handle.
    pub fn start(
        repository: Arc<dyn AuditRepository>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(AUDIT_QUEUE_CAPACITY);
        tokio::spawn(drain(repository, receiver, cancel_token));
        Self { sender }
    }

    /// Enqueue an event. Drops (with a warning) when the queue is full or
    /// the writer has shut down; audit must never fail a request.
    pub fn enqueue(&self, event: AuditEventDbModel) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "Audit event dropped");
        }
    }

    /// Convenience constructor + enqueue.
    pub fn record(
        &self,
        kind: &str,
        category: &str,
        actor: &str,
        node_id: Option<String>,
        success: bool,
        message: impl Into<String>,
    ) {
        self.enqueue(AuditEventDbModel::new(
            kind, category, actor, node_id, success, message,
        ));
    }
}

async fn drain(
    repository: Arc<dyn AuditRepository>,
    mut receiver: mpsc::Receiver<AuditEventDbModel>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                // Flush whatever is already queued, then stop.
                receiver.close();
                while let Some(event) = receiver.recv().await {
                    if let Err(e) = repository.insert(&event).await {
                        warn!(error = %e, "Failed to persist audit event during shutdown");
                    }
                }
                debug!("Audit writer shut down");
                break;
            }
            event = receiver.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = repository.insert(&event).await {
                            warn!(kind = %event.kind, error = %e, "Failed to persist audit event");
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;
    use crate::database::repositories::SqlxAuditRepository;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_drain_to_store() {
        let pool = init_memory_pool().await.unwrap();
        let repo = Arc::new(SqlxAuditRepository::new(pool));
        let cancel = CancellationToken::new();
        let queue = AuditQueue::start(repo.clone(), cancel.clone());

        queue.record("node.offline", "node", "system", Some("n1".into()), true, "went dark");
        queue.record("node.enrolled", "node", "system", Some("n2".into()), true, "hello");

        // The drain task persists asynchronously.
        let mut events = Vec::new();
        for _ in 0..100 {
            events = repo.list_recent(10, 0).await.unwrap();
            if events.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(events.len(), 2);

        cancel.cancel();
    }
}
