//! Outbound notifications.
//!
//! Channels deliver control-plane events to external sinks; delivery is
//! always best-effort and never fails the triggering operation.

pub mod discord;
pub mod events;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::Result;
pub use discord::{DiscordChannel, DiscordConfig};
pub use events::{DashboardEvent, EventBroadcaster, NotificationEvent, NotificationPriority};

/// A single delivery channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn channel_type(&self) -> &'static str;
    fn is_enabled(&self) -> bool;
    async fn send(&self, event: &NotificationEvent) -> Result<()>;
}

/// Fans one event out to every enabled channel.
pub struct NotificationService {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationService {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// A service with no channels; notify becomes a no-op.
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Deliver to all enabled channels. Failures are logged, never returned.
    pub async fn notify(&self, event: NotificationEvent) {
        for channel in &self.channels {
            if !channel.is_enabled() {
                continue;
            }
            if let Err(e) = channel.send(&event).await {
                warn!(
                    channel = channel.channel_type(),
                    event = event.event_type(),
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        enabled: bool,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        fn channel_type(&self) -> &'static str {
            "counting"
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, _event: &NotificationEvent) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_notify_skips_disabled_channels() {
        let sent = Arc::new(AtomicUsize::new(0));
        let service = NotificationService::new(vec![
            Arc::new(CountingChannel {
                enabled: true,
                sent: Arc::clone(&sent),
            }),
            Arc::new(CountingChannel {
                enabled: false,
                sent: Arc::clone(&sent),
            }),
        ]);

        service
            .notify(NotificationEvent::NodeEnrolled {
                node_id: "n1".to_string(),
                hostname: "web-01".to_string(),
                timestamp: Utc::now(),
            })
            .await;

        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }
}
