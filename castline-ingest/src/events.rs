use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

/// Why a publishing session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    PeerDisconnected,
    Unpublished,
    IdleTimeout,
    Shutdown,
    EncodeFailed,
    ProtocolError(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerDisconnected => write!(f, "peer disconnected"),
            Self::Unpublished => write!(f, "unpublished"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Shutdown => write!(f, "server shutdown"),
            Self::EncodeFailed => write!(f, "encoder restart budget exhausted"),
            Self::ProtocolError(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

/// Notifications for the dashboard layer. Fired once each per session
/// that reached `Publishing`.
#[cfg_attr(test, mockall::automock)]
pub trait SessionEvents: Send + Sync {
    fn session_started(&self, session_id: &str, owner_id: &str);
    fn session_ended(&self, session_id: &str, reason: &EndReason);
}

/// Stream lifecycle event emitted on publish/unpublish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamLifecycleEvent {
    Started {
        session_id: String,
        owner_id: String,
    },
    Stopped {
        session_id: String,
        reason: EndReason,
    },
}

/// Publishes session events on a broadcast channel.
#[derive(Clone)]
pub struct BroadcastSessionEvents {
    tx: broadcast::Sender<StreamLifecycleEvent>,
}

impl BroadcastSessionEvents {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamLifecycleEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: StreamLifecycleEvent) {
        tracing::info!(?event, "stream lifecycle event");
        // No subscribers is fine: the log line above is the record.
        let _ = self.tx.send(event);
    }
}

impl SessionEvents for BroadcastSessionEvents {
    fn session_started(&self, session_id: &str, owner_id: &str) {
        self.publish(StreamLifecycleEvent::Started {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
        });
    }

    fn session_ended(&self, session_id: &str, reason: &EndReason) {
        self.publish(StreamLifecycleEvent::Stopped {
            session_id: session_id.to_string(),
            reason: reason.clone(),
        });
    }
}
