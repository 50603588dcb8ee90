use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{OwnerId, SessionId};
use crate::error::IngestError;

/// Lifecycle of one ingest connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Handshaking,
    Authenticating,
    Publishing,
    Terminating,
    Closed,
    Failed,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Connecting, Self::Handshaking)
            | (Self::Handshaking, Self::Authenticating)
            | (Self::Authenticating, Self::Publishing)
            | (Self::Publishing, Self::Terminating)
            | (Self::Terminating, Self::Closed) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Authenticating => "authenticating",
            Self::Publishing => "publishing",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One client connection as seen by the rest of the system.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub id: SessionId,
    pub remote_addr: SocketAddr,
    pub key: Option<String>,
    pub owner_id: Option<OwnerId>,
    pub started_at: DateTime<Utc>,
    pub last_media_at: Option<DateTime<Utc>>,
    state: SessionState,
}

impl StreamSession {
    #[must_use]
    pub fn new(id: SessionId, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            key: None,
            owner_id: None,
            started_at: Utc::now(),
            last_media_at: None,
            state: SessionState::Connecting,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `next` if the lifecycle allows it. Illegal requests leave
    /// the state untouched.
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, IngestError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            tracing::warn!(
                session_id = %self.id,
                %from,
                to = %next,
                "rejected illegal session transition"
            );
            return Err(IngestError::InvalidState { from, to: next });
        }
        self.state = next;
        tracing::debug!(session_id = %self.id, %from, to = %next, "session transition");
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionState; 7] = [
        SessionState::Connecting,
        SessionState::Handshaking,
        SessionState::Authenticating,
        SessionState::Publishing,
        SessionState::Terminating,
        SessionState::Closed,
        SessionState::Failed,
    ];

    fn session() -> StreamSession {
        StreamSession::new("s1".to_string(), "127.0.0.1:50000".parse().unwrap())
    }

    #[test]
    fn test_happy_path() {
        let mut s = session();
        for next in [
            SessionState::Handshaking,
            SessionState::Authenticating,
            SessionState::Publishing,
            SessionState::Terminating,
            SessionState::Closed,
        ] {
            s.transition(next).unwrap();
        }
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_illegal_transition_keeps_state() {
        let mut s = session();
        s.transition(SessionState::Handshaking).unwrap();

        let err = s.transition(SessionState::Publishing).unwrap_err();
        assert!(matches!(
            err,
            IngestError::InvalidState {
                from: SessionState::Handshaking,
                to: SessionState::Publishing
            }
        ));
        assert_eq!(s.state(), SessionState::Handshaking);
    }

    #[test]
    fn test_failed_reachable_only_from_live_states() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(SessionState::Failed),
                !matches!(from, SessionState::Closed | SessionState::Failed),
                "{from} -> failed"
            );
        }
    }

    #[test]
    fn test_transition_table() {
        let legal = [
            (SessionState::Connecting, SessionState::Handshaking),
            (SessionState::Handshaking, SessionState::Authenticating),
            (SessionState::Authenticating, SessionState::Publishing),
            (SessionState::Publishing, SessionState::Terminating),
            (SessionState::Terminating, SessionState::Closed),
        ];
        for from in ALL {
            for to in ALL {
                if to == SessionState::Failed {
                    continue;
                }
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = session();
        s.transition(SessionState::Failed).unwrap();
        assert!(s.transition(SessionState::Closed).is_err());
        assert!(s.transition(SessionState::Failed).is_err());
        assert_eq!(s.state(), SessionState::Failed);
    }
}
