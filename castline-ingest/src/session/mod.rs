//! Per-connection session lifecycle.

mod server_session;
mod state;

use std::sync::Arc;

pub use server_session::ServerSession;
pub use state::{SessionState, StreamSession};

use crate::analytics::AnalyticsCollector;
use crate::auth::KeyAuthenticator;
use crate::config::SessionConfig;
use crate::events::SessionEvents;
use crate::transcoder::{OutputVariant, TranscoderSupervisor};

/// Shared collaborators handed to every session.
pub struct IngestContext {
    pub authenticator: Arc<KeyAuthenticator>,
    pub supervisor: Arc<TranscoderSupervisor>,
    pub analytics: Arc<AnalyticsCollector>,
    pub events: Arc<dyn SessionEvents>,
    pub session: SessionConfig,
    pub variants: Vec<OutputVariant>,
}
