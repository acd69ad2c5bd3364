use crate::config::{Config, Endpoints, SessionSettings};
use crate::session::{CallSession, SessionComponents, SessionConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Builds the platform collaborators for each new call
pub trait SessionFactory: Send + Sync {
    fn components(
        &self,
        config: &SessionConfig,
        endpoints: &Endpoints,
    ) -> anyhow::Result<SessionComponents>;
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Live and ended call sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, Arc<CallSession>>>>,

    pub factory: Arc<dyn SessionFactory>,

    /// Defaults applied to every new session
    pub settings: SessionSettings,

    pub endpoints: Endpoints,
}

impl AppState {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        settings: SessionSettings,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory,
            settings,
            endpoints,
        }
    }

    pub fn from_config(factory: Arc<dyn SessionFactory>, config: &Config) -> Self {
        Self::new(factory, config.session.clone(), config.endpoints())
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }
}
