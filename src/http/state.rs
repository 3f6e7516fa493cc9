use crate::config::Config;
use crate::dialogue::{Dialogue, DialogueConfig, SlotProvider, TomorrowSlots};
use crate::error::ConfigError;
use crate::registry::Registry;
use crate::session::{SessionConfig, SessionHandle};
use crate::upstream::{UpstreamConnector, UpstreamEndpoint, WebSocketConnector};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Applied to every new relay session
    pub session_config: Arc<SessionConfig>,

    pub connector: Arc<dyn UpstreamConnector>,

    /// Live relay sessions (session_id → handle)
    pub sessions: Registry<Arc<SessionHandle>>,

    /// Telephony calls in progress (call_sid → dialogue)
    pub calls: Registry<Arc<Mutex<Dialogue>>>,

    pub dialogue_config: Arc<DialogueConfig>,

    pub slots: Arc<dyn SlotProvider>,
}

impl AppState {
    pub fn new(session_config: SessionConfig, connector: Arc<dyn UpstreamConnector>) -> Self {
        Self {
            session_config: Arc::new(session_config),
            connector,
            sessions: Registry::new(),
            calls: Registry::new(),
            dialogue_config: Arc::new(DialogueConfig::default()),
            slots: Arc::new(TomorrowSlots::default()),
        }
    }

    /// State backed by the real upstream; fails if the endpoint or credential is unusable.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let endpoint = UpstreamEndpoint::from_config(&config.upstream)?;
        let connector = Arc::new(WebSocketConnector::new(endpoint));
        Ok(Self::new(SessionConfig::from(config), connector)
            .with_dialogue(config.dialogue.clone(), Arc::new(TomorrowSlots::default())))
    }

    pub fn with_dialogue(mut self, config: DialogueConfig, slots: Arc<dyn SlotProvider>) -> Self {
        self.dialogue_config = Arc::new(config);
        self.slots = slots;
        self
    }
}
