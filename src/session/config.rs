use serde::{Deserialize, Serialize};

use crate::config::{Config, OverflowPolicy};
use crate::protocol::{ClientMessage, SetupMessage, Tool};

/// Provider-specific workarounds applied when upstream opens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionHooks {
    /// Synthetic user turn sent right after setup. The provider otherwise
    /// waits silently for user audio before it speaks; `None` disables it.
    pub greeting_trigger: Option<String>,
}

impl SessionHooks {
    pub fn greeting_message(&self) -> Option<ClientMessage> {
        self.greeting_trigger
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(ClientMessage::user_text)
    }
}

/// Per-session relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upstream model name, without the `models/` prefix
    pub model: String,

    /// Prebuilt voice used for audio responses
    pub voice_name: String,

    /// Persona and language instruction
    pub system_instruction: String,

    pub hooks: SessionHooks,

    /// Capacity of the pending queue
    pub max_pending_frames: usize,

    pub overflow_policy: OverflowPolicy,

    /// Function declarations advertised in setup
    pub tools: Vec<Tool>,
}

impl SessionConfig {
    pub fn setup_message(&self) -> SetupMessage {
        SetupMessage::new(&self.model, &self.voice_name, &self.system_instruction)
            .with_tools(self.tools.clone())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        let trigger = cfg.relay.greeting_trigger.trim();
        Self {
            model: cfg.upstream.model.clone(),
            voice_name: cfg.upstream.voice_name.clone(),
            system_instruction: cfg.relay.system_instruction.clone(),
            hooks: SessionHooks {
                greeting_trigger: (!trigger.is_empty()).then(|| trigger.to_string()),
            },
            max_pending_frames: cfg.relay.max_pending_frames,
            overflow_policy: cfg.relay.overflow_policy,
            tools: cfg.relay.tools.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hooks_send_greeting() {
        let cfg = SessionConfig::default();
        let greeting = cfg.hooks.greeting_message().expect("greeting enabled by default");
        assert_eq!(greeting, ClientMessage::user_text("Hola. Salúdame brevemente."));
    }

    #[test]
    fn test_empty_trigger_disables_greeting() {
        let mut config = Config::default();
        config.relay.greeting_trigger = "   ".into();
        let cfg = SessionConfig::from(&config);
        assert!(cfg.hooks.greeting_trigger.is_none());
        assert!(cfg.hooks.greeting_message().is_none());
    }
}
