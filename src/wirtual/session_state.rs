//! Per-session conversation state.
//!
//! A [`SessionState`] is built once per UI session or per HTTP request and dropped when
//! that session ends. Only the credential file outlives it.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::wirtual::config::RelayConfig;
use crate::wirtual::message::{Message, Sender, ToolResult};
use crate::wirtual::provider::ApiProvider;
use crate::wirtual::renderer::Rendered;
use crate::wirtual::screens::ScreenGeometry;
use crate::wirtual::storage::{self, ConfigStore};

/// Default number of screenshots kept in the context sent to the model.
pub const DEFAULT_IMAGE_RETENTION: usize = 2;

/// Sentence appended to every system prompt suffix naming the host OS family.
pub fn platform_note() -> &'static str {
    if cfg!(target_os = "windows") {
        "\n\nNOTE: you are operating a Windows machine"
    } else if cfg!(target_os = "macos") {
        "\n\nNOTE: you are operating a Mac machine"
    } else {
        "\n\nNOTE: you are operating a Linux machine"
    }
}

/// The Anthropic key a new session starts with: `config` first, then the stored
/// `api_key`.
pub fn resolve_api_key(config: &RelayConfig, store: &ConfigStore) -> Option<String> {
    config
        .anthropic_api_key
        .clone()
        .or_else(|| store.load(storage::API_KEY))
}

#[derive(Clone, Debug)]
pub struct SessionState {
    /// Conversation history in send order.
    pub messages: Vec<Message>,
    /// Credential for the active provider, if any.
    pub api_key: Option<String>,
    pub provider: ApiProvider,
    pub model: String,
    /// Appended to the agent loop's built-in system prompt.
    pub custom_system_prompt: String,
    /// How many of the most recent screenshots stay in the request context.
    pub only_n_most_recent_images: usize,
    /// Raw provider responses keyed by creation timestamp. Append-only.
    pub responses: BTreeMap<String, serde_json::Value>,
    /// Tool results keyed by tool invocation id.
    pub tools: HashMap<String, ToolResult>,
    /// Suppress screenshots when rendering.
    pub hide_images: bool,
    /// Display the computer tool operates on.
    pub selected_screen: Option<ScreenGeometry>,
    /// What a chat surface shows, in production order.
    pub transcript: Vec<(Sender, Rendered)>,
}

impl SessionState {
    /// Build a state with every default applied.
    ///
    /// The API key comes from `config`, then from the stored `api_key`. The system
    /// prompt suffix is the stored `system_prompt` (or empty) followed by
    /// [`platform_note`].
    pub fn new(config: &RelayConfig, store: &ConfigStore) -> Self {
        let provider = config.default_provider;
        let api_key = resolve_api_key(config, store);
        if api_key.is_none() {
            log::warn!("API key not found. Please set it in the environment or storage.");
        }

        let mut custom_system_prompt = store.load(storage::SYSTEM_PROMPT).unwrap_or_default();
        custom_system_prompt.push_str(platform_note());

        Self {
            messages: Vec::new(),
            api_key,
            provider,
            model: provider.default_model().to_string(),
            custom_system_prompt,
            only_n_most_recent_images: DEFAULT_IMAGE_RETENTION,
            responses: BTreeMap::new(),
            tools: HashMap::new(),
            hide_images: false,
            selected_screen: config.screens.primary_screen().cloned(),
            transcript: Vec::new(),
        }
    }

    /// Repair a partially edited state: fill an empty model from the provider table and
    /// make sure the system prompt carries the platform note. Applying it more than once
    /// changes nothing further.
    pub fn ensure_defaults(&mut self) {
        if self.model.trim().is_empty() {
            self.model = self.provider.default_model().to_string();
        }
        if !self.custom_system_prompt.ends_with(platform_note()) {
            self.custom_system_prompt.push_str(platform_note());
        }
        if self.api_key.as_deref().map(str::is_empty).unwrap_or(false) {
            self.api_key = None;
        }
    }

    /// Switch provider and reset the model to that provider's default.
    pub fn set_provider(&mut self, provider: ApiProvider) {
        self.provider = provider;
        self.model = provider.default_model().to_string();
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user_text(text));
    }

    /// Store a raw provider response under its creation timestamp; returns the key.
    ///
    /// Responses created in the same microsecond get a `#0001`, `#0002`, ... suffix so
    /// keys still sort in arrival order.
    pub fn record_api_response(
        &mut self,
        created: DateTime<Utc>,
        response: serde_json::Value,
    ) -> String {
        let stamp = created.to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut key = stamp.clone();
        let mut n = 1;
        while self.responses.contains_key(&key) {
            key = format!("{}#{:04}", stamp, n);
            n += 1;
        }
        self.responses.insert(key.clone(), response);
        key
    }

    pub fn record_tool_output(&mut self, tool_id: &str, result: ToolResult) {
        self.tools.insert(tool_id.to_string(), result);
    }
}
