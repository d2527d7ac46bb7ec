//! Configuration for the relay.
//!
//! Provides [`RelayConfig`] and [`PlannerConfig`]. Both are plain structs: build them by
//! hand, start from [`Default`], or read the process environment with
//! [`RelayConfig::from_env`].
//!
//! # Example
//!
//! ```rust
//! use wirtual::RelayConfig;
//!
//! let mut config = RelayConfig::default();
//! config.max_subtasks = 3;
//! assert_eq!(config.bind_addr.port(), 8001);
//! ```

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::wirtual::provider::ApiProvider;
use crate::wirtual::screens::ScreenLayout;

/// Default Anthropic Messages API base URL.
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI-compatible base URL used by the planning LLM.
pub const DEFAULT_PLANNER_BASE_URL: &str = "https://api.openai.com";

/// Settings for the planning LLM used by the supervisory loop.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    /// Bearer token for the planner endpoint. Empty means "not configured".
    pub api_key: String,
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,
    /// Model identifier sent with every planner request.
    pub model: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_PLANNER_BASE_URL.to_string(),
            model: "gpt-4".to_string(),
        }
    }
}

/// Process-level configuration, read once at startup and then handed out by reference.
///
/// Nothing in here is mutated after the server starts; per-request values such as the
/// selected screen are copied into each request's [`SessionState`](crate::SessionState).
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Directory holding stored secrets (`api_key`, `system_prompt`).
    pub config_dir: PathBuf,
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Provider used when a session does not pick one.
    pub default_provider: ApiProvider,
    /// Anthropic key used by the supervisory endpoint, which receives no key header.
    pub anthropic_api_key: Option<String>,
    /// Base URL of the Anthropic Messages API.
    pub anthropic_base_url: String,
    /// Planning LLM settings.
    pub planner: PlannerConfig,
    /// Maximum number of sub-tasks the supervisory loop may execute.
    pub max_subtasks: usize,
    /// Displays available to the computer tool.
    pub screens: ScreenLayout,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
            default_provider: ApiProvider::Anthropic,
            anthropic_api_key: None,
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            planner: PlannerConfig::default(),
            max_subtasks: 10,
            screens: ScreenLayout::default(),
        }
    }
}

impl RelayConfig {
    /// Build a configuration from the environment, falling back to [`Default`] values.
    ///
    /// Recognised variables: `WIRTUAL_CONFIG_DIR`, `WIRTUAL_BIND`, `API_PROVIDER`,
    /// `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`, `OPENAI_API_KEY`, `OPENAI_BASE_URL`,
    /// `PLANNER_MODEL` and `WIRTUAL_MAX_SUBTASKS`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = non_empty_var("WIRTUAL_CONFIG_DIR") {
            config.config_dir = PathBuf::from(dir);
        }
        if let Some(bind) = non_empty_var("WIRTUAL_BIND") {
            match bind.parse() {
                Ok(addr) => config.bind_addr = addr,
                Err(e) => log::warn!("Ignoring WIRTUAL_BIND={}: {}", bind, e),
            }
        }
        if let Some(provider) = non_empty_var("API_PROVIDER") {
            match provider.parse() {
                Ok(p) => config.default_provider = p,
                Err(e) => log::warn!("Ignoring API_PROVIDER={}: {}", provider, e),
            }
        }
        config.anthropic_api_key = non_empty_var("ANTHROPIC_API_KEY");
        if let Some(url) = non_empty_var("ANTHROPIC_BASE_URL") {
            config.anthropic_base_url = url;
        }
        if let Some(key) = non_empty_var("OPENAI_API_KEY") {
            config.planner.api_key = key;
        }
        if let Some(url) = non_empty_var("OPENAI_BASE_URL") {
            config.planner.base_url = url;
        }
        if let Some(model) = non_empty_var("PLANNER_MODEL") {
            config.planner.model = model;
        }
        if let Some(max) = non_empty_var("WIRTUAL_MAX_SUBTASKS") {
            match max.parse() {
                Ok(n) => config.max_subtasks = n,
                Err(e) => log::warn!("Ignoring WIRTUAL_MAX_SUBTASKS={}: {}", max, e),
            }
        }

        config
    }
}

/// `~/.anthropic`, or `.anthropic` in the working directory when no home is known.
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".anthropic"))
        .unwrap_or_else(|| PathBuf::from(".anthropic"))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
