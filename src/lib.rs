//! # wirtual
//!
//! A relay service that turns natural-language instructions into a computer-use agent
//! loop and streams its progress back over HTTP.
//!
//! The crate is layered bottom-up:
//!
//! * **Credentials and settings**: [`storage::ConfigStore`] keeps owner-only secret files,
//!   [`RelayConfig`] gathers process settings, [`provider::validate_auth`] checks that a
//!   provider has what it needs
//! * **Conversation model**: [`message`] defines the content sum type and
//!   [`SessionState`] owns one conversation
//! * **Agent loop**: the [`AgentLoop`] trait and its Anthropic implementation
//!   [`sampler::AnthropicSampler`], which executes the [`tools`] the model asks for
//! * **Relaying**: [`relay`] frames loop output as server-sent events and
//!   [`orchestrator`] supervises the loop with a planning model
//! * **HTTP**: `server` (on the default `server` feature) exposes both over axum
//!
//! ## Relaying one instruction
//!
//! ```rust,no_run
//! use wirtual::relay::relay_turn;
//! use wirtual::sampler::AnthropicSampler;
//! use wirtual::storage::ConfigStore;
//! use wirtual::{RelayConfig, SessionState};
//!
//! #[tokio::main]
//! async fn main() {
//!     wirtual::init_logger();
//!     let config = RelayConfig::from_env();
//!     let store = ConfigStore::new(config.config_dir.clone());
//!     let mut state = SessionState::new(&config, &store);
//!     state.push_user_text("Open a terminal and print the date");
//!
//!     let (sink, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let agent = AnthropicSampler::from_config(&config);
//!     let relay = async {
//!         let _ = relay_turn(&agent, &mut state, &sink).await;
//!         drop(sink);
//!     };
//!     let print = async {
//!         while let Some(chunk) = rx.recv().await {
//!             print!("{}", chunk);
//!         }
//!     };
//!     tokio::join!(relay, print);
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] backend exactly once.
///
/// ```rust
/// wirtual::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod wirtual;

pub use wirtual::agent_loop;
pub use wirtual::agent_loop::{AgentLoop, LoopError, LoopObserver, SamplingRequest};
pub use wirtual::config;
pub use wirtual::config::{PlannerConfig, RelayConfig};
pub use wirtual::message;
pub use wirtual::message::{Content, Message, Sender, ToolResult};
pub use wirtual::orchestrator;
pub use wirtual::orchestrator::{OrchestrationPhase, Orchestrator, PlannerClient};
pub use wirtual::provider;
pub use wirtual::provider::ApiProvider;
pub use wirtual::relay;
pub use wirtual::renderer;
pub use wirtual::sampler;
pub use wirtual::screens;
#[cfg(feature = "server")]
pub use wirtual::server;
pub use wirtual::session_state;
pub use wirtual::session_state::SessionState;
pub use wirtual::storage;
pub use wirtual::tools;
