// src/wirtual/mod.rs

pub mod agent_loop;
pub mod config;
pub mod http_client_pool;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod relay;
pub mod renderer;
pub mod sampler;
pub mod screens;
#[cfg(feature = "server")]
pub mod server;
pub mod session_state;
pub mod storage;
pub mod tools;

pub use config::RelayConfig;
pub use session_state::SessionState;
