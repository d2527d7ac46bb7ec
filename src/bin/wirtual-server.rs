use std::sync::Arc;

use wirtual::orchestrator::OpenAIPlanner;
use wirtual::provider::{validate_auth, CredentialEnv};
use wirtual::sampler::AnthropicSampler;
use wirtual::screens::ScreenLayout;
use wirtual::server::{serve, AppState};
use wirtual::session_state::resolve_api_key;
use wirtual::storage::ConfigStore;
use wirtual::RelayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    wirtual::init_logger();

    let mut config = RelayConfig::from_env();
    config.screens = ScreenLayout::detect().await;

    let api_key = resolve_api_key(&config, &ConfigStore::new(config.config_dir.clone()));
    if let Some(problem) = validate_auth(
        config.default_provider,
        api_key.as_deref(),
        &CredentialEnv::from_process(),
    ) {
        log::warn!("{}", problem);
    }
    if config.planner.api_key.is_empty() {
        log::warn!("OPENAI_API_KEY is not set; /api/process_input_api_using_model will fail");
    }

    let agent = Arc::new(AnthropicSampler::from_config(&config));
    let planner = Arc::new(OpenAIPlanner::new(config.planner.clone()));
    serve(AppState::new(config, agent, planner)).await
}
