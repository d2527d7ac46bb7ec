//! Shared HTTP clients, one per base URL.
//!
//! The agent loop and the planner each call out repeatedly during one orchestration;
//! reusing a pooled `reqwest::Client` per base URL keeps connections warm across those
//! calls and across requests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use lazy_static::lazy_static;

lazy_static! {
    static ref CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> = Mutex::new(HashMap::new());
}

/// Return the pooled client for `base_url`, creating it on first use.
pub fn get_or_create_client(base_url: &str) -> Result<reqwest::Client, reqwest::Error> {
    let mut pool = CLIENT_POOL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(client) = pool.get(base_url) {
        return Ok(client.clone());
    }
    let client = create_pooled_client()?;
    log::debug!("created pooled HTTP client for {}", base_url);
    pool.insert(base_url.to_string(), client.clone());
    Ok(client)
}

fn create_pooled_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
}

#[cfg(test)]
fn is_pooled(base_url: &str) -> bool {
    CLIENT_POOL
        .lock()
        .map(|pool| pool.contains_key(base_url))
        .unwrap_or(false)
}
