//! API providers, their default models, and the advisory credential check.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backends the agent loop can be pointed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    /// Anthropic's first-party Messages API.
    Anthropic,
    /// Claude on AWS Bedrock.
    Bedrock,
    /// Claude on Google Vertex AI.
    Vertex,
}

impl ApiProvider {
    pub const ALL: [ApiProvider; 3] = [
        ApiProvider::Anthropic,
        ApiProvider::Bedrock,
        ApiProvider::Vertex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiProvider::Anthropic => "anthropic",
            ApiProvider::Bedrock => "bedrock",
            ApiProvider::Vertex => "vertex",
        }
    }

    /// Model identifier a fresh session starts with for this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            ApiProvider::Anthropic => "claude-3-5-sonnet-20241022",
            ApiProvider::Bedrock => "anthropic.claude-3-5-sonnet-20241022-v2:0",
            ApiProvider::Vertex => "claude-3-5-sonnet-v2@20241022",
        }
    }
}

impl fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a provider name is not one of the known backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown API provider '{}' (expected anthropic, bedrock or vertex)",
            self.0
        )
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for ApiProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(ApiProvider::Anthropic),
            "bedrock" => Ok(ApiProvider::Bedrock),
            "vertex" => Ok(ApiProvider::Vertex),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// The slice of the host environment that credential resolution looks at.
///
/// [`CredentialEnv::from_process`] snapshots the real environment; tests build one by
/// hand so resolution never depends on the machine running them.
#[derive(Clone, Debug, Default)]
pub struct CredentialEnv {
    pub vars: HashMap<String, String>,
    pub home: Option<PathBuf>,
}

impl CredentialEnv {
    pub fn from_process() -> Self {
        Self {
            vars: env::vars().collect(),
            home: dirs::home_dir(),
        }
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    fn path_var_or_home(&self, key: &str, relative: &str) -> Option<PathBuf> {
        self.var(key)
            .map(PathBuf::from)
            .or_else(|| self.home.as_ref().map(|h| h.join(relative)))
    }
}

/// Check that `provider` has what it needs to authenticate.
///
/// Returns a user-facing message describing the problem, or `None` when credentials
/// look usable. The check is advisory: it reads the environment and credential files
/// but never mutates anything, and resolution failures become messages rather than
/// errors.
pub fn validate_auth(
    provider: ApiProvider,
    api_key: Option<&str>,
    env: &CredentialEnv,
) -> Option<String> {
    match provider {
        ApiProvider::Anthropic => {
            if api_key.map(|k| k.trim().is_empty()).unwrap_or(true) {
                return Some("Enter your Anthropic API key to continue.".to_string());
            }
            None
        }
        ApiProvider::Bedrock => {
            if resolve_aws_credentials(env) {
                None
            } else {
                Some("You must have AWS credentials set up to use the Bedrock API.".to_string())
            }
        }
        ApiProvider::Vertex => {
            if env.var("CLOUD_ML_REGION").is_none() {
                return Some(
                    "Set the CLOUD_ML_REGION environment variable to use the Vertex API."
                        .to_string(),
                );
            }
            match resolve_google_credentials(env) {
                Ok(true) => None,
                Ok(false) => {
                    Some("Your google cloud credentials are not set up correctly.".to_string())
                }
                Err(e) => {
                    log::warn!("Google credential resolution failed: {}", e);
                    Some(format!(
                        "Your google cloud credentials are not set up correctly: {}",
                        e
                    ))
                }
            }
        }
    }
}

/// Walk the AWS default chain: static env keys, web identity, then the shared
/// credentials file for `AWS_PROFILE` (or `default`).
fn resolve_aws_credentials(env: &CredentialEnv) -> bool {
    if env.var("AWS_ACCESS_KEY_ID").is_some() && env.var("AWS_SECRET_ACCESS_KEY").is_some() {
        return true;
    }
    if let Some(token_file) = env.var("AWS_WEB_IDENTITY_TOKEN_FILE") {
        if Path::new(token_file).is_file() && env.var("AWS_ROLE_ARN").is_some() {
            return true;
        }
    }

    let Some(path) = env.path_var_or_home("AWS_SHARED_CREDENTIALS_FILE", ".aws/credentials")
    else {
        return false;
    };
    let profile = env.var("AWS_PROFILE").unwrap_or("default");
    match fs::read_to_string(&path) {
        Ok(contents) => profile_has_keys(&contents, profile),
        Err(e) => {
            log::debug!("No AWS credentials file at {}: {}", path.display(), e);
            false
        }
    }
}

/// True when the INI `profile` section defines both access key fields.
fn profile_has_keys(contents: &str, profile: &str) -> bool {
    let mut in_profile = false;
    let mut has_id = false;
    let mut has_secret = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim();
            let name = name.strip_prefix("profile ").unwrap_or(name);
            in_profile = name == profile;
            continue;
        }
        if !in_profile {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "aws_access_key_id" if !value.is_empty() => has_id = true,
                "aws_secret_access_key" if !value.is_empty() => has_secret = true,
                _ => {}
            }
        }
    }

    has_id && has_secret
}

/// Locate application-default credentials and check they parse as a credential document.
fn resolve_google_credentials(env: &CredentialEnv) -> Result<bool, String> {
    let Some(path) = env.path_var_or_home(
        "GOOGLE_APPLICATION_CREDENTIALS",
        ".config/gcloud/application_default_credentials.json",
    ) else {
        return Ok(false);
    };
    if !path.is_file() {
        return Ok(false);
    }

    let raw = fs::read_to_string(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let doc: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(doc.get("type").and_then(|t| t.as_str()).is_some())
}
