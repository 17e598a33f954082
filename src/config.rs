use std::time::Duration;

use crate::github::client::DEFAULT_API_BASE_URL;
use crate::relay::DEFAULT_REQUEST_TIMEOUT;

pub const DEFAULT_APPROVAL_MESSAGE: &str = "lgtm";

#[derive(Debug, Clone)]
pub struct Config {
    /// Shared bearer token between relay and agents. Unset disables auth.
    /// Set via LGTM_API_AUTH_TOKEN.
    pub api_auth_token: Option<String>,
    /// Personal access token the agent acts with. Only `client` needs it.
    pub github_token: Option<String>,
    pub github_api_url: String,
    /// How long the relay waits for an approver's answer.
    /// Set via LGTM_REQUEST_TIMEOUT_SECS. Default: 10.
    pub request_timeout: Duration,
    /// Review body posted with an approval.
    pub approval_message: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl Config {
    pub fn require_github_token(&self) -> anyhow::Result<&str> {
        self.github_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("LGTM_GITHUB_TOKEN must be set to run the approver agent"))
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let request_timeout = match non_empty("LGTM_REQUEST_TIMEOUT_SECS") {
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|_| anyhow::anyhow!("LGTM_REQUEST_TIMEOUT_SECS must be a whole number of seconds, got {:?}", raw))?;
            if secs == 0 {
                anyhow::bail!("LGTM_REQUEST_TIMEOUT_SECS must be greater than zero");
            }
            Duration::from_secs(secs)
        }
        None => DEFAULT_REQUEST_TIMEOUT,
    };

    Ok(Config {
        api_auth_token: non_empty("LGTM_API_AUTH_TOKEN"),
        github_token: non_empty("LGTM_GITHUB_TOKEN"),
        github_api_url: non_empty("LGTM_GITHUB_API_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.into()),
        request_timeout,
        approval_message: non_empty("LGTM_APPROVAL_MESSAGE")
            .unwrap_or_else(|| DEFAULT_APPROVAL_MESSAGE.into()),
        log_json: non_empty("LGTM_LOG_JSON")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false),
    })
}
