use std::{env, io};

use serde::Serialize;
use tracing::debug;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_KEYRING_SERVICE: &str = "AyushMapper";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Keyring,
    Memory,
}

impl SessionBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keyring" => Some(Self::Keyring),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub api_base_url: String,
    pub request_timeout_secs: Option<u64>,
    pub session_backend: SessionBackend,
    pub keyring_service: String,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: None,
            session_backend: SessionBackend::Keyring,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            user_agent: default_user_agent(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            api_base_url: non_empty("AYUSH_API_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            request_timeout_secs: parse_u64("AYUSH_REQUEST_TIMEOUT_SECS").filter(|secs| *secs > 0),
            session_backend: non_empty("AYUSH_SESSION_BACKEND")
                .and_then(|raw| {
                    let parsed = SessionBackend::parse(&raw);
                    if parsed.is_none() {
                        debug!(value = %raw, "unknown session backend; using keyring");
                    }
                    parsed
                })
                .unwrap_or(defaults.session_backend),
            keyring_service: non_empty("AYUSH_KEYRING_SERVICE").unwrap_or(defaults.keyring_service),
            user_agent: non_empty("AYUSH_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

fn default_user_agent() -> String {
    format!("ayush-mapper/{}", env!("CARGO_PKG_VERSION"))
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_from_environment() {
        env::set_var("AYUSH_API_BASE_URL", "https://mapper.example.org/api/");
        env::set_var("AYUSH_SESSION_BACKEND", "Memory");
        env::set_var("AYUSH_REQUEST_TIMEOUT_SECS", "15");
        env::set_var("AYUSH_KEYRING_SERVICE", "  ");

        let config = AppConfig::from_env();

        assert_eq!(config.api_base_url, "https://mapper.example.org/api");
        assert_eq!(config.session_backend, SessionBackend::Memory);
        assert_eq!(config.request_timeout_secs, Some(15));
        assert_eq!(config.keyring_service, DEFAULT_KEYRING_SERVICE);
        assert!(config.user_agent.starts_with("ayush-mapper/"));
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let config = AppConfig::default().with_base_url("http://127.0.0.1:9000/api/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000/api");
        assert_eq!(config.request_timeout_secs, None);
    }
}
