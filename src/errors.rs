use reqwest::StatusCode;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

const NETWORK_FALLBACK: &str = "Unable to reach the mapping service. Check your connection and try again.";
const SERVER_FALLBACK: &str = "Failed to map AYUSH term. Please try again.";
const SESSION_FALLBACK: &str = "Your session has ended. Please sign in again.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error("server responded with {status}")]
    Server {
        status: StatusCode,
        detail: Option<String>,
        body: Option<serde_json::Value>,
    },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error(transparent)]
    Keychain(#[from] keyring::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
}

impl AppError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AppError::Server { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    pub fn ends_session(&self) -> bool {
        matches!(self, AppError::SessionExpired(_))
    }

    /// Backend-supplied `detail` text, when the failure carried one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            AppError::Server { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Display-ready text for inline error banners.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(message) => message.clone(),
            AppError::SessionExpired(_) => SESSION_FALLBACK.to_string(),
            AppError::Network(_) => NETWORK_FALLBACK.to_string(),
            AppError::Server { detail, .. } => detail
                .clone()
                .unwrap_or_else(|| SERVER_FALLBACK.to_string()),
            _ => SERVER_FALLBACK.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_detail_is_surfaced_verbatim() {
        let err = AppError::Server {
            status: StatusCode::BAD_REQUEST,
            detail: Some("Term not recognised".into()),
            body: None,
        };
        assert_eq!(err.user_message(), "Term not recognised");
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn server_without_detail_falls_back() {
        let err = AppError::Server {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: None,
            body: None,
        };
        assert_eq!(err.user_message(), SERVER_FALLBACK);
    }

    #[test]
    fn session_loss_prompts_sign_in() {
        let err = AppError::SessionExpired("refresh rejected".into());
        assert!(err.ends_session());
        assert_eq!(err.user_message(), SESSION_FALLBACK);
    }
}
