use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::session::{Identity, SessionStore, TokenPair};

pub const LOGIN_PATH: &str = "/users/login/";
pub const REGISTER_PATH: &str = "/users/register/";
pub const REFRESH_PATH: &str = "/users/token/refresh/";

const MAX_RETRIES: u8 = 1;
const EVENT_CAPACITY: usize = 16;
const LOGIN_FALLBACK: &str = "Login failed. Please check your credentials.";
const REGISTER_FALLBACK: &str = "Registration failed. Please try again.";

/// One outbound call. `attempt` counts resends and only grows through
/// [`ApiRequest::retried`], which returns a fresh copy.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    attempt: u8,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            attempt: 0,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
            attempt: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    fn can_retry(&self) -> bool {
        self.attempt < MAX_RETRIES
    }

    fn retried(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Session lifecycle notifications for the presentation layer. A
/// `SessionEnded` event means the user must be sent back to sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: String },
    Refreshed,
    SignedOut,
    SessionEnded { reason: String },
}

#[derive(Clone)]
pub struct Registration {
    pub email: String,
    password: SecretString,
    pub organization: String,
    pub username: String,
}

impl Registration {
    /// Without an explicit name the username becomes the local part of the email.
    pub fn new(
        email: impl Into<String>,
        password: SecretString,
        organization: impl Into<String>,
        name: Option<String>,
    ) -> Self {
        let email = email.into();
        let username = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        Self {
            email,
            password,
            organization: organization.into(),
            username,
        }
    }
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    email: &'a str,
    password: &'a str,
    organization: &'a str,
    username: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct LoginGrant {
    access: String,
    refresh: String,
}

#[derive(Deserialize)]
struct RefreshGrant {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Clone)]
pub struct AuthenticatedClient {
    http: Client,
    base_url: String,
    session: SessionStore,
    refresh_guard: Arc<AsyncMutex<()>>,
    events: broadcast::Sender<SessionEvent>,
}

impl AuthenticatedClient {
    pub fn new(config: &AppConfig, session: SessionStore) -> AppResult<Self> {
        let base_url = config.api_base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|err| AppError::Config(format!("invalid API base URL: {err}")))?;

        let mut builder = Client::builder().user_agent(config.user_agent.as_str());
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            http: builder.build()?,
            base_url,
            session,
            refresh_guard: Arc::new(AsyncMutex::new(())),
            events,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn login(&self, email: &str, password: &SecretString) -> AppResult<Identity> {
        let body = LoginBody {
            email,
            password: password.expose_secret(),
        };
        let response = self
            .http
            .post(self.endpoint(LOGIN_PATH))
            .json(&body)
            .send()
            .await?;
        let grant: LoginGrant = decode_body(check_status(response).await?).await?;
        let identity = self.session.save(TokenPair::new(grant.access, grant.refresh))?;

        info!(target: "auth", user_id = %identity.user_id, "signed in");
        let _ = self.events.send(SessionEvent::SignedIn {
            user_id: identity.user_id.clone(),
        });
        Ok(identity)
    }

    pub async fn register(&self, registration: &Registration) -> AppResult<Value> {
        let body = RegisterBody {
            email: &registration.email,
            password: registration.password.expose_secret(),
            organization: &registration.organization,
            username: &registration.username,
        };
        let response = self
            .http
            .post(self.endpoint(REGISTER_PATH))
            .json(&body)
            .send()
            .await?;
        let confirmation = decode_body(check_status(response).await?).await?;
        info!(target: "auth", username = %registration.username, "registered account");
        Ok(confirmation)
    }

    pub fn logout(&self) -> AppResult<()> {
        self.session.clear()?;
        info!(target: "auth", "signed out");
        let _ = self.events.send(SessionEvent::SignedOut);
        Ok(())
    }

    /// Sends `request` with the current bearer token. A 401 triggers one
    /// session refresh and one resend of a copy of the request.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> AppResult<T> {
        let bearer = self.current_access();
        let unauthorized = match self.dispatch(&request, bearer.as_ref()).await {
            Err(err) if err.is_unauthorized() && request.can_retry() => err,
            outcome => return decode_body(outcome?).await,
        };
        debug!(
            target: "auth",
            path = %request.path,
            error = %unauthorized,
            "request unauthorized; renewing session"
        );

        let fresh = self.renew_session(bearer.as_ref()).await?;
        let retry = request.retried();
        match self.dispatch(&retry, Some(&fresh)).await {
            Err(err) if err.is_unauthorized() => {
                self.end_session("access token rejected after refresh");
                Err(AppError::SessionExpired(format!(
                    "{} still unauthorized after refresh",
                    retry.path
                )))
            }
            outcome => decode_body(outcome?).await,
        }
    }

    fn current_access(&self) -> Option<SecretString> {
        self.session.tokens().map(|tokens| tokens.access().clone())
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        bearer: Option<&SecretString>,
    ) -> AppResult<Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.endpoint(&request.path));
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        check_status(response).await
    }

    /// Refreshes are serialized. A caller that queued behind another refresh
    /// picks up the rotated token instead of refreshing again, or shares its
    /// failure without ending the session a second time.
    async fn renew_session(&self, stale: Option<&SecretString>) -> AppResult<SecretString> {
        let _guard = self.refresh_guard.lock().await;

        let Some(tokens) = self.session.tokens() else {
            // A bearer was sent, so whoever cleared the session already
            // published its end.
            if stale.is_none() {
                self.end_session("no refresh token available");
            }
            return Err(AppError::SessionExpired("no active session".into()));
        };
        let current = tokens.access().expose_secret();
        if stale.map(|token| token.expose_secret()) != Some(current) {
            debug!(target: "auth", "reusing access token rotated by a concurrent refresh");
            return Ok(tokens.access().clone());
        }

        let grant = match self.request_refresh(tokens.refresh()).await {
            Ok(grant) => grant,
            Err(err) => {
                warn!(target: "auth", error = %err, "token refresh failed");
                self.end_session("token refresh rejected");
                return Err(AppError::SessionExpired(format!("token refresh failed: {err}")));
            }
        };

        let stored = match grant.refresh {
            Some(rotated) => self.session.save(TokenPair::new(grant.access, rotated)),
            None => self.session.replace_access(SecretString::from(grant.access)),
        };
        if let Err(err) = stored {
            warn!(target: "auth", error = %err, "refreshed token could not be stored");
            self.end_session("refreshed token unusable");
            return Err(AppError::SessionExpired(format!(
                "refreshed token unusable: {err}"
            )));
        }

        let _ = self.events.send(SessionEvent::Refreshed);
        self.current_access()
            .ok_or_else(|| AppError::SessionExpired("session cleared during refresh".into()))
    }

    async fn request_refresh(&self, refresh: &SecretString) -> AppResult<RefreshGrant> {
        let response = self
            .http
            .post(self.endpoint(REFRESH_PATH))
            .json(&RefreshBody {
                refresh: refresh.expose_secret(),
            })
            .send()
            .await?;
        decode_body(check_status(response).await?).await
    }

    fn end_session(&self, reason: &str) {
        if let Err(err) = self.session.clear() {
            warn!(target: "auth", error = %err, "failed to clear stored tokens");
        }
        warn!(target: "auth", reason, "session ended");
        let _ = self.events.send(SessionEvent::SessionEnded {
            reason: reason.to_string(),
        });
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.json::<Value>().await.ok();
    let detail = body
        .as_ref()
        .and_then(|value| value.get("detail"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Err(AppError::Server {
        status,
        detail,
        body,
    })
}

async fn decode_body<T: DeserializeOwned>(response: Response) -> AppResult<T> {
    let bytes = response.bytes().await?;
    let payload = if bytes.is_empty() { &b"null"[..] } else { &bytes[..] };
    serde_json::from_slice(payload).map_err(|err| AppError::Decode(err.to_string()))
}

/// Banner text for a failed sign-in.
pub fn login_failure_message(err: &AppError) -> String {
    err.detail()
        .map(str::to_string)
        .unwrap_or_else(|| LOGIN_FALLBACK.to_string())
}

/// Banner text for a failed registration; field errors are listed as
/// `field: message`.
pub fn registration_failure_message(err: &AppError) -> String {
    let AppError::Server { body: Some(body), .. } = err else {
        return REGISTER_FALLBACK.to_string();
    };
    match body {
        Value::Object(fields) if !fields.is_empty() => fields
            .iter()
            .map(|(field, value)| format!("{field}: {}", render_field_error(value)))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => "Registration failed".to_string(),
        _ => err
            .detail()
            .map(str::to_string)
            .unwrap_or_else(|| REGISTER_FALLBACK.to_string()),
    }
}

fn render_field_error(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_field_error)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
