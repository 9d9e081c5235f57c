use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::secrets::SecretVault;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Clone)]
pub struct TokenPair {
    access: SecretString,
    refresh: SecretString,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: SecretString::from(access.into()),
            refresh: SecretString::from(refresh.into()),
        }
    }

    pub fn access(&self) -> &SecretString {
        &self.access
    }

    pub fn refresh(&self) -> &SecretString {
        &self.refresh
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

/// User attributes read from the access token's claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub username: Option<String>,
    pub organization: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    user_id: Option<SubjectId>,
    #[serde(default)]
    sub: Option<SubjectId>,
    email: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    organization: Option<String>,
    exp: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubjectId {
    Text(String),
    Number(i64),
}

impl SubjectId {
    fn into_string(self) -> String {
        match self {
            SubjectId::Text(value) => value,
            SubjectId::Number(value) => value.to_string(),
        }
    }
}

/// Reads the claims segment of a JWT without verifying its signature.
pub fn decode_identity(token: &str) -> AppResult<Identity> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(AppError::Decode("access token is not a JWT".into())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| AppError::Decode(format!("access token payload: {err}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|err| AppError::Decode(format!("access token claims: {err}")))?;

    let user_id = claims
        .user_id
        .or(claims.sub)
        .map(SubjectId::into_string)
        .ok_or_else(|| AppError::Decode("access token missing subject".into()))?;
    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
        .ok_or_else(|| AppError::Decode("access token expiry out of range".into()))?;

    Ok(Identity {
        user_id,
        email: claims.email,
        username: claims.username.filter(|v| !v.is_empty()),
        organization: claims.organization.filter(|v| !v.is_empty()),
        expires_at,
    })
}

#[derive(Clone)]
struct Session {
    tokens: TokenPair,
    identity: Identity,
}

/// Owner of the persisted token pair and the identity derived from it.
///
/// Writers hold the snapshot lock across the vault writes, so readers only
/// ever see a complete pair.
#[derive(Clone)]
pub struct SessionStore {
    vault: SecretVault,
    current: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new(vault: SecretVault) -> Self {
        Self {
            vault,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Restores the persisted session. Undecodable or half-present tokens are
    /// wiped and reported as no session.
    pub fn load(&self) -> AppResult<Option<Identity>> {
        let mut current = self.current.write();
        let access = self.vault.read_secret(ACCESS_TOKEN_KEY)?;
        let refresh = self.vault.read_secret(REFRESH_TOKEN_KEY)?;

        match (access, refresh) {
            (Some(access), Some(refresh)) => match decode_identity(access.expose_secret()) {
                Ok(identity) => {
                    debug!(
                        target: "session_store",
                        user_id = %identity.user_id,
                        "restored persisted session"
                    );
                    *current = Some(Session {
                        tokens: TokenPair { access, refresh },
                        identity: identity.clone(),
                    });
                    Ok(Some(identity))
                }
                Err(err) => {
                    warn!(
                        target: "session_store",
                        error = %err,
                        "persisted access token unreadable; clearing session"
                    );
                    self.wipe_locked(&mut current)?;
                    Ok(None)
                }
            },
            (None, None) => {
                *current = None;
                Ok(None)
            }
            _ => {
                warn!(
                    target: "session_store",
                    "found only one persisted token; clearing session"
                );
                self.wipe_locked(&mut current)?;
                Ok(None)
            }
        }
    }

    pub fn save(&self, pair: TokenPair) -> AppResult<Identity> {
        let identity = decode_identity(pair.access.expose_secret())?;
        let mut current = self.current.write();
        self.vault.write_secret(ACCESS_TOKEN_KEY, &pair.access)?;
        if let Err(err) = self.vault.write_secret(REFRESH_TOKEN_KEY, &pair.refresh) {
            self.restore_access_locked(current.as_ref());
            return Err(err);
        }
        *current = Some(Session {
            tokens: pair,
            identity: identity.clone(),
        });
        info!(
            target: "session_store",
            user_id = %identity.user_id,
            "session saved"
        );
        Ok(identity)
    }

    /// Swaps in a refreshed access token, keeping the current refresh token.
    pub fn replace_access(&self, access: SecretString) -> AppResult<Identity> {
        let identity = decode_identity(access.expose_secret())?;
        let mut current = self.current.write();
        let refresh = current
            .as_ref()
            .map(|session| session.tokens.refresh.clone())
            .ok_or_else(|| AppError::SessionExpired("no session to refresh".into()))?;
        self.vault.write_secret(ACCESS_TOKEN_KEY, &access)?;
        *current = Some(Session {
            tokens: TokenPair { access, refresh },
            identity: identity.clone(),
        });
        debug!(
            target: "session_store",
            user_id = %identity.user_id,
            "access token replaced"
        );
        Ok(identity)
    }

    pub fn clear(&self) -> AppResult<()> {
        let mut current = self.current.write();
        self.wipe_locked(&mut current)
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.current
            .read()
            .as_ref()
            .map(|session| session.identity.clone())
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.current
            .read()
            .as_ref()
            .map(|session| session.tokens.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    /// Puts the stored access token back in step with `previous` after a
    /// half-finished save.
    fn restore_access_locked(&self, previous: Option<&Session>) {
        let restored = match previous {
            Some(session) => self
                .vault
                .write_secret(ACCESS_TOKEN_KEY, &session.tokens.access),
            None => self.vault.delete(ACCESS_TOKEN_KEY),
        };
        if let Err(err) = restored {
            warn!(
                target: "session_store",
                error = %err,
                "could not roll back access token; stored pair is inconsistent"
            );
        }
    }

    fn wipe_locked(&self, current: &mut Option<Session>) -> AppResult<()> {
        *current = None;
        let access = self.vault.delete(ACCESS_TOKEN_KEY);
        let refresh = self.vault.delete(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}
