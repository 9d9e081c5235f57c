#![allow(dead_code)]

use ayush_mapper::{AppConfig, AppState, SecretVault, SessionBackend, TokenPair};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use httptest::Server;
use serde_json::{json, Value};

pub const EXPIRY: i64 = 4_102_444_800;

/// Unsigned JWT carrying the claims the backend issues.
pub fn access_token(email: &str, marker: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({
            "token_type": "access",
            "user_id": 42,
            "email": email,
            "username": email.split('@').next(),
            "organization": "CCRAS",
            "exp": EXPIRY,
            "jti": marker,
        })
        .to_string(),
    );
    format!("{header}.{payload}.sig-{marker}")
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn config_for(server: &Server) -> AppConfig {
    let mut config = AppConfig::default().with_base_url(server.url("/api").to_string());
    config.session_backend = SessionBackend::Memory;
    config
}

pub fn app_for(server: &Server, vault: &SecretVault) -> AppState {
    AppState::with_vault(vault.clone(), config_for(server)).expect("app state")
}

/// App state whose session already holds `access` / `refresh`.
pub fn signed_in_app(server: &Server, access: &str, refresh: &str) -> (AppState, SecretVault) {
    let vault = SecretVault::in_memory();
    let app = app_for(server, &vault);
    app.session()
        .save(TokenPair::new(access, refresh))
        .expect("seed session");
    (app, vault)
}

pub fn mapping_body(term: &str, code: &str, confidence: u8) -> Value {
    json!({
        "id": 1,
        "ayush_term": term,
        "icd_code": code,
        "disease_name": "Neuromuscular disorder",
        "disease_category": "Nervous system",
        "confidence": confidence,
        "explanation": "Vata imbalance presents as neuromuscular symptoms",
        "source": "WHO ICD-11 TM2",
        "created_at": "2024-03-01T10:15:00Z",
        "processing_steps": [
            { "agent": "Extraction Agent", "output": "vata" },
            { "agent": "Classification Agent", "output": "Vatavyadhi" },
            { "agent": "Mapping Agent", "output": code },
        ],
    })
}
