mod client;
mod config;
mod controller;
mod errors;
mod mappings;
mod secrets;
mod session;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use client::{
    login_failure_message, registration_failure_message, ApiRequest, AuthenticatedClient,
    Registration, SessionEvent, LOGIN_PATH, REFRESH_PATH, REGISTER_PATH,
};
pub use config::{AppConfig, SessionBackend};
pub use controller::{
    MappingRequestController, PipelineStage, RequestFailure, RequestState, SubmitOutcome,
    PROGRESS_STAGES,
};
pub use errors::{AppError, AppResult};
pub use mappings::{
    Confidence, ConfidenceBand, HistorySummary, MappingGateway, MappingHistoryEntry,
    MappingRequest, MappingResult, MappingService, ProcessingStep, EMPTY_TERM_MESSAGE,
    HISTORY_PATH, MAP_TERM_PATH,
};
pub use secrets::SecretVault;
pub use session::{
    decode_identity, Identity, SessionStore, TokenPair, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};

/// Wiring of the session, client and gateway for one process.
pub struct AppState {
    config: AppConfig,
    client: AuthenticatedClient,
    gateway: Arc<MappingGateway>,
}

impl AppState {
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        Self::with_vault(SecretVault::from_config(&config), config)
    }

    pub fn with_vault(vault: SecretVault, config: AppConfig) -> AppResult<Self> {
        let session = SessionStore::new(vault);
        let restored = session.load()?;
        info!(
            api_base_url = %config.api_base_url,
            backend = ?config.session_backend,
            restored_session = restored.is_some(),
            "mapping client initialized"
        );
        let client = AuthenticatedClient::new(&config, session)?;
        let gateway = Arc::new(MappingGateway::new(client.clone()));
        Ok(Self {
            config,
            client,
            gateway,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn session(&self) -> &SessionStore {
        self.client.session()
    }

    pub fn gateway(&self) -> Arc<MappingGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn controller(&self) -> MappingRequestController {
        MappingRequestController::new(self.gateway())
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,ayush_mapper=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
