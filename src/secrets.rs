use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::{AppConfig, SessionBackend};
use crate::errors::{AppError, AppResult};

/// Synchronous key-value store for opaque credentials.
#[derive(Clone)]
pub struct SecretVault {
    service_name: String,
    backend: VaultBackend,
}

#[derive(Clone)]
enum VaultBackend {
    Keyring,
    Memory(MemoryStore),
}

#[derive(Clone, Default)]
struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, SecretString>>>,
    locked: Arc<Mutex<HashSet<String>>>,
}

impl SecretVault {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            backend: VaultBackend::Keyring,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            service_name: "in-memory".to_string(),
            backend: VaultBackend::Memory(MemoryStore::default()),
        }
    }

    /// Makes every later write to `account` fail the way a locked keychain does.
    #[cfg(test)]
    pub(crate) fn lock_account(&self, account: &str) {
        if let VaultBackend::Memory(store) = &self.backend {
            store.locked.lock().insert(account.to_string());
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match config.session_backend {
            SessionBackend::Keyring => Self::new(config.keyring_service.clone()),
            SessionBackend::Memory => Self::in_memory(),
        }
    }

    pub fn read_secret(&self, account: &str) -> AppResult<Option<SecretString>> {
        match &self.backend {
            VaultBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, account)?;
                match entry.get_password() {
                    Ok(value) => Ok(Some(SecretString::from(value))),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(err) => Err(AppError::from(err)),
                }
            }
            VaultBackend::Memory(store) => Ok(store.entries.lock().get(account).cloned()),
        }
    }

    pub fn write_secret(&self, account: &str, secret: &SecretString) -> AppResult<()> {
        match &self.backend {
            VaultBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, account)?;
                entry.set_password(secret.expose_secret())?;
            }
            VaultBackend::Memory(store) => {
                if store.locked.lock().contains(account) {
                    return Err(AppError::Keychain(keyring::Error::NoStorageAccess(
                        format!("{account} is locked").into(),
                    )));
                }
                store
                    .entries
                    .lock()
                    .insert(account.to_string(), secret.clone());
            }
        }
        debug!(
            target: "secret_vault",
            service = %self.service_name,
            account,
            "stored secret"
        );
        Ok(())
    }

    pub fn delete(&self, account: &str) -> AppResult<()> {
        match &self.backend {
            VaultBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, account)?;
                match entry.delete_password() {
                    Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(err) => Err(AppError::from(err)),
                }
            }
            VaultBackend::Memory(store) => {
                store.entries.lock().remove(account);
                Ok(())
            }
        }
    }

    pub fn has(&self, account: &str) -> AppResult<bool> {
        self.read_secret(account).map(|secret| secret.is_some())
    }
}
