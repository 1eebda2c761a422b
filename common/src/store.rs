use thiserror::Error;
use tracing::warn;

use crate::config::PersistedSettings;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persistence capability for `{mode, target}`. Implementations are expected
/// to be cheap to call; the engine debounces writes so `save` runs no more
/// than once per few seconds.
pub trait SettingsStore: Send {
    fn load(&self) -> Result<PersistedSettings, StoreError>;
    fn save(&self, settings: &PersistedSettings) -> Result<(), StoreError>;
}

/// Load through a store, degrading to sanitized defaults on any failure.
pub fn load_or_default(store: &dyn SettingsStore) -> PersistedSettings {
    let mut settings = store.load().unwrap_or_else(|err| {
        warn!("failed to load settings, using defaults: {err}");
        PersistedSettings::default()
    });
    settings.sanitize();
    settings
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory store recording every save; clone a handle before moving
    /// it into the engine to observe writes.
    #[derive(Default, Clone)]
    pub struct MemoryStore {
        pub saved: Arc<Mutex<Vec<PersistedSettings>>>,
        pub initial: Option<PersistedSettings>,
        pub fail_load: bool,
    }

    impl SettingsStore for MemoryStore {
        fn load(&self) -> Result<PersistedSettings, StoreError> {
            if self.fail_load {
                return Err(StoreError::Io(std::io::Error::other("backing store gone")));
            }
            Ok(self.initial.clone().unwrap_or_default())
        }

        fn save(&self, settings: &PersistedSettings) -> Result<(), StoreError> {
            self.saved.lock().unwrap().push(settings.clone());
            Ok(())
        }
    }
}
