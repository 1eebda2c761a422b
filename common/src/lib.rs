pub mod config;
pub mod engine;
pub mod safety;
pub mod store;
pub mod temperature;
pub mod topics;
pub mod types;

pub use config::{
    ControlConfig, NetworkConfig, PersistedSettings, RuntimeConfig, SafetyConfig,
    MAX_TARGET_TEMP_F, MIN_TARGET_TEMP_F,
};
pub use engine::ControlEngine;
pub use safety::{RelayDriver, RequestOutcome, SafetyLayer, SafetySnapshot};
pub use store::{load_or_default, SettingsStore, StoreError};
pub use temperature::TemperatureFeed;
pub use topics::*;
pub use types::{
    ActuatorId, ControlState, ControllerStatus, EngineStatus, Mode, StatePayload, ACTUATOR_COUNT,
};
