use serde::{Deserialize, Serialize};

use crate::types::Mode;

pub const DEFAULT_TARGET_TEMP_F: f32 = 68.0;
pub const MIN_TARGET_TEMP_F: f32 = 50.0;
pub const MAX_TARGET_TEMP_F: f32 = 90.0;

/// Hardware-protective limits enforced by the safety layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Logic heartbeat timeout before all actuators are forced off.
    pub failsafe_timeout_ms: u64,
    /// Minimum dwell between a non-fan actuator's OFF and its next ON
    /// (compressor protection).
    pub min_off_time_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            failsafe_timeout_ms: 300_000,
            min_off_time_ms: 300_000,
        }
    }
}

/// Decision-cycle tuning for the control engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub hysteresis_on_f: f32,
    pub hysteresis_off_f: f32,
    /// Separation between heat and cool setpoints in AUTO mode.
    pub auto_deadband_f: f32,
    /// Hard ceiling on continuous time in HEATING or COOLING.
    pub max_run_time_ms: u64,
    /// Remote override readings older than this are ignored.
    pub remote_timeout_ms: u64,
    /// Local sensor readings older than this are treated as absent.
    pub sensor_stale_timeout_ms: u64,
    pub settings_save_debounce_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            hysteresis_on_f: 0.5,
            hysteresis_off_f: 0.5,
            auto_deadband_f: 3.0,
            max_run_time_ms: 7_200_000,
            remote_timeout_ms: 300_000,
            sensor_stale_timeout_ms: 300_000,
            settings_save_debounce_ms: 2_000,
        }
    }
}

/// The slice of state written back to persistent storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub mode: Mode,
    pub target_temp_f: f32,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            target_temp_f: DEFAULT_TARGET_TEMP_F,
        }
    }
}

impl PersistedSettings {
    /// Clamp loaded values into safe bounds. A non-finite target (corrupt
    /// storage) resets to the default rather than propagating.
    pub fn sanitize(&mut self) {
        if !self.target_temp_f.is_finite() {
            self.target_temp_f = DEFAULT_TARGET_TEMP_F;
        }
        self.target_temp_f = self.target_temp_f.clamp(MIN_TARGET_TEMP_F, MAX_TARGET_TEMP_F);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.2".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

/// Everything the controller persists as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub settings: PersistedSettings,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_clamps_target_into_bounds() {
        let mut settings = PersistedSettings {
            mode: Mode::Heat,
            target_temp_f: 120.0,
        };
        settings.sanitize();
        assert_eq!(settings.target_temp_f, MAX_TARGET_TEMP_F);

        settings.target_temp_f = 10.0;
        settings.sanitize();
        assert_eq!(settings.target_temp_f, MIN_TARGET_TEMP_F);
    }

    #[test]
    fn sanitize_resets_non_finite_target() {
        let mut settings = PersistedSettings {
            mode: Mode::Auto,
            target_temp_f: f32::NAN,
        };
        settings.sanitize();
        assert_eq!(settings.target_temp_f, DEFAULT_TARGET_TEMP_F);
    }
}
