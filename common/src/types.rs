use serde::{Deserialize, Serialize};

/// User intent. Persisted; integer-encoded values coming from storage or a
/// network command are validated through [`Mode::from_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Off,
    Heat,
    Cool,
    Auto,
    Fan,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
            Self::Auto => "AUTO",
            Self::Fan => "FAN",
        }
    }

    /// Out-of-range values map to `None`; callers fall back to `Off`.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            1 => Some(Self::Heat),
            2 => Some(Self::Cool),
            3 => Some(Self::Auto),
            4 => Some(Self::Fan),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "OFF" => Some(Self::Off),
            "HEAT" => Some(Self::Heat),
            "COOL" => Some(Self::Cool),
            "AUTO" => Some(Self::Auto),
            "FAN" => Some(Self::Fan),
            _ => None,
        }
    }

    /// True when the mode calls for conditioning (heat or cool may run).
    pub fn is_conditioning(self) -> bool {
        !matches!(self, Self::Off | Self::Fan)
    }
}

/// Engine-internal state. `WaitHeat`/`WaitCool` are never requested by the
/// decision table; they are the effective outcome when the safety layer
/// refuses a `Heating`/`Cooling` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    Idle,
    Heating,
    Cooling,
    FanOn,
    WaitHeat,
    WaitCool,
}

impl ControlState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Heating => "HEATING",
            Self::Cooling => "COOLING",
            Self::FanOn => "FAN_ON",
            Self::WaitHeat => "WAIT_HEAT",
            Self::WaitCool => "WAIT_COOL",
        }
    }

    /// True while an actuator is actively conditioning.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Heating | Self::Cooling)
    }
}

pub const ACTUATOR_COUNT: usize = 6;

/// Physical relay channels. The override channels mirror a legacy wall
/// controller wired in parallel; they share the interlock group of their
/// primary counterpart and are exempt from no other rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActuatorId {
    Heat,
    Cool,
    Fan,
    OvrHeat,
    OvrFan,
    OvrCool,
}

impl ActuatorId {
    pub const ALL: [ActuatorId; ACTUATOR_COUNT] = [
        Self::Heat,
        Self::Cool,
        Self::Fan,
        Self::OvrHeat,
        Self::OvrFan,
        Self::OvrCool,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Heat => 0,
            Self::Cool => 1,
            Self::Fan => 2,
            Self::OvrHeat => 3,
            Self::OvrFan => 4,
            Self::OvrCool => 5,
        }
    }

    /// The mutually-exclusive partner, if this actuator is interlocked.
    pub fn interlock_partner(self) -> Option<ActuatorId> {
        match self {
            Self::Heat => Some(Self::Cool),
            Self::Cool => Some(Self::Heat),
            Self::OvrHeat => Some(Self::OvrCool),
            Self::OvrCool => Some(Self::OvrHeat),
            Self::Fan | Self::OvrFan => None,
        }
    }

    /// Fan channels skip short-cycle protection for user comfort.
    pub fn is_fan(self) -> bool {
        matches!(self, Self::Fan | Self::OvrFan)
    }
}

/// Read-only engine view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub mode: &'static str,
    pub state: &'static str,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    #[serde(rename = "effectiveTemp")]
    pub effective_temp: Option<f32>,
    #[serde(rename = "usingRemote")]
    pub using_remote: bool,
    #[serde(rename = "stateAgeMs")]
    pub state_age_ms: u64,
}

/// Full controller snapshot served over HTTP and published retained.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: &'static str,
    pub state: &'static str,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    #[serde(rename = "effectiveTemp")]
    pub effective_temp: Option<f32>,
    #[serde(rename = "usingRemote")]
    pub using_remote: bool,
    #[serde(rename = "stateAgeMs")]
    pub state_age_ms: u64,
    pub relays: [bool; ACTUATOR_COUNT],
    #[serde(rename = "failsafeActive")]
    pub failsafe_active: bool,
    #[serde(rename = "uptimeSec")]
    pub uptime_sec: u64,
    #[serde(rename = "startedAtEpoch")]
    pub started_at_epoch: i64,
}

/// Compact retained MQTT state payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatePayload {
    pub temp: Option<f32>,
    pub target: f32,
    pub mode: &'static str,
    pub state: &'static str,
    pub failsafe: bool,
}
