use tracing::{info, warn};

use crate::config::{ControlConfig, PersistedSettings, MAX_TARGET_TEMP_F, MIN_TARGET_TEMP_F};
use crate::safety::{RelayDriver, SafetyLayer};
use crate::store::{load_or_default, SettingsStore};
use crate::temperature::TemperatureFeed;
use crate::types::{ActuatorId, ControlState, EngineStatus, Mode};

/// Mode-driven control state machine.
///
/// Converts the target temperature and the live reading into a desired
/// actuator state, committing every transition through the safety layer.
/// The recorded [`ControlState`] is always what the safety layer actually
/// applied, never what was requested: a refused HEATING/COOLING request
/// lands in the matching WAIT state and is retried on the next cycle.
pub struct ControlEngine {
    config: ControlConfig,
    settings: PersistedSettings,
    state: ControlState,
    state_entered_ms: u64,
    feed: TemperatureFeed,
    store: Box<dyn SettingsStore>,
    save_pending: bool,
    last_save_request_ms: u64,
}

impl ControlEngine {
    pub fn new(config: ControlConfig, store: Box<dyn SettingsStore>, now_ms: u64) -> Self {
        let settings = load_or_default(store.as_ref());
        info!(
            "engine starting: mode {}, target {:.1}F",
            settings.mode.as_str(),
            settings.target_temp_f
        );
        Self {
            config,
            settings,
            state: ControlState::Idle,
            state_entered_ms: now_ms,
            feed: TemperatureFeed::new(),
            store,
            save_pending: false,
            last_save_request_ms: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn target_temp_f(&self) -> f32 {
        self.settings.target_temp_f
    }

    pub fn settings(&self) -> &PersistedSettings {
        &self.settings
    }

    /// Change the user mode. Any change immediately collapses the state to
    /// IDLE through the safety layer — a mode change never inherits a
    /// dangling actuator state.
    pub fn set_mode<D: RelayDriver>(
        &mut self,
        mode: Mode,
        now_ms: u64,
        safety: &mut SafetyLayer<D>,
    ) -> bool {
        if self.settings.mode == mode {
            return false;
        }
        info!("mode change: {} -> {}", self.settings.mode.as_str(), mode.as_str());
        self.settings.mode = mode;
        self.change_state(ControlState::Idle, now_ms, safety);
        self.mark_dirty(now_ms);
        true
    }

    /// Re-validates the bound even though callers validate at the boundary.
    pub fn set_target(&mut self, temp_f: f32, now_ms: u64) -> bool {
        if !temp_f.is_finite() || !(MIN_TARGET_TEMP_F..=MAX_TARGET_TEMP_F).contains(&temp_f) {
            warn!("rejecting out-of-range target {temp_f}");
            return false;
        }
        if (self.settings.target_temp_f - temp_f).abs() <= 0.01 {
            return false;
        }
        self.settings.target_temp_f = temp_f;
        self.mark_dirty(now_ms);
        true
    }

    /// Remote override reading; preferred over the local sensor while fresh.
    pub fn provide_remote_temp(&mut self, temp_f: f32, now_ms: u64) {
        self.feed.update_remote(temp_f, now_ms);
    }

    /// Cached local sensor poll result. `None` marks the sensor invalid.
    pub fn provide_local_temp(&mut self, temp_f: Option<f32>, now_ms: u64) {
        self.feed.update_local(temp_f, now_ms);
    }

    /// The decision cycle, run at a fixed interval (>= 1s).
    pub fn tick<D: RelayDriver>(&mut self, now_ms: u64, safety: &mut SafetyLayer<D>) {
        safety.heartbeat(now_ms);
        self.flush_settings_if_due(now_ms);

        let Some(temp) = self.feed.effective(&self.config, now_ms) else {
            // Never guess a temperature. FAN and OFF keep working without one.
            if self.settings.mode.is_conditioning() && self.state != ControlState::Idle {
                warn!("no valid temperature, forcing IDLE");
                self.change_state(ControlState::Idle, now_ms, safety);
            }
            return;
        };

        if self.state.is_running()
            && now_ms.saturating_sub(self.state_entered_ms) > self.config.max_run_time_ms
        {
            warn!("max run time exceeded in {}, forcing IDLE", self.state.as_str());
            self.change_state(ControlState::Idle, now_ms, safety);
            return;
        }

        self.evaluate(temp, now_ms, safety);
    }

    pub fn status(&self, now_ms: u64) -> EngineStatus {
        EngineStatus {
            mode: self.settings.mode.as_str(),
            state: self.state.as_str(),
            target_temp: self.settings.target_temp_f,
            effective_temp: self.feed.effective(&self.config, now_ms),
            using_remote: self.feed.using_remote(&self.config, now_ms),
            state_age_ms: now_ms.saturating_sub(self.state_entered_ms),
        }
    }

    /// When a pending settings change has sat past the debounce window,
    /// write it through the store. A failed save backs off one window.
    fn flush_settings_if_due(&mut self, now_ms: u64) {
        if !self.save_pending
            || now_ms.saturating_sub(self.last_save_request_ms)
                <= self.config.settings_save_debounce_ms
        {
            return;
        }
        match self.store.save(&self.settings) {
            Ok(()) => {
                self.save_pending = false;
                info!("settings saved");
            }
            Err(err) => {
                warn!("settings save failed: {err}");
                self.last_save_request_ms = now_ms;
            }
        }
    }

    fn mark_dirty(&mut self, now_ms: u64) {
        self.save_pending = true;
        self.last_save_request_ms = now_ms;
    }

    fn evaluate<D: RelayDriver>(&mut self, t: f32, now_ms: u64, safety: &mut SafetyLayer<D>) {
        let target = self.settings.target_temp_f;
        let on = self.config.hysteresis_on_f;
        let off = self.config.hysteresis_off_f;

        match self.settings.mode {
            Mode::Off => {
                if self.state != ControlState::Idle {
                    self.change_state(ControlState::Idle, now_ms, safety);
                }
            }
            Mode::Fan => {
                if self.state != ControlState::FanOn {
                    self.change_state(ControlState::FanOn, now_ms, safety);
                }
            }
            Mode::Heat => match self.state {
                ControlState::Idle | ControlState::WaitHeat => {
                    if t <= target - on {
                        self.change_state(ControlState::Heating, now_ms, safety);
                    }
                }
                ControlState::Heating => {
                    if t >= target + off {
                        self.change_state(ControlState::Idle, now_ms, safety);
                    }
                }
                _ => self.change_state(ControlState::Idle, now_ms, safety),
            },
            Mode::Cool => match self.state {
                ControlState::Idle | ControlState::WaitCool => {
                    if t >= target + on {
                        self.change_state(ControlState::Cooling, now_ms, safety);
                    }
                }
                ControlState::Cooling => {
                    if t <= target - off {
                        self.change_state(ControlState::Idle, now_ms, safety);
                    }
                }
                _ => self.change_state(ControlState::Idle, now_ms, safety),
            },
            Mode::Auto => {
                let heat_target = target - self.config.auto_deadband_f / 2.0;
                let cool_target = target + self.config.auto_deadband_f / 2.0;

                match self.state {
                    ControlState::Idle | ControlState::WaitHeat | ControlState::WaitCool => {
                        if t <= heat_target - on {
                            self.change_state(ControlState::Heating, now_ms, safety);
                        } else if t >= cool_target + on {
                            self.change_state(ControlState::Cooling, now_ms, safety);
                        }
                    }
                    ControlState::Heating => {
                        if t >= heat_target + off {
                            self.change_state(ControlState::Idle, now_ms, safety);
                        }
                    }
                    ControlState::Cooling => {
                        if t <= cool_target - off {
                            self.change_state(ControlState::Idle, now_ms, safety);
                        }
                    }
                    ControlState::FanOn => self.change_state(ControlState::Idle, now_ms, safety),
                }
            }
        }
    }

    /// Commit a transition through the safety layer and record the
    /// *effective* outcome, which may be a WAIT state on rejection.
    ///
    /// `state_entered_ms` resets on every change, WAIT landings included:
    /// the max-run-time limit measures continuous time in one state, not
    /// aggregate time spent trying to heat or cool.
    fn change_state<D: RelayDriver>(
        &mut self,
        requested: ControlState,
        now_ms: u64,
        safety: &mut SafetyLayer<D>,
    ) {
        if self.state == requested {
            return;
        }

        let mut effective = requested;
        match requested {
            ControlState::Idle | ControlState::WaitHeat | ControlState::WaitCool => {
                let _ = safety.request(ActuatorId::Heat, false, now_ms);
                let _ = safety.request(ActuatorId::Cool, false, now_ms);
                let _ = safety.request(ActuatorId::Fan, false, now_ms);
            }
            ControlState::Heating => {
                if safety.request(ActuatorId::Heat, true, now_ms).accepted() {
                    let _ = safety.request(ActuatorId::Cool, false, now_ms);
                    let _ = safety.request(ActuatorId::Fan, false, now_ms);
                } else {
                    info!("heat request refused, holding in WAIT_HEAT");
                    effective = ControlState::WaitHeat;
                }
            }
            ControlState::Cooling => {
                if safety.request(ActuatorId::Cool, true, now_ms).accepted() {
                    let _ = safety.request(ActuatorId::Heat, false, now_ms);
                    // The blower runs whenever the compressor does.
                    let _ = safety.request(ActuatorId::Fan, true, now_ms);
                } else {
                    info!("cool request refused, holding in WAIT_COOL");
                    effective = ControlState::WaitCool;
                }
            }
            ControlState::FanOn => {
                let _ = safety.request(ActuatorId::Heat, false, now_ms);
                let _ = safety.request(ActuatorId::Cool, false, now_ms);
                let _ = safety.request(ActuatorId::Fan, true, now_ms);
            }
        }

        self.state_entered_ms = now_ms;
        if effective != self.state {
            info!("state transition: {} -> {}", self.state.as_str(), effective.as_str());
        }
        self.state = effective;
    }
}
