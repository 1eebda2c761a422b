use serde::Serialize;
use tracing::{info, warn};

use crate::config::SafetyConfig;
use crate::types::{ActuatorId, ACTUATOR_COUNT};

/// Physical relay output capability, constructor-injected so the layer can
/// be driven against test doubles or a logging backend on host builds.
pub trait RelayDriver {
    fn set(&mut self, actuator: ActuatorId, on: bool);
    /// Hardware readback used by the boot safety check.
    fn is_energized(&self, actuator: ActuatorId) -> bool;
}

/// Outcome of a transition request. Rejection is a normal result the engine
/// handles by adopting a WAIT state, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Applied,
    RejectedInterlock,
    RejectedShortCycle,
}

impl RequestOutcome {
    pub fn accepted(self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy)]
struct RelayRecord {
    on: bool,
    last_off_ms: u64,
    last_on_ms: u64,
}

/// Per-actuator view plus the failsafe flag, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SafetySnapshot {
    pub relays: [bool; ACTUATOR_COUNT],
    #[serde(rename = "failsafeActive")]
    pub failsafe_active: bool,
}

/// Sole authority over physical actuator output.
///
/// Every transition passes through the interlock table and short-cycle
/// check; a heartbeat-driven failsafe forces everything off if the control
/// logic stops calling in. Both checks are pure reads of the relay records,
/// so a rejected request has no side effect beyond refreshing the heartbeat
/// and the engine can safely retry every cycle.
pub struct SafetyLayer<D: RelayDriver> {
    driver: D,
    config: SafetyConfig,
    records: [RelayRecord; ACTUATOR_COUNT],
    last_heartbeat_ms: u64,
    failsafe_active: bool,
}

impl<D: RelayDriver> SafetyLayer<D> {
    /// Takes control of the relays. Any actuator the hardware reports
    /// energized at power-up is forced off before any stored state is
    /// trusted.
    pub fn new(mut driver: D, config: SafetyConfig, now_ms: u64) -> Self {
        for actuator in ActuatorId::ALL {
            if driver.is_energized(actuator) {
                warn!("actuator {actuator:?} was ON at boot, forcing off");
            }
            driver.set(actuator, false);
        }

        Self {
            driver,
            config,
            records: [RelayRecord {
                on: false,
                last_off_ms: now_ms,
                last_on_ms: 0,
            }; ACTUATOR_COUNT],
            last_heartbeat_ms: now_ms,
            failsafe_active: false,
        }
    }

    /// Liveness signal from the control logic; fed once per decision cycle.
    pub fn heartbeat(&mut self, now_ms: u64) {
        self.last_heartbeat_ms = now_ms;
    }

    /// Request a transition. Every call counts as a heartbeat, accepted or
    /// not — the failsafe's purpose is "logic is alive", not "logic
    /// succeeded". Requesting the already-recorded state is an accepted
    /// no-op with no physical write.
    pub fn request(&mut self, actuator: ActuatorId, desired_on: bool, now_ms: u64) -> RequestOutcome {
        self.last_heartbeat_ms = now_ms;

        let record = self.records[actuator.index()];
        if record.on == desired_on {
            return RequestOutcome::Applied;
        }

        if desired_on {
            if self.interlock_blocked(actuator) {
                warn!("interlock blocked {actuator:?}");
                return RequestOutcome::RejectedInterlock;
            }
            if self.short_cycle_blocked(actuator, now_ms) {
                let off_for = now_ms.saturating_sub(record.last_off_ms);
                let wait_s = self.config.min_off_time_ms.saturating_sub(off_for) / 1000;
                info!("short-cycle blocked {actuator:?}, {wait_s}s remaining");
                return RequestOutcome::RejectedShortCycle;
            }
        }

        self.apply(actuator, desired_on, now_ms);
        RequestOutcome::Applied
    }

    /// Unconditional emergency off. Bypasses interlock and short-cycle
    /// rules, never fails, and is idempotent: physical writes happen only
    /// for actuators currently on, so two triggers in one tick (mode change
    /// plus failsafe) cannot double-drive the hardware. Updates every
    /// record's off timestamp. Does not count as a heartbeat — the failsafe
    /// clearing is reserved for live control logic.
    pub fn force_all_off(&mut self, now_ms: u64) {
        for actuator in ActuatorId::ALL {
            let record = &mut self.records[actuator.index()];
            if record.on {
                self.driver.set(actuator, false);
                record.on = false;
            }
            record.last_off_ms = now_ms;
        }
        warn!("all actuators forced OFF");
    }

    /// Failsafe check, run at the loop cadence (<= 1s). Trips once per
    /// episode; the flag clears only after a heartbeat resumes.
    pub fn tick(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_heartbeat_ms);
        if elapsed > self.config.failsafe_timeout_ms {
            if !self.failsafe_active {
                warn!("failsafe tripped: no heartbeat for {elapsed}ms");
                self.failsafe_active = true;
                self.force_all_off(now_ms);
            }
        } else {
            self.failsafe_active = false;
        }
    }

    pub fn get(&self, actuator: ActuatorId) -> bool {
        self.records[actuator.index()].on
    }

    pub fn failsafe_active(&self) -> bool {
        self.failsafe_active
    }

    pub fn snapshot(&self) -> SafetySnapshot {
        let mut relays = [false; ACTUATOR_COUNT];
        for actuator in ActuatorId::ALL {
            relays[actuator.index()] = self.records[actuator.index()].on;
        }
        SafetySnapshot {
            relays,
            failsafe_active: self.failsafe_active,
        }
    }

    fn interlock_blocked(&self, actuator: ActuatorId) -> bool {
        actuator
            .interlock_partner()
            .is_some_and(|partner| self.records[partner.index()].on)
    }

    fn short_cycle_blocked(&self, actuator: ActuatorId, now_ms: u64) -> bool {
        if actuator.is_fan() {
            return false;
        }
        let off_duration = now_ms.saturating_sub(self.records[actuator.index()].last_off_ms);
        off_duration < self.config.min_off_time_ms
    }

    fn apply(&mut self, actuator: ActuatorId, on: bool, now_ms: u64) {
        self.driver.set(actuator, on);
        let record = &mut self.records[actuator.index()];
        record.on = on;
        if on {
            record.last_on_ms = now_ms;
        } else {
            record.last_off_ms = now_ms;
        }
        info!("actuator {actuator:?} -> {}", if on { "ON" } else { "OFF" });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Records every physical write so tests can count them.
    #[derive(Default, Clone)]
    pub struct MockDriver {
        pub writes: Rc<RefCell<Vec<(ActuatorId, bool)>>>,
        pub energized_at_boot: Vec<ActuatorId>,
    }

    impl RelayDriver for MockDriver {
        fn set(&mut self, actuator: ActuatorId, on: bool) {
            self.writes.borrow_mut().push((actuator, on));
        }

        fn is_energized(&self, actuator: ActuatorId) -> bool {
            self.energized_at_boot.contains(&actuator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockDriver;
    use super::*;
    use pretty_assertions::assert_eq;

    const MIN_OFF: u64 = 300_000;
    const TIMEOUT: u64 = 300_000;

    fn layer() -> SafetyLayer<MockDriver> {
        SafetyLayer::new(MockDriver::default(), SafetyConfig::default(), 0)
    }

    #[test]
    fn boot_forces_every_relay_off() {
        let driver = MockDriver {
            energized_at_boot: vec![ActuatorId::Heat],
            ..MockDriver::default()
        };
        let writes = driver.writes.clone();
        let layer = SafetyLayer::new(driver, SafetyConfig::default(), 0);

        assert_eq!(writes.borrow().len(), ACTUATOR_COUNT);
        assert!(writes.borrow().iter().all(|(_, on)| !on));
        assert!(!layer.get(ActuatorId::Heat));
    }

    #[test]
    fn interlock_rejects_partner_of_active_actuator() {
        let mut layer = layer();
        // Past the initial short-cycle window.
        let now = MIN_OFF;
        assert_eq!(layer.request(ActuatorId::Heat, true, now), RequestOutcome::Applied);
        assert_eq!(
            layer.request(ActuatorId::Cool, true, now),
            RequestOutcome::RejectedInterlock
        );
        assert!(!layer.get(ActuatorId::Cool));

        assert_eq!(layer.request(ActuatorId::OvrCool, true, now), RequestOutcome::Applied);
        assert_eq!(
            layer.request(ActuatorId::OvrHeat, true, now),
            RequestOutcome::RejectedInterlock
        );
    }

    #[test]
    fn interlock_never_allows_heat_and_cool_together() {
        let mut layer = layer();
        let mut now = MIN_OFF;
        // Arbitrary request churn; the pair must never both read ON.
        for step in 0..50u64 {
            now += 30_000;
            let _ = layer.request(ActuatorId::Heat, step % 3 != 0, now);
            let _ = layer.request(ActuatorId::Cool, step % 2 != 0, now);
            assert!(!(layer.get(ActuatorId::Heat) && layer.get(ActuatorId::Cool)));
        }
    }

    #[test]
    fn short_cycle_boundary() {
        let mut layer = layer();
        let now = MIN_OFF;
        assert_eq!(layer.request(ActuatorId::Cool, true, now), RequestOutcome::Applied);
        assert_eq!(layer.request(ActuatorId::Cool, false, now + 1_000), RequestOutcome::Applied);

        let off_at = now + 1_000;
        assert_eq!(
            layer.request(ActuatorId::Cool, true, off_at + MIN_OFF - 1),
            RequestOutcome::RejectedShortCycle
        );
        assert_eq!(
            layer.request(ActuatorId::Cool, true, off_at + MIN_OFF),
            RequestOutcome::Applied
        );
    }

    #[test]
    fn fan_is_short_cycle_exempt() {
        let mut layer = layer();
        assert_eq!(layer.request(ActuatorId::Fan, true, 10), RequestOutcome::Applied);
        assert_eq!(layer.request(ActuatorId::Fan, false, 20), RequestOutcome::Applied);
        assert_eq!(layer.request(ActuatorId::Fan, true, 30), RequestOutcome::Applied);
        assert_eq!(layer.request(ActuatorId::OvrFan, true, 40), RequestOutcome::Applied);
    }

    #[test]
    fn idempotent_request_makes_one_physical_write() {
        let driver = MockDriver::default();
        let writes = driver.writes.clone();
        let mut layer = SafetyLayer::new(driver, SafetyConfig::default(), 0);
        writes.borrow_mut().clear(); // drop the boot-time writes

        let now = MIN_OFF;
        assert_eq!(layer.request(ActuatorId::Fan, true, now), RequestOutcome::Applied);
        assert_eq!(layer.request(ActuatorId::Fan, true, now + 1), RequestOutcome::Applied);
        assert_eq!(writes.borrow().len(), 1);
    }

    #[test]
    fn failsafe_trips_once_and_clears_on_heartbeat() {
        let driver = MockDriver::default();
        let writes = driver.writes.clone();
        let mut layer = SafetyLayer::new(driver, SafetyConfig::default(), 0);

        let _ = layer.request(ActuatorId::Fan, true, 1_000);
        writes.borrow_mut().clear();

        // Heartbeat last seen at 1_000; trip just past the timeout.
        layer.tick(1_000 + TIMEOUT + 1);
        assert!(layer.failsafe_active());
        assert!(!layer.get(ActuatorId::Fan));
        let writes_after_trip = writes.borrow().len();
        assert_eq!(writes_after_trip, 1); // only the fan was on

        // Edge-triggered: further ticks do not re-drive the hardware.
        layer.tick(1_000 + TIMEOUT + 2_000);
        layer.tick(1_000 + TIMEOUT + 3_000);
        assert_eq!(writes.borrow().len(), writes_after_trip);
        assert!(layer.failsafe_active());

        // A fresh heartbeat clears the flag on the next tick.
        let resume = 1_000 + TIMEOUT + 4_000;
        layer.heartbeat(resume);
        layer.tick(resume + 500);
        assert!(!layer.failsafe_active());
        assert_eq!(layer.request(ActuatorId::Fan, true, resume + 600), RequestOutcome::Applied);
    }

    #[test]
    fn failsafe_does_not_trip_within_timeout() {
        let mut layer = layer();
        layer.heartbeat(5_000);
        layer.tick(5_000 + TIMEOUT);
        assert!(!layer.failsafe_active());
    }

    #[test]
    fn force_all_off_is_reentrant_safe() {
        let driver = MockDriver::default();
        let writes = driver.writes.clone();
        let mut layer = SafetyLayer::new(driver, SafetyConfig::default(), 0);

        let now = MIN_OFF;
        let _ = layer.request(ActuatorId::Heat, true, now);
        writes.borrow_mut().clear();

        layer.force_all_off(now + 1);
        layer.force_all_off(now + 1);
        // One write to drop the heat relay, none for the second call.
        assert_eq!(writes.borrow().len(), 1);
    }

    #[test]
    fn force_all_off_restarts_every_short_cycle_window() {
        let mut layer = layer();
        let now = MIN_OFF;
        layer.force_all_off(now);
        // Cool never ran, but its off-timestamp was refreshed.
        assert_eq!(
            layer.request(ActuatorId::Cool, true, now + MIN_OFF - 1),
            RequestOutcome::RejectedShortCycle
        );
    }

    #[test]
    fn rejection_refreshes_heartbeat() {
        let mut layer = layer();
        let now = MIN_OFF;
        let _ = layer.request(ActuatorId::Heat, true, now);
        // Rejected request well past the old heartbeat still counts as life.
        let later = now + TIMEOUT;
        assert_eq!(
            layer.request(ActuatorId::Cool, true, later),
            RequestOutcome::RejectedInterlock
        );
        layer.tick(later + TIMEOUT);
        assert!(!layer.failsafe_active());
    }
}
