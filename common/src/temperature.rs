use crate::config::ControlConfig;

/// Plausible ambient range; readings outside are sensor faults, not weather.
const MIN_PLAUSIBLE_F: f32 = -50.0;
const MAX_PLAUSIBLE_F: f32 = 150.0;

#[derive(Debug, Clone, Copy)]
struct Sample {
    temp_f: f32,
    at_ms: u64,
}

/// Freshness-aware cache of the local sensor and the remote override source.
///
/// The engine never reads hardware; readings are pushed here by whatever
/// transport delivers them. A numerically valid reading past its max age is
/// treated exactly like no reading at all — a stalled sensor reporting a
/// stale number is as dangerous as a dead one.
#[derive(Debug, Default)]
pub struct TemperatureFeed {
    local: Option<Sample>,
    remote: Option<Sample>,
}

impl TemperatureFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a local sensor poll result. `None` invalidates the cache.
    pub fn update_local(&mut self, temp_f: Option<f32>, now_ms: u64) {
        self.local = temp_f
            .filter(|t| Self::plausible(*t))
            .map(|temp_f| Sample { temp_f, at_ms: now_ms });
        if temp_f.is_some() && self.local.is_none() {
            tracing::warn!("discarding implausible local reading: {temp_f:?}");
        }
    }

    /// Cache a remote override reading.
    pub fn update_remote(&mut self, temp_f: f32, now_ms: u64) {
        if !Self::plausible(temp_f) {
            tracing::warn!("discarding implausible remote reading: {temp_f}");
            return;
        }
        self.remote = Some(Sample { temp_f, at_ms: now_ms });
    }

    /// The temperature the engine should act on: fresh remote first, then
    /// fresh local, else `None`.
    pub fn effective(&self, config: &ControlConfig, now_ms: u64) -> Option<f32> {
        if let Some(remote) = self.fresh_remote(config, now_ms) {
            return Some(remote);
        }
        self.local
            .filter(|s| now_ms.saturating_sub(s.at_ms) < config.sensor_stale_timeout_ms)
            .map(|s| s.temp_f)
    }

    pub fn using_remote(&self, config: &ControlConfig, now_ms: u64) -> bool {
        self.fresh_remote(config, now_ms).is_some()
    }

    fn fresh_remote(&self, config: &ControlConfig, now_ms: u64) -> Option<f32> {
        self.remote
            .filter(|s| now_ms.saturating_sub(s.at_ms) < config.remote_timeout_ms)
            .map(|s| s.temp_f)
    }

    fn plausible(temp_f: f32) -> bool {
        temp_f.is_finite() && (MIN_PLAUSIBLE_F..=MAX_PLAUSIBLE_F).contains(&temp_f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> ControlConfig {
        ControlConfig::default()
    }

    #[test]
    fn remote_preferred_while_fresh() {
        let mut feed = TemperatureFeed::new();
        feed.update_local(Some(70.0), 1_000);
        feed.update_remote(65.0, 1_000);

        assert_eq!(feed.effective(&config(), 2_000), Some(65.0));
        assert!(feed.using_remote(&config(), 2_000));
    }

    #[test]
    fn stale_remote_falls_back_to_local() {
        let mut feed = TemperatureFeed::new();
        feed.update_remote(65.0, 0);
        feed.update_local(Some(70.0), 299_000);

        let now = 300_001;
        assert_eq!(feed.effective(&config(), now), Some(70.0));
        assert!(!feed.using_remote(&config(), now));
    }

    #[test]
    fn stale_local_is_treated_as_absent() {
        let mut feed = TemperatureFeed::new();
        feed.update_local(Some(70.0), 0);

        assert_eq!(feed.effective(&config(), 299_999), Some(70.0));
        assert_eq!(feed.effective(&config(), 300_000), None);
    }

    #[test]
    fn implausible_readings_are_discarded() {
        let mut feed = TemperatureFeed::new();
        feed.update_local(Some(f32::NAN), 1_000);
        assert_eq!(feed.effective(&config(), 1_000), None);

        feed.update_remote(-196.0, 1_000);
        assert_eq!(feed.effective(&config(), 1_000), None);
    }

    #[test]
    fn none_invalidates_local_cache() {
        let mut feed = TemperatureFeed::new();
        feed.update_local(Some(70.0), 1_000);
        feed.update_local(None, 2_000);
        assert_eq!(feed.effective(&config(), 2_000), None);
    }
}
