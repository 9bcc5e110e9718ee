use std::time::Duration;

use atlas_manifest::{AtlasError, AtlasResult};
use uuid::Uuid;

/// Default handoff delay the distilled spec documents: the agreed transfer
/// instant is `now + this`.
pub const DEFAULT_HANDOFF_DELAY_MS: u64 = 60;
pub const DEFAULT_TICK_HZ: u32 = 20;
pub const DEFAULT_HOLDER_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Shard process configuration, loaded once at startup from the environment
/// variables named in the wire/config section of the design notes.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub shard_id: Uuid,
    pub store_url: Option<String>,
    pub handoff_delay_us: u64,
    pub tick_hz: u32,
    pub holder_ttl: Duration,
    pub telemetry_interval: Duration,
}

impl ShardConfig {
    fn defaulted(shard_id: Uuid) -> Self {
        Self {
            shard_id,
            store_url: None,
            handoff_delay_us: DEFAULT_HANDOFF_DELAY_MS * 1_000,
            tick_hz: DEFAULT_TICK_HZ,
            holder_ttl: DEFAULT_HOLDER_TTL,
            telemetry_interval: DEFAULT_TELEMETRY_INTERVAL,
        }
    }

    /// Reads `ATLASNET_SHARD_ID`, `ATLASNET_STORE_URL`, `ATLASNET_HANDOFF_DELAY_MS`,
    /// and `ATLASNET_TICK_HZ`. `ATLASNET_SHARD_ID` has no documented default
    /// (unlike the other three): unset or malformed, it's rejected outright,
    /// since a wrong or missing shard identity silently corrupts ownership
    /// bookkeeping rather than failing loudly. The rest fall back to their
    /// documented defaults when unset or unparsable.
    pub fn from_env() -> AtlasResult<Self> {
        let raw_shard_id = std::env::var("ATLASNET_SHARD_ID").map_err(|_| AtlasError::MissingShardIdentity)?;
        let shard_id = Uuid::parse_str(&raw_shard_id).map_err(|_| AtlasError::MissingShardIdentity)?;
        let mut config = Self::defaulted(shard_id);

        if let Ok(url) = std::env::var("ATLASNET_STORE_URL") {
            config.store_url = Some(url);
        }
        if let Ok(raw) = std::env::var("ATLASNET_HANDOFF_DELAY_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.handoff_delay_us = ms * 1_000,
                Err(_) => log::warn!("ATLASNET_HANDOFF_DELAY_MS={raw:?} is not a valid integer, keeping default"),
            }
        }
        if let Ok(raw) = std::env::var("ATLASNET_TICK_HZ") {
            match raw.parse::<u32>() {
                Ok(hz) if hz > 0 => config.tick_hz = hz,
                _ => log::warn!("ATLASNET_TICK_HZ={raw:?} is not a positive integer, keeping default"),
            }
        }

        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaulted_matches_documented_constants() {
        let config = ShardConfig::defaulted(Uuid::new_v4());
        assert_eq!(config.handoff_delay_us, 60_000);
        assert_eq!(config.tick_hz, 20);
        assert_eq!(config.holder_ttl, Duration::from_secs(30));
        assert_eq!(config.telemetry_interval, Duration::from_millis(250));
    }

    #[test]
    fn tick_interval_derives_from_tick_hz() {
        let config = ShardConfig { tick_hz: 10, ..ShardConfig::defaulted(Uuid::new_v4()) };
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }
}
