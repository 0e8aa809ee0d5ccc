//! Snapshot of the network-wide on-chain tunables.
//!
//! Settings are string-keyed u64 values read from the registry contract.
//! The chain monitor swaps a fresh snapshot in whenever a configuration
//! event lands; request-path readers only ever load the current snapshot.

use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const STREAM_REPLICATION_FACTOR: &str = "stream.replication.factor";
pub const STREAM_MEDIA_MAX_CHUNK_COUNT: &str = "stream.media.maxChunkCount";
pub const STREAM_MEMBERSHIP_LIMIT_GDM: &str = "stream.membership.limits.gdm";

pub const DEFAULT_REPLICATION_FACTOR: u64 = 3;
pub const DEFAULT_MEDIA_MAX_CHUNK_COUNT: u64 = 50;
pub const DEFAULT_MEMBERSHIP_LIMIT_GDM: u64 = 48;

/// One immutable configuration snapshot.
#[derive(Clone, Debug, Default)]
pub struct OnChainSettings {
    values: BTreeMap<String, u64>,
}

impl OnChainSettings {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self { values: pairs.into_iter().collect() }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.values.get(key).copied().unwrap_or(default)
    }

    pub fn replication_factor(&self) -> usize {
        self.get_u64(STREAM_REPLICATION_FACTOR, DEFAULT_REPLICATION_FACTOR) as usize
    }

    pub fn media_max_chunk_count(&self) -> u64 {
        self.get_u64(STREAM_MEDIA_MAX_CHUNK_COUNT, DEFAULT_MEDIA_MAX_CHUNK_COUNT)
    }

    pub fn gdm_membership_limit(&self) -> usize {
        self.get_u64(STREAM_MEMBERSHIP_LIMIT_GDM, DEFAULT_MEMBERSHIP_LIMIT_GDM) as usize
    }
}

/// Read-mostly holder for the current settings snapshot.
pub struct OnChainConfig {
    current: ArcSwap<OnChainSettings>,
}

impl OnChainConfig {
    pub fn new(initial: OnChainSettings) -> Self {
        Self { current: ArcSwap::from_pointee(initial) }
    }

    /// The current snapshot. Values read from a single snapshot are
    /// mutually consistent.
    pub fn get(&self) -> Arc<OnChainSettings> {
        self.current.load_full()
    }

    /// Chain-monitor callback: swap in a new snapshot.
    pub fn apply(&self, settings: OnChainSettings) {
        log::info!("On-chain configuration updated. entries={}", settings.values.len());
        self.current.store(Arc::new(settings));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let config = OnChainConfig::new(OnChainSettings::default());
        assert_eq!(config.get().replication_factor(), DEFAULT_REPLICATION_FACTOR as usize);

        config.apply(OnChainSettings::from_pairs([(
            STREAM_REPLICATION_FACTOR.to_string(),
            5u64,
        )]));
        assert_eq!(config.get().replication_factor(), 5);
        assert_eq!(config.get().media_max_chunk_count(), DEFAULT_MEDIA_MAX_CHUNK_COUNT);
    }

    #[test]
    fn snapshot_is_stable_across_swap() {
        let config = OnChainConfig::new(OnChainSettings::from_pairs([(
            STREAM_REPLICATION_FACTOR.to_string(),
            3u64,
        )]));
        let before = config.get();
        config.apply(OnChainSettings::from_pairs([(
            STREAM_REPLICATION_FACTOR.to_string(),
            7u64,
        )]));
        assert_eq!(before.replication_factor(), 3);
        assert_eq!(config.get().replication_factor(), 7);
    }
}
