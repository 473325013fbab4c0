use serde::{Deserialize, Serialize};

/// Premium tier limits reported to clients. Only `limit_of_devices` is
/// enforced by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PremiumLimits {
    pub limit_of_devices: usize,
    pub pnl_events_limit: u64,
    pub max_backup_size_mb: u64,
    pub history_events_limit: u64,
    pub reports_lookup_limit: u64,
    /// Roughly 1000 validators.
    pub eth_staked_limit: u64,
}

impl Default for PremiumLimits {
    fn default() -> Self {
        Self {
            limit_of_devices: 10,
            pnl_events_limit: 1_000_000,
            max_backup_size_mb: 500,
            history_events_limit: 1_000_000,
            reports_lookup_limit: 1000,
            eth_staked_limit: 32_000,
        }
    }
}

impl PremiumLimits {
    /// Largest backup payload accepted, in bytes.
    pub fn max_backup_bytes(&self) -> usize {
        usize::try_from(self.max_backup_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PremiumCapabilities {
    pub eth_staking_view: bool,
    pub graphs_view: bool,
    pub event_analysis_view: bool,
}

impl Default for PremiumCapabilities {
    fn default() -> Self {
        Self {
            eth_staking_view: true,
            graphs_view: true,
            event_analysis_view: true,
        }
    }
}
