//! Sync configuration.

use crate::keys::Purpose;

/// Currency level settings shared by every wallet of a given asset.
#[derive(Debug, Clone)]
pub struct CurrencyInfo {
    /// Ticker reported in balance change events.
    pub currency_code: String,
    /// Number of consecutive unused addresses kept beyond the highest used one.
    ///
    /// Also bounds the number of addresses reconciled concurrently during a scan.
    pub gap_limit: u32,
}

impl Default for CurrencyInfo {
    fn default() -> Self {
        Self {
            currency_code: "BTC".to_string(),
            gap_limit: 10,
        }
    }
}

/// Sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Network the wallet's addresses are encoded for.
    pub network: bitcoin::Network,
    /// Currency level settings.
    pub currency: CurrencyInfo,
    /// Derivation purpose declared by the wallet descriptor.
    ///
    /// Determines the set of address formats synchronized, see [`Purpose::formats`].
    pub purpose: Purpose,
}

impl SyncConfig {
    /// Constructs a mainnet config for the given purpose with default currency settings.
    #[must_use]
    pub fn mainnet(purpose: Purpose) -> Self {
        Self {
            network: bitcoin::Network::Bitcoin,
            currency: CurrencyInfo::default(),
            purpose,
        }
    }

    /// Overrides the gap limit.
    #[must_use]
    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.currency.gap_limit = gap_limit;
        self
    }
}
