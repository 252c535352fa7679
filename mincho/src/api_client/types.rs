//! Pool API data transfer objects.
//!
//! Field names follow the pool's camelCase JSON. Fields we do not know
//! about are ignored so new API fields never break decoding.

use serde::Deserialize;

/// Envelope returned by `GET /miner/<account>/currentStats`.
#[derive(Clone, Debug, Deserialize)]
pub struct CurrentStats {
    /// `"OK"` on success.
    pub status: String,
    /// Absent or null when the pool reports an error.
    #[serde(default)]
    pub data: Option<ApiStats>,
}

/// Account statistics for one pool account.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiStats {
    pub active_workers: u32,
    /// Unix timestamp of the last share seen from any worker.
    pub last_seen: i64,
    pub usd_per_min: f64,
    /// Hashrate in hashes per second, averaged over the pool's window.
    pub average_hashrate: f64,
    /// Hashrate in hashes per second, recent estimate.
    pub current_hashrate: f64,
    #[serde(default)]
    pub pool: String,

    pub reported_hashrate: Option<f64>,
    pub valid_shares: Option<u64>,
    pub invalid_shares: Option<u64>,
    pub stale_shares: Option<u64>,
    /// Unpaid balance in the coin's smallest unit.
    pub unpaid: Option<f64>,
    pub coins_per_min: Option<f64>,
    pub btc_per_min: Option<f64>,
    /// Unix timestamp the statistics were computed at.
    pub time: Option<i64>,
}

const HASHES_PER_MEGAHASH: f64 = 1_000_000.0;

impl ApiStats {
    /// Current hashrate in MH/s.
    pub fn current_mhs(&self) -> f64 {
        self.current_hashrate / HASHES_PER_MEGAHASH
    }

    /// Average hashrate in MH/s.
    pub fn average_mhs(&self) -> f64 {
        self.average_hashrate / HASHES_PER_MEGAHASH
    }
}
