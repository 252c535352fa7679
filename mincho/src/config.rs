//! Runtime configuration, resolved once at startup from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Local miner RPC endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// `host:port` of the miner's JSON-RPC socket.
    pub addr: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3326".to_string(),
        }
    }
}

/// Pool REST API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL; the stats path is appended as
    /// `/miner/<account>/currentStats`.
    pub base_url: String,

    /// Pool account identifier (wallet address). Stats polling is disabled
    /// without one.
    pub account: Option<String>,

    /// Per-request timeout covering connect, headers and body.
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ethermine.org".to_string(),
            account: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub rpc: RpcConfig,
    pub api: ApiConfig,

    /// How often a STATUS command is queued while connected.
    pub status_interval: Duration,

    /// How often pool stats are requested.
    pub stats_interval: Duration,

    /// Symlink naming the miner's active preset file, if any.
    pub preset_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            api: ApiConfig::default(),
            status_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(300),
            preset_path: None,
        }
    }
}

impl Config {
    /// Build the configuration from `MINCHO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Unset and
    /// empty values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Config::default();

        Ok(Self {
            rpc: RpcConfig {
                addr: get("MINCHO_RPC_ADDR").unwrap_or(defaults.rpc.addr),
            },
            api: ApiConfig {
                base_url: get("MINCHO_API_URL").unwrap_or(defaults.api.base_url),
                account: get("MINCHO_ACCOUNT").map(|a| a.trim().to_string()),
                timeout: seconds(&get, "MINCHO_API_TIMEOUT_SECS", defaults.api.timeout)?,
            },
            status_interval: seconds(
                &get,
                "MINCHO_STATUS_INTERVAL_SECS",
                defaults.status_interval,
            )?,
            stats_interval: seconds(&get, "MINCHO_STATS_INTERVAL_SECS", defaults.stats_interval)?,
            preset_path: get("MINCHO_PRESET_PATH").map(PathBuf::from),
        })
    }
}

/// Parse a positive whole number of seconds.
fn seconds<F>(get: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => Err(Error::Config(format!("{key} must be greater than zero"))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(Error::Config(format!("{key}={raw:?}: {e}"))),
    }
}
