//! Status-bar state: the title aggregate, the connection icon and the
//! texts of the stat menu items.
//!
//! Nothing here draws anything. [`Presenter`] folds client events into
//! plain state that a GUI shell (or the log output of `minchod`) renders.

use std::fmt;
use std::fs;
use std::path::Path;

use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::api_client::{ApiStats, StatsEvent};
use crate::rpc::{RpcEvent, Status};
use crate::tracing::prelude::*;

/// Divisor turning the daemon's summed `hashrate` into the MH/s figure
/// shown in the title.
const LOCAL_HASHRATE_SCALE: f64 = 100_000.0;

/// Miner configuration presets, named after the files the preset symlink
/// can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Preset {
    Default,
    CpuPlus,
    Max,
}

impl Preset {
    /// Read the active preset from the symlink at `path`.
    ///
    /// `None` when the link is missing or points at an unknown file.
    pub fn active(path: &Path) -> Option<Preset> {
        let target = fs::canonicalize(path).ok()?;
        target.file_name()?.to_str()?.parse().ok()
    }

    /// Short code shown at the start of the title.
    pub fn code(self) -> &'static str {
        match self {
            Preset::Default => "DEF",
            Preset::CpuPlus => "CPU+",
            Preset::Max => "MAX",
        }
    }
}

/// Values summarized in the menu-bar title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarStats {
    /// Local hashrate from the miner, MH/s.
    pub local_hr: Option<f64>,
    /// Average hashrate seen by the pool, MH/s.
    pub remote_hr: Option<f64>,
    pub threads: Option<u32>,
    pub preset: Option<Preset>,
}

impl BarStats {
    pub fn apply_status(&mut self, status: &Status) {
        if status.results().is_empty() {
            self.local_hr = None;
            self.threads = None;
        } else {
            self.local_hr = Some(status.total_hashrate() as f64 / LOCAL_HASHRATE_SCALE);
            self.threads = Some(status.total_threads());
        }
    }

    pub fn apply_api_stats(&mut self, stats: &ApiStats) {
        self.remote_hr = Some(stats.average_mhs());
    }

    /// Title text: preset code, local and remote hashrate, skipping any
    /// part that is unknown or zero.
    pub fn title(&self) -> String {
        let preset = self.preset.map(|p| p.code().to_string());
        let local = nonzero(self.local_hr).map(|hr| format!("{hr:.2}MH/s"));
        let remote = nonzero(self.remote_hr).map(|hr| format!("{hr:.2}MH/s"));

        [preset, local, remote]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

fn nonzero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Icon {
    On,
    Off,
}

/// Texts of the informational menu items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatItems {
    pub active_workers: String,
    pub last_seen: String,
    pub usd_per_minute: String,
    pub current_hashrate: String,
    pub threads: String,
}

impl Default for StatItems {
    fn default() -> Self {
        Self {
            active_workers: "-".to_string(),
            last_seen: "-".to_string(),
            usd_per_minute: "-".to_string(),
            current_hashrate: "-".to_string(),
            threads: "-".to_string(),
        }
    }
}

/// Folds client events into status-bar state.
#[derive(Debug, Default)]
pub struct Presenter {
    stats: BarStats,
    items: StatItems,
    icon: Option<Icon>,
    title: String,
    /// Whether the last pool poll failed, so the pool values are stale.
    stats_stale: bool,
}

impl Presenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &BarStats {
        &self.stats
    }

    pub fn items(&self) -> &StatItems {
        &self.items
    }

    pub fn icon(&self) -> Option<Icon> {
        self.icon
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn stats_stale(&self) -> bool {
        self.stats_stale
    }

    pub fn set_preset(&mut self, preset: Option<Preset>) {
        self.stats.preset = preset;
    }

    /// Apply an RPC client event. Returns whether anything visible changed.
    pub fn on_rpc_event(&mut self, event: &RpcEvent) -> bool {
        match event {
            RpcEvent::Reply { reply, .. } => match reply.as_status() {
                Some(status) => self.on_status(status),
                None => false,
            },
            RpcEvent::StatusIcon(connected) => self.set_icon(*connected),
            RpcEvent::Reconnecting { attempt, .. } => {
                self.replace_title(format!("Connecting ({attempt})"))
            }
            RpcEvent::DecodeFailed { .. } => false,
        }
    }

    /// Apply a stats poller event, using `now` for relative times.
    pub fn on_stats_event(&mut self, event: &StatsEvent, now: OffsetDateTime) -> bool {
        match event {
            StatsEvent::Updated(stats) => {
                self.stats_stale = false;
                self.stats.apply_api_stats(stats);
                self.items.active_workers = format!("Workers: {}", stats.active_workers);
                self.items.last_seen = relative_time(stats.last_seen, now);
                self.items.usd_per_minute = money(stats.usd_per_min);
                self.items.current_hashrate = hashrate(stats.current_hashrate);
                true
            }
            StatsEvent::Unavailable(_) => {
                let changed = !self.stats_stale;
                self.stats_stale = true;
                changed
            }
        }
    }

    fn on_status(&mut self, status: &Status) -> bool {
        let icon_changed = self.set_icon(status.upstream_connected());
        self.stats.apply_status(status);
        self.items.threads = match self.stats.threads {
            Some(threads) => format!("Threads: {threads}"),
            None => "-".to_string(),
        };
        let title = self.stats.title();
        self.replace_title(title) | icon_changed
    }

    /// The icon only flips on an actual change.
    fn set_icon(&mut self, connected: bool) -> bool {
        let icon = if connected { Icon::On } else { Icon::Off };
        if self.icon == Some(icon) {
            return false;
        }
        debug!(?icon, "Status icon changed");
        self.icon = Some(icon);
        true
    }

    fn replace_title(&mut self, title: String) -> bool {
        if self.title == title {
            return false;
        }
        self.title = title;
        true
    }
}

impl fmt::Display for Presenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.icon {
            Some(Icon::On) => "on",
            Some(Icon::Off) => "off",
            None => "-",
        };
        write!(f, "[{icon}] {}", self.title)
    }
}

/// `"510.000 MH/s"` from hashes per second.
pub fn hashrate(hashes_per_sec: f64) -> String {
    format!("{:.3} MH/s", hashes_per_sec / 1_000_000.0)
}

/// `"0.00310$"`.
pub fn money(value: f64) -> String {
    format!("{value:.5}$")
}

/// Humanized distance between a unix timestamp and `now`, e.g.
/// `"5 minutes ago"` or `"in an hour"`.
pub fn relative_time(timestamp: i64, now: OffsetDateTime) -> String {
    let Ok(then) = OffsetDateTime::from_unix_timestamp(timestamp) else {
        return "-".to_string();
    };

    let delta = now - then;
    let seconds = delta.whole_seconds().unsigned_abs();
    let amount = match seconds {
        0..=9 => return "just now".to_string(),
        10..=44 => "seconds".to_string(),
        45..=89 => "a minute".to_string(),
        90..=2_699 => format!("{} minutes", (seconds + 30) / 60),
        2_700..=5_399 => "an hour".to_string(),
        5_400..=79_199 => format!("{} hours", (seconds + 1_800) / 3_600),
        79_200..=129_599 => "a day".to_string(),
        _ => format!("{} days", (seconds + 43_200) / 86_400),
    };

    if delta.is_negative() {
        format!("in {amount}")
    } else {
        format!("{amount} ago")
    }
}
