//! Periodic work: asks the miner for its status and the pool for account
//! stats on a fixed cadence.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::api_client::{StatsHandle, StatsRequest};
use crate::config::Config;
use crate::rpc::{Command, Method, RpcHandle};
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// STATUS cadence; only queued while the miner session is up.
    pub status: Duration,
    /// Pool stats cadence.
    pub stats: Duration,
}

impl From<&Config> for Intervals {
    fn from(config: &Config) -> Self {
        Self {
            status: config.status_interval,
            stats: config.stats_interval,
        }
    }
}

/// Queue periodic requests until `running` is cancelled or a client goes
/// away. Both timers fire immediately on start.
pub async fn task(
    rpc: RpcHandle,
    stats: Option<StatsHandle>,
    intervals: Intervals,
    running: CancellationToken,
) {
    trace!("Scheduler task started.");

    let mut status_tick = interval(intervals.status);
    status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats_tick = interval(intervals.stats);
    stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                if !rpc.is_connected() {
                    trace!("Miner not connected, skipping status");
                    continue;
                }
                if rpc.enqueue(Command::new(Method::Status)).is_err() {
                    warn!("RPC client gone, scheduler stopping");
                    break;
                }
            }

            _ = stats_tick.tick(), if stats.is_some() => {
                if let Some(stats) = &stats {
                    if stats.enqueue(StatsRequest::Stats).is_err() {
                        warn!("Stats poller gone, scheduler stopping");
                        break;
                    }
                }
            }

            _ = running.cancelled() => {
                debug!("Scheduler shutdown requested");
                break;
            }
        }
    }

    trace!("Scheduler task stopped.");
}
