//! Headless status-bar daemon.
//!
//! Runs the miner RPC client, the pool stats poller and the scheduler, and
//! logs every visible change of the status bar.

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use mincho::api_client::{self, StatsPoller};
use mincho::bar::{Preset, Presenter};
use mincho::config::Config;
use mincho::rpc::RpcClient;
use mincho::scheduler::{self, Intervals};
use mincho::tracing::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    mincho::tracing::init();

    let config = Config::from_env().context("invalid configuration")?;
    let running = CancellationToken::new();
    let tracker = TaskTracker::new();

    let (rpc_event_tx, mut rpc_events) = mpsc::channel(100);
    let (rpc, rpc_handle) = RpcClient::new(&config.rpc, rpc_event_tx, running.clone());
    tracker.spawn(rpc.run());

    let (stats_event_tx, mut stats_events) = mpsc::channel(16);
    let stats_handle = match config.api.account.clone() {
        Some(account) => {
            let client = api_client::Client::new(&config.api)?;
            let (poller, handle) =
                StatsPoller::new(client, account, stats_event_tx, running.clone());
            tracker.spawn(poller.run());
            Some(handle)
        }
        None => {
            warn!("MINCHO_ACCOUNT not set, pool stats disabled");
            drop(stats_event_tx);
            None
        }
    };
    let stats_enabled = stats_handle.is_some();

    tracker.spawn(scheduler::task(
        rpc_handle,
        stats_handle,
        Intervals::from(&config),
        running.clone(),
    ));
    tracker.close();

    let mut presenter = Presenter::new();

    loop {
        if let Some(path) = &config.preset_path {
            presenter.set_preset(Preset::active(path));
        }

        let changed = tokio::select! {
            Some(event) = rpc_events.recv() => presenter.on_rpc_event(&event),
            Some(event) = stats_events.recv(), if stats_enabled => {
                presenter.on_stats_event(&event, OffsetDateTime::now_utc())
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            else => break,
        };

        if changed {
            info!(bar = %presenter, "Status bar updated");
            debug!(items = ?presenter.items(), stale = presenter.stats_stale());
        }
    }

    running.cancel();
    tracker.wait().await;
    Ok(())
}
