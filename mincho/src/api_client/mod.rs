//! Pool REST API client and the stats polling loop.
//!
//! The poller has no connection state of its own: every queued request is
//! one independent HTTP GET. Failures are reported as
//! [`StatsEvent::Unavailable`] and the loop carries on.

pub mod types;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub use types::{ApiStats, CurrentStats};

const USER_AGENT: &str = concat!("mincho/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the pool API.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client against another base URL with default settings.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Self::new(&ApiConfig {
            base_url: base_url.into(),
            ..ApiConfig::default()
        })
    }

    pub fn stats_url(&self, account: &str) -> String {
        format!("{}/miner/{}/currentStats", self.base_url, account)
    }

    /// Fetch the current statistics for `account`.
    pub async fn current_stats(&self, account: &str) -> Result<ApiStats> {
        let url = self.stats_url(account);
        debug!(%url, "Fetching pool stats");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Remote(format!("{url} returned {status}")));
        }

        let stats: CurrentStats = response.json().await.map_err(|e| {
            if e.is_decode() {
                Error::Remote(format!("malformed stats body: {e}"))
            } else {
                Error::Http(e)
            }
        })?;

        if stats.status != "OK" {
            return Err(Error::Remote(format!("pool status {:?}", stats.status)));
        }
        stats
            .data
            .ok_or_else(|| Error::Remote("stats response has no data".to_string()))
    }
}

/// Requests accepted by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsRequest {
    Stats,
}

/// Events from the poller to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEvent {
    Updated(ApiStats),
    /// The poll failed; previously displayed values are now stale.
    Unavailable(String),
}

/// Cloneable handle for queueing poll requests.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    request_tx: mpsc::UnboundedSender<StatsRequest>,
}

impl StatsHandle {
    pub(crate) fn new(request_tx: mpsc::UnboundedSender<StatsRequest>) -> Self {
        Self { request_tx }
    }

    pub fn enqueue(&self, request: StatsRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| Error::ChannelClosed)
    }
}

/// The stats polling loop. One request at a time, in queue order.
pub struct StatsPoller {
    client: Client,
    account: String,
    request_rx: mpsc::UnboundedReceiver<StatsRequest>,
    event_tx: mpsc::Sender<StatsEvent>,
    shutdown: CancellationToken,
}

impl StatsPoller {
    pub fn new(
        client: Client,
        account: impl Into<String>,
        event_tx: mpsc::Sender<StatsEvent>,
        shutdown: CancellationToken,
    ) -> (Self, StatsHandle) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let poller = Self {
            client,
            account: account.into(),
            request_rx,
            event_tx,
            shutdown,
        };
        (poller, StatsHandle::new(request_tx))
    }

    /// Run until cancelled, every handle is dropped, or the event receiver
    /// goes away.
    pub async fn run(mut self) {
        info!(account = %self.account, "Stats poller started");
        let shutdown = self.shutdown.clone();

        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.request_rx.recv() => request,
            };
            let Some(StatsRequest::Stats) = request else {
                break;
            };

            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.poll() => event,
            };
            if self.event_tx.send(event).await.is_err() {
                debug!("Event receiver dropped");
                break;
            }
        }

        info!("Stats poller stopped");
    }

    async fn poll(&self) -> StatsEvent {
        match self.client.current_stats(&self.account).await {
            Ok(stats) => {
                debug!(
                    workers = stats.active_workers,
                    average_mhs = stats.average_mhs(),
                    "Pool stats updated"
                );
                StatsEvent::Updated(stats)
            }
            Err(e) => {
                warn!(error = %e, "Pool stats unavailable");
                StatsEvent::Unavailable(e.to_string())
            }
        }
    }
}

/// Fetch stats once, outside the polling loop.
pub async fn fetch_once(config: &ApiConfig, account: &str) -> Result<ApiStats> {
    Client::new(config)?.current_stats(account).await
}
