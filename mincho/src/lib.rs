//! Mincho keeps a menu-bar view of a local miner daemon and its pool account.
//!
//! Two long-lived client loops do the work: [`rpc::RpcClient`] talks
//! line-delimited JSON-RPC to the miner over TCP and reconnects with a
//! linear backoff, while [`api_client::StatsPoller`] fetches account
//! statistics from the pool's REST API on demand. Both take commands through
//! an unbounded queue and report back through event channels, which the
//! [`bar::Presenter`] folds into the title, icon and menu texts.

pub mod api_client;
pub mod bar;
pub mod config;
pub mod error;
pub mod rpc;
pub mod scheduler;
pub mod tracing;
