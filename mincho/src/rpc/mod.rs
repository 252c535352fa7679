//! Client for the miner daemon's JSON-RPC socket.

mod backoff;
mod client;
mod connector;
mod types;

pub use backoff::LinearBackoff;
pub use client::{RpcClient, RpcEvent, RpcHandle, call_once};
pub use connector::{Connector, TcpConnector};
pub use types::{Command, Method, Reply, Request, Response, Status, StatusResult};
