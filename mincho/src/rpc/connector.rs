//! How the RPC client obtains a byte stream to the miner.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Source of fresh connections for the RPC client.
///
/// The client calls [`connect`](Connector::connect) whenever it has no
/// session; each call must produce an independent stream.
#[async_trait]
pub trait Connector: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&mut self) -> io::Result<Self::Stream>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// Plain TCP connection to the miner's RPC port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&mut self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}
