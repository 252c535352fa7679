//! Error types shared by the client loops.

use std::io;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::rpc::Method;

/// Everything that can go wrong talking to the miner or the pool API.
///
/// None of these are fatal to the process: connection errors are retried
/// by the RPC client, everything else is logged and the single request is
/// dropped.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket connect, read or write failed.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// The miner closed the socket before replying.
    #[error("connection closed by peer")]
    Closed,

    /// A reply line was not valid JSON or had the wrong shape.
    #[error("failed to decode {method} reply: {source}")]
    Decode {
        method: Method,
        #[source]
        source: serde_json::Error,
    },

    /// A request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// The pool API answered, but not with usable statistics.
    #[error("pool API error: {0}")]
    Remote(String),

    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The other end of a queue or event channel was dropped.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<LinesCodecError> for Error {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => Error::Connection(e),
            LinesCodecError::MaxLineLengthExceeded => Error::Connection(io::Error::new(
                io::ErrorKind::InvalidData,
                "reply line exceeds maximum length",
            )),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
