//! Wire types for the miner's line-delimited JSON-RPC protocol.
//!
//! Every request is one JSON object followed by `\n`; every reply is one
//! JSON object on its own line. The reply shape depends on the method, so
//! decoding is routed through [`Method::decode`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{Error, Result};

/// RPC methods understood by the miner daemon.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Method {
    Status,
    Hello,
    Exit,
    Shutdown,
    Connect,
    Hashrate,
    Start,
    Stop,
    Threads,
    Hashes,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Decode a reply line into the shape this method produces.
    pub fn decode(self, line: &str) -> Result<Reply> {
        let reply = match self {
            Method::Status => from_object(line).map(Reply::Status),
            Method::Hello
            | Method::Exit
            | Method::Shutdown
            | Method::Connect
            | Method::Hashrate
            | Method::Start
            | Method::Stop
            | Method::Threads
            | Method::Hashes => from_object(line).map(Reply::Ack),
        };
        reply.map_err(|source| Error::Decode {
            method: self,
            source,
        })
    }
}

/// A queued outbound request. Consumed exactly once by the RPC client.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub method: Method,
    pub params: Option<Vec<Value>>,
}

impl Command {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            params: None,
        }
    }

    pub fn with_params(method: Method, params: Vec<Value>) -> Self {
        Self {
            method,
            params: Some(params),
        }
    }

    /// Wire form of this command under the given request id.
    pub fn to_request(&self, id: u64) -> Request<'_> {
        Request {
            jsonrpc: "2.0",
            method: self.method,
            params: self.params.as_deref(),
            id,
        }
    }
}

/// JSON-RPC 2.0 request object as written to the socket.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    jsonrpc: &'static str,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a [Value]>,
    pub id: u64,
}

impl Request<'_> {
    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }
}

/// Fields common to every reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
}

/// Reply to [`Method::Status`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Status {
    #[serde(flatten)]
    pub response: Response,
    #[serde(default)]
    pub result: Option<Vec<StatusResult>>,
}

impl Status {
    /// Reported worker groups; empty when the daemon sent no result.
    pub fn results(&self) -> &[StatusResult] {
        self.result.as_deref().unwrap_or_default()
    }

    /// Sum of the reported hashrates, in the daemon's units.
    pub fn total_hashrate(&self) -> u64 {
        self.results().iter().map(|r| r.hashrate).sum()
    }

    pub fn total_threads(&self) -> u32 {
        self.results().iter().map(|r| r.threads_current).sum()
    }

    /// Whether the first worker group has a live upstream pool.
    pub fn upstream_connected(&self) -> bool {
        self.results().first().is_some_and(StatusResult::connected)
    }
}

/// One worker group's statistics as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusResult {
    pub devfee_connected: bool,
    pub hashes: u64,
    pub hashrate: u64,
    pub mode: String,
    pub threads_current: u32,
    #[serde(default)]
    pub upstream_connected: Option<BTreeMap<String, bool>>,
}

impl StatusResult {
    /// True iff any upstream reports connected.
    pub fn connected(&self) -> bool {
        self.upstream_connected
            .as_ref()
            .is_some_and(|upstreams| upstreams.values().any(|&up| up))
    }
}

/// A decoded reply, tagged by the shape it was decoded into.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Status(Status),
    Ack(Response),
}

impl Response {
    /// Whether this reply may belong to request `id`. Replies that carry no
    /// id are accepted.
    pub fn answers(&self, id: u64) -> bool {
        self.id.as_deref().is_none_or(|reply_id| reply_id == id.to_string())
    }
}

impl Reply {
    pub fn response(&self) -> &Response {
        match self {
            Reply::Status(status) => &status.response,
            Reply::Ack(response) => response,
        }
    }

    pub fn as_status(&self) -> Option<&Status> {
        match self {
            Reply::Status(status) => Some(status),
            Reply::Ack(_) => None,
        }
    }
}

/// Parse a reply line that must be a JSON object. Arrays would otherwise be
/// read positionally into the reply's fields.
fn from_object<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    let object: Map<String, Value> = serde_json::from_str(line)?;
    serde_json::from_value(Value::Object(object))
}

/// Accept any JSON value for a free-form field, keeping strings as-is and
/// rendering everything else (numbers, error objects) as JSON text.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
