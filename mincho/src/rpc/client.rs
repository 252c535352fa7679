//! Persistent JSON-RPC client for the local miner daemon.
//!
//! The client owns one socket at a time and runs one command at a time:
//! take a [`Command`] off the queue, write it as a line, read one reply
//! line, decode it, emit an [`RpcEvent`], then take the next command. There
//! is never more than one request in flight.
//!
//! ```text
//!                 connect ok                 round trip ok
//!  Disconnected ─────────────► Connected ◄──────────────┐
//!     ▲     │                    │    │                 │
//!     │     │ connect error      │    └─────────────────┘
//!     │     ▼                    │ write/read error, EOF
//!     └── Backoff ◄──────────────┘
//! ```
//!
//! A command whose round trip fails is dropped, never retried. A reply
//! that arrives but does not decode also drops its command and grows the
//! backoff, but the session stays up because the stream is still
//! line-aligned.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::backoff::LinearBackoff;
use super::connector::{Connector, TcpConnector};
use super::types::{Command, Method, Reply};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Longest reply line accepted from the miner.
const MAX_LINE_LENGTH: usize = 64 * 1024;

type Session<S> = Framed<S, LinesCodec>;

/// Events from the RPC client to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    /// A command completed its round trip.
    Reply {
        method: Method,
        reply: Reply,
        /// The reply line exactly as received.
        raw: String,
    },

    /// Connection indicator. Sent as `false` on every connect or I/O
    /// failure; the presenter decides when to flip the icon back on.
    StatusIcon(bool),

    /// The client is waiting `delay` before its next attempt. `attempt`
    /// counts consecutive failures.
    Reconnecting { attempt: u32, delay: Duration },

    /// A reply arrived but could not be decoded; its command was dropped.
    DecodeFailed { method: Method, error: String },
}

/// Cloneable handle for queueing commands and observing connection state.
#[derive(Debug, Clone)]
pub struct RpcHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    connected: watch::Receiver<bool>,
}

impl RpcHandle {
    pub(crate) fn new(
        command_tx: mpsc::UnboundedSender<Command>,
        connected: watch::Receiver<bool>,
    ) -> Self {
        Self {
            command_tx,
            connected,
        }
    }

    /// Queue a command. Never blocks; fails only once the client is gone.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Receiver that is notified whenever the session goes up or down.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }
}

/// The RPC connection manager.
///
/// Construct with [`RpcClient::new`] and drive with [`RpcClient::run`] on
/// its own task. The socket and the connected flag are owned by the
/// running loop; other tasks only see them through [`RpcHandle`].
pub struct RpcClient<C = TcpConnector> {
    connector: C,
    command_rx: mpsc::UnboundedReceiver<Command>,

    /// Command to run before reading the queue again.
    pending: Option<Command>,

    event_tx: mpsc::Sender<RpcEvent>,
    connected: watch::Sender<bool>,
    backoff: LinearBackoff,

    /// JSON-RPC id for the next request on the current session.
    next_id: u64,

    shutdown: CancellationToken,
}

impl RpcClient<TcpConnector> {
    /// Client for the miner at `config.addr`.
    pub fn new(
        config: &RpcConfig,
        event_tx: mpsc::Sender<RpcEvent>,
        shutdown: CancellationToken,
    ) -> (Self, RpcHandle) {
        Self::with_connector(TcpConnector::new(config.addr.clone()), event_tx, shutdown)
    }
}

impl<C: Connector> RpcClient<C> {
    pub fn with_connector(
        connector: C,
        event_tx: mpsc::Sender<RpcEvent>,
        shutdown: CancellationToken,
    ) -> (Self, RpcHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);

        let client = Self {
            connector,
            command_rx,
            pending: None,
            event_tx,
            connected: connected_tx,
            backoff: LinearBackoff::new(),
            next_id: 1,
            shutdown,
        };

        (client, RpcHandle::new(command_tx, connected_rx))
    }

    /// Run until cancelled, every handle is dropped, or the event receiver
    /// goes away.
    pub async fn run(mut self) {
        info!(endpoint = %self.connector.endpoint(), "RPC client started");

        let shutdown = self.shutdown.clone();
        let mut session = None;

        loop {
            let keep_running = tokio::select! {
                _ = shutdown.cancelled() => false,
                keep_running = self.iterate(&mut session) => keep_running,
            };
            if !keep_running {
                break;
            }
        }

        drop(session);
        self.connected.send_replace(false);
        info!("RPC client stopped");
    }

    /// One command plus whatever recovery its outcome calls for.
    async fn iterate(&mut self, session: &mut Option<Session<C::Stream>>) -> bool {
        match self.step(session).await {
            Ok(true) => true,

            Ok(false) => {
                info!("Command queue closed");
                false
            }

            Err(Error::ChannelClosed) => {
                debug!("Event receiver dropped");
                false
            }

            Err(Error::Decode { method, source }) => {
                let delay = self.backoff.record_failure();
                warn!(
                    %method,
                    error = %source,
                    failures = self.backoff.failures(),
                    "Dropping command with undecodable reply"
                );
                let event = RpcEvent::DecodeFailed {
                    method,
                    error: source.to_string(),
                };
                if self.emit(event).await.is_err() {
                    return false;
                }
                tokio::time::sleep(delay).await;
                true
            }

            Err(error) => {
                *session = None;
                self.fail(error).await
            }
        }
    }

    /// Ensure a session, then run one command to completion.
    ///
    /// Returns `Ok(false)` once the queue is closed and drained.
    async fn step(&mut self, session: &mut Option<Session<C::Stream>>) -> Result<bool> {
        let lines = match session {
            Some(lines) => lines,
            None => session.insert(self.open().await?),
        };

        let Some(command) = self.next_command().await else {
            return Ok(false);
        };

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let raw = exchange(lines, &command, id).await?;
        let reply = command.method.decode(&raw)?;
        self.backoff.reset();

        if !reply.response().answers(id) {
            warn!(
                method = %command.method,
                sent = id,
                received = reply.response().id.as_deref().unwrap_or_default(),
                "Reply id does not match request"
            );
        }

        self.emit(RpcEvent::Reply {
            method: command.method,
            reply,
            raw,
        })
        .await?;

        Ok(true)
    }

    async fn open(&mut self) -> Result<Session<C::Stream>> {
        let stream = self.connector.connect().await?;

        info!(endpoint = %self.connector.endpoint(), "Connected to miner");
        self.connected.send_replace(true);
        self.next_id = 1;

        // Ask for a fresh status right away unless work is already waiting.
        if self.pending.is_none() {
            match self.command_rx.try_recv() {
                Ok(command) => self.pending = Some(command),
                Err(TryRecvError::Empty) => self.pending = Some(Command::new(Method::Status)),
                Err(TryRecvError::Disconnected) => {}
            }
        }

        Ok(Framed::new(
            stream,
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        ))
    }

    async fn next_command(&mut self) -> Option<Command> {
        match self.pending.take() {
            Some(command) => Some(command),
            None => self.command_rx.recv().await,
        }
    }

    /// Failure path for connect and I/O errors: mark disconnected, notify,
    /// and wait out the backoff. Returns false when the client should stop.
    async fn fail(&mut self, error: Error) -> bool {
        self.connected.send_replace(false);

        let delay = self.backoff.record_failure();
        let attempt = self.backoff.failures();
        warn!(
            endpoint = %self.connector.endpoint(),
            error = %error,
            attempt,
            delay_secs = delay.as_secs(),
            "Miner unreachable, retrying"
        );

        if self.emit(RpcEvent::StatusIcon(false)).await.is_err()
            || self
                .emit(RpcEvent::Reconnecting { attempt, delay })
                .await
                .is_err()
        {
            return false;
        }

        tokio::time::sleep(delay).await;
        true
    }

    async fn emit(&self, event: RpcEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

/// Write one request line and read back one reply line.
async fn exchange<S>(lines: &mut Session<S>, command: &Command, id: u64) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = command.to_request(id).to_line()?;
    debug!(%payload, "Sending request");
    lines.send(payload).await?;

    match lines.next().await {
        Some(line) => {
            let line = line?;
            debug!(reply = %line, "Received reply");
            Ok(line)
        }
        None => Err(Error::Closed),
    }
}

/// Connect to `addr`, run a single command and disconnect.
pub async fn call_once(addr: &str, command: &Command) -> Result<(Reply, String)> {
    let stream = TcpConnector::new(addr).connect().await?;
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let raw = exchange(&mut lines, command, 1).await?;
    let reply = command.method.decode(&raw)?;
    Ok((reply, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::io;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    /// Connector that hands out a scripted sequence of outcomes, then
    /// refuses forever.
    struct ScriptedConnector {
        attempts: VecDeque<io::Result<DuplexStream>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Stream = DuplexStream;

        async fn connect(&mut self) -> io::Result<DuplexStream> {
            self.attempts.pop_front().unwrap_or_else(refused)
        }

        fn endpoint(&self) -> String {
            "scripted".to_string()
        }
    }

    fn refused() -> io::Result<DuplexStream> {
        Err(io::ErrorKind::ConnectionRefused.into())
    }

    struct Harness {
        client: RpcClient<ScriptedConnector>,
        handle: RpcHandle,
        events: mpsc::Receiver<RpcEvent>,
        shutdown: CancellationToken,
    }

    fn harness(attempts: Vec<io::Result<DuplexStream>>) -> Harness {
        let (event_tx, events) = mpsc::channel(32);
        let shutdown = CancellationToken::new();
        let connector = ScriptedConnector {
            attempts: attempts.into(),
        };
        let (client, handle) = RpcClient::with_connector(connector, event_tx, shutdown.clone());
        Harness {
            client,
            handle,
            events,
            shutdown,
        }
    }

    /// Fake miner: answers each request with `respond(request)`, or hangs
    /// up when it returns `None`. Yields the requests it saw.
    fn spawn_miner<F>(stream: DuplexStream, respond: F) -> JoinHandle<Vec<Value>>
    where
        F: Fn(&Value) -> Option<String> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = Framed::new(stream, LinesCodec::new());
            let mut seen = Vec::new();
            while let Some(Ok(line)) = lines.next().await {
                let request: Value = serde_json::from_str(&line).expect("request is JSON");
                let reply = respond(&request);
                seen.push(request);
                match reply {
                    Some(reply) => {
                        if lines.send(reply).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            seen
        })
    }

    fn answer(request: &Value) -> Option<String> {
        let id = request["id"].to_string();
        let reply = match request["method"].as_str() {
            Some("status") => json!({
                "error": null,
                "id": id,
                "result": [{
                    "devfee_connected": false,
                    "hashes": 900,
                    "hashrate": 51_000_000,
                    "mode": "normal",
                    "threads_current": 6,
                    "upstream_connected": {"eu1": true}
                }]
            }),
            other => json!({"error": null, "id": id, "result": other}),
        };
        Some(reply.to_string())
    }

    fn methods(seen: &[Value]) -> Vec<&str> {
        seen.iter().map(|r| r["method"].as_str().unwrap()).collect()
    }

    async fn next_reply(events: &mut mpsc::Receiver<RpcEvent>) -> (Method, Reply) {
        match events.recv().await {
            Some(RpcEvent::Reply { method, reply, .. }) => (method, reply),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_arrives_after_two_failed_connects() {
        let (client_end, miner_end) = tokio::io::duplex(4096);
        let miner = spawn_miner(miner_end, answer);
        let Harness {
            client,
            handle,
            mut events,
            shutdown,
        } = harness(vec![refused(), refused(), Ok(client_end)]);

        handle.enqueue(Command::new(Method::Status)).unwrap();
        assert!(!handle.is_connected());

        let started = Instant::now();
        let task = tokio::spawn(client.run());

        for attempt in 1..=2 {
            assert_eq!(events.recv().await, Some(RpcEvent::StatusIcon(false)));
            assert_eq!(
                events.recv().await,
                Some(RpcEvent::Reconnecting {
                    attempt,
                    delay: Duration::from_secs(2)
                })
            );
            assert!(!handle.is_connected());
        }

        let (method, reply) = next_reply(&mut events).await;
        assert_eq!(method, Method::Status);
        let status = reply.as_status().expect("decoded as status");
        assert_eq!(status.total_hashrate(), 51_000_000);
        assert!(status.upstream_connected());
        assert!(handle.is_connected());

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");

        shutdown.cancel();
        task.await.unwrap();
        assert!(!handle.is_connected());

        let seen = miner.await.unwrap();
        assert_eq!(methods(&seen), ["status"]);
    }

    #[tokio::test]
    async fn replies_follow_enqueue_order() {
        let (client_end, miner_end) = tokio::io::duplex(4096);
        let miner = spawn_miner(miner_end, answer);
        let Harness {
            client,
            handle,
            mut events,
            shutdown,
        } = harness(vec![Ok(client_end)]);

        let queued = [Method::Hello, Method::Hashrate, Method::Threads, Method::Stop];
        for method in queued {
            let command = if method == Method::Threads {
                Command::with_params(method, vec![json!(4)])
            } else {
                Command::new(method)
            };
            handle.enqueue(command).unwrap();
        }

        let task = tokio::spawn(client.run());

        for (index, expected) in queued.iter().enumerate() {
            let (method, reply) = next_reply(&mut events).await;
            assert_eq!(method, *expected);
            let id = (index + 1).to_string();
            assert_eq!(reply.response().id.as_deref(), Some(id.as_str()));
        }

        shutdown.cancel();
        task.await.unwrap();

        let seen = miner.await.unwrap();
        assert_eq!(methods(&seen), ["hello", "hashrate", "threads", "stop"]);
        assert_eq!(seen[2]["params"], json!([4]));
        assert!(seen[0].get("params").is_none());
    }

    #[tokio::test]
    async fn idle_connect_queues_status() {
        let (client_end, miner_end) = tokio::io::duplex(4096);
        let miner = spawn_miner(miner_end, answer);
        let Harness {
            client,
            handle: _handle,
            mut events,
            shutdown,
        } = harness(vec![Ok(client_end)]);

        let task = tokio::spawn(client.run());

        let (method, _) = next_reply(&mut events).await;
        assert_eq!(method, Method::Status);

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(methods(&miner.await.unwrap()), ["status"]);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_reply_drops_command_but_keeps_session() {
        let (client_end, miner_end) = tokio::io::duplex(4096);
        let miner = spawn_miner(miner_end, |request| match request["method"].as_str() {
            Some("status") => Some("this is not json".to_string()),
            _ => answer(request),
        });
        let Harness {
            client,
            handle,
            mut events,
            shutdown,
        } = harness(vec![Ok(client_end)]);

        handle.enqueue(Command::new(Method::Status)).unwrap();
        handle.enqueue(Command::new(Method::Hello)).unwrap();
        let started = Instant::now();
        let task = tokio::spawn(client.run());

        match events.recv().await {
            Some(RpcEvent::DecodeFailed { method, .. }) => assert_eq!(method, Method::Status),
            other => panic!("expected decode failure, got {other:?}"),
        }
        assert!(handle.is_connected());

        let (method, _) = next_reply(&mut events).await;
        assert_eq!(method, Method::Hello);
        assert!(handle.is_connected());
        assert!(started.elapsed() >= Duration::from_secs(2));

        shutdown.cancel();
        task.await.unwrap();

        // Both commands went over the one scripted connection.
        assert_eq!(methods(&miner.await.unwrap()), ["status", "hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_drops_command_and_reconnects() {
        let (first_client, first_miner) = tokio::io::duplex(4096);
        let (second_client, second_miner) = tokio::io::duplex(4096);
        let first = spawn_miner(first_miner, |request| match request["method"].as_str() {
            Some("start") => None,
            _ => answer(request),
        });
        let second = spawn_miner(second_miner, answer);
        let Harness {
            client,
            handle,
            mut events,
            shutdown,
        } = harness(vec![Ok(first_client), Ok(second_client)]);
        let mut connected = handle.watch_connected();

        handle.enqueue(Command::new(Method::Hello)).unwrap();
        let task = tokio::spawn(client.run());

        let (method, _) = next_reply(&mut events).await;
        assert_eq!(method, Method::Hello);
        assert!(*connected.borrow_and_update());

        // The miner hangs up on this one.
        handle.enqueue(Command::new(Method::Start)).unwrap();

        assert_eq!(events.recv().await, Some(RpcEvent::StatusIcon(false)));
        assert!(connected.has_changed().unwrap());
        assert!(!*connected.borrow_and_update());
        assert!(matches!(
            events.recv().await,
            Some(RpcEvent::Reconnecting { attempt: 1, .. })
        ));
        assert!(!handle.is_connected());

        // Nothing is queued, so the new session opens with a status request.
        let (method, reply) = next_reply(&mut events).await;
        assert_eq!(method, Method::Status);
        // Request ids restart with each session.
        assert_eq!(reply.response().id.as_deref(), Some("1"));
        assert!(*connected.borrow_and_update());

        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(methods(&first.await.unwrap()), ["hello", "start"]);
        assert_eq!(methods(&second.await.unwrap()), ["status"]);
    }

    #[tokio::test]
    async fn mismatched_reply_id_is_still_delivered() {
        let (client_end, miner_end) = tokio::io::duplex(4096);
        let miner = spawn_miner(miner_end, |_| Some(r#"{"error":null,"id":"42"}"#.to_string()));
        let Harness {
            client,
            handle,
            mut events,
            shutdown,
        } = harness(vec![Ok(client_end)]);

        handle.enqueue(Command::new(Method::Hello)).unwrap();
        let task = tokio::spawn(client.run());

        let (method, reply) = next_reply(&mut events).await;
        assert_eq!(method, Method::Hello);
        assert!(!reply.response().answers(1));
        assert!(handle.is_connected());

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(methods(&miner.await.unwrap()), ["hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_round_trip_resets_failure_count() {
        let (first_client, first_miner) = tokio::io::duplex(4096);
        let (second_client, second_miner) = tokio::io::duplex(4096);
        let _first = spawn_miner(first_miner, |_| None);
        let _second = spawn_miner(second_miner, |request| match request["method"].as_str() {
            Some("stop") => None,
            _ => answer(request),
        });
        let Harness {
            client,
            handle,
            mut events,
            shutdown,
        } = harness(vec![Ok(first_client), Ok(second_client)]);

        for method in [Method::Hello, Method::Start, Method::Stop] {
            handle.enqueue(Command::new(method)).unwrap();
        }
        let task = tokio::spawn(client.run());

        let mut attempts = Vec::new();
        while attempts.len() < 3 {
            if let Some(RpcEvent::Reconnecting { attempt, .. }) = events.recv().await {
                attempts.push(attempt);
            }
        }

        // hello fails (1), start succeeds and resets, stop fails (1),
        // then the connector refuses (2).
        assert_eq!(attempts, [1, 1, 2]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_a_disconnected_client() {
        let Harness {
            client,
            handle,
            mut events,
            shutdown,
        } = harness(vec![]);

        let task = tokio::spawn(client.run());
        assert_eq!(events.recv().await, Some(RpcEvent::StatusIcon(false)));

        shutdown.cancel();
        task.await.unwrap();
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_client() {
        let (client_end, miner_end) = tokio::io::duplex(4096);
        let miner = spawn_miner(miner_end, answer);
        let Harness {
            client,
            handle,
            events: _events,
            shutdown: _shutdown,
        } = harness(vec![Ok(client_end)]);

        drop(handle);
        client.run().await;

        assert!(miner.await.unwrap().is_empty());
    }
}
