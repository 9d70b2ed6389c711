// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The connect transport (C9, spec §4.9): a long-lived WebSocket run loop
//! standing in for inbound HTTP when a worker can't expose one.

mod backoff;
mod handshake;
mod protocol;
mod state;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dsdk_client::Client;
use dsdk_comm::CommHandler;
use dsdk_core::{HttpMethod, RequestInfo};
use dsdk_error::{DsdkError, ErrorCode};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;

pub use backoff::{compute_delay, Backoff, BackoffConfig};
pub use protocol::{GatewayMessage, HandshakeResponse, WorkerMessage};
pub use state::{ConnectionLifecycle, ConnectionState, ExternalState, InvalidTransition, StateTransition};

/// How long the gateway heartbeat is allowed to go quiet before this worker
/// treats the connection as lost and starts reconnecting (spec §4.9 step 5).
const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(45);

/// How long [`ConnectHandle::close`] waits for in-flight `EXECUTOR_REQUEST`s
/// to finish before cancelling them outright (spec §4.9 step 7).
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A running connect worker (C9), serving calls over a gateway WebSocket
/// instead of inbound HTTP. Grounded on `abp-host`'s sidecar supervisor: one
/// long-lived task owning a connection, restarted under its own backoff
/// policy, exposing the same coarse lifecycle observers a caller of that
/// supervisor gets.
pub struct ConnectHandle {
    lifecycle: Arc<Mutex<ConnectionLifecycle>>,
    close_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    run_task: tokio::task::JoinHandle<()>,
}

impl ConnectHandle {
    /// Perform the handshake, open the gateway WebSocket, register, and
    /// spawn the steady-state run loop in the background.
    ///
    /// # Errors
    ///
    /// Returns whatever [`handshake::perform_handshake`] or the initial
    /// WebSocket dial produced, if either fails before a connection is
    /// established (spec §4.9: handshake 4xx and dial failure are both
    /// surfaced to the caller rather than retried silently).
    pub async fn connect(client: Arc<Client>) -> Result<Self, DsdkError> {
        let http = reqwest::Client::new();
        let comm = Arc::new(CommHandler::new(Arc::clone(&client)));

        let lifecycle = Arc::new(Mutex::new(ConnectionLifecycle::new()));
        let socket = match dial(&client, &http, &lifecycle).await {
            Ok(socket) => socket,
            Err(err) => {
                // Unlike a dial failure during `reconnect`'s backoff loop, a
                // failure to ever establish the first connection is fatal
                // (spec §4.9: handshake 4xx / dial failure surfaced, not retried).
                let _ = lifecycle.lock().await.transition(ConnectionState::Closed, Some(err.message.clone()));
                return Err(err);
            }
        };

        let (close_tx, close_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);

        let worker = ConnectWorker {
            client,
            http,
            comm,
            lifecycle: Arc::clone(&lifecycle),
            close_rx,
            closed_tx,
        };
        let run_task = tokio::spawn(worker.run(socket));

        Ok(Self { lifecycle, close_tx, closed_rx, run_task })
    }

    /// Externally-visible connection state (spec §4.9: "external observers
    /// see only CONNECTING, ACTIVE, CLOSING, CLOSED").
    pub async fn state(&self) -> ExternalState {
        self.lifecycle.lock().await.external_state()
    }

    /// Begin graceful shutdown and wait for the worker to reach `CLOSED`.
    /// Idempotent: calling this more than once, or after the worker already
    /// closed on its own, just waits on the same signal.
    pub async fn close(mut self) {
        let _ = self.close_tx.send(true);
        let _ = self.closed_rx.wait_for(|closed| *closed).await;
        let _ = self.run_task.await;
    }
}

type GatewaySocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Handshake, open the gateway socket, and register, transitioning the
/// shared lifecycle to `Active` on success (spec §4.9 steps 1–3). Leaves the
/// lifecycle untouched on failure — it's the caller's job to decide whether
/// a failed dial is fatal (first connect) or just another retry (reconnect).
async fn dial(
    client: &Client,
    http: &reqwest::Client,
    lifecycle: &Arc<Mutex<ConnectionLifecycle>>,
) -> Result<GatewaySocket, DsdkError> {
    let handshake = handshake::perform_handshake(client, http).await?;

    let url = format!("{}?session_token={}", handshake.gateway_endpoint, handshake.session_token);
    let (mut socket, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|err| DsdkError::new(ErrorCode::TransportSocketFailed, format!("gateway dial failed: {err}")))?;

    let register = WorkerMessage::WorkerConnect {
        sync_token: handshake.sync_token,
        app_id: client.id().to_string(),
        functions: client
            .functions()
            .iter()
            .map(|f| serde_json::to_value(&f.config).unwrap_or(serde_json::Value::Null))
            .collect(),
        capabilities: serde_json::json!({ "trust_probe": "v1" }),
        instance_id: None,
    };
    send_message(&mut socket, &register).await?;

    let mut lifecycle = lifecycle.lock().await;
    lifecycle
        .transition(ConnectionState::Active, Some("registered with gateway".into()))
        .map_err(|err| DsdkError::new(ErrorCode::Internal, err.to_string()))?;

    Ok(socket)
}

async fn send_message<S>(socket: &mut S, message: &WorkerMessage) -> Result<(), DsdkError>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(message)
        .map_err(|err| DsdkError::new(ErrorCode::Internal, format!("failed to encode worker message: {err}")))?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| DsdkError::new(ErrorCode::TransportSocketFailed, format!("failed to send on gateway socket: {err}")))
}

/// Owns the steady-state run loop for one connection. A new [`ConnectWorker`]
/// (sharing `client`/`http`/`comm`/`lifecycle`) is spun up for every
/// reconnect or drain hand-off; only the socket underneath it changes.
struct ConnectWorker {
    client: Arc<Client>,
    http: reqwest::Client,
    comm: Arc<CommHandler>,
    lifecycle: Arc<Mutex<ConnectionLifecycle>>,
    close_rx: watch::Receiver<bool>,
    closed_tx: watch::Sender<bool>,
}

impl ConnectWorker {
    /// Drive one connection until it closes, drains into a replacement, or
    /// the caller asks to shut down (spec §4.9 steps 4–7).
    async fn run(mut self, socket: GatewaySocket) {
        let (mut write, mut read) = socket.split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_DEADLINE);
        heartbeat.tick().await; // first tick fires immediately; consume it before the select loop

        loop {
            tokio::select! {
                biased;

                _ = self.close_rx.changed() => {
                    if *self.close_rx.borrow() {
                        self.shut_down(&mut write, in_flight).await;
                        return;
                    }
                }

                Some(reply) = reply_rx.recv() => {
                    if send_message(&mut write, &reply).await.is_err() {
                        self.reconnect(in_flight).await;
                        return;
                    }
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.reset();
                            if self.dispatch(&text, &reply_tx, &mut in_flight).await {
                                // gateway asked this connection to wind down; establish a
                                // replacement the same way a lost socket would (spec §4.9 step 6)
                                self.reconnect(in_flight).await;
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            self.reconnect(in_flight).await;
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "gateway socket read failed");
                            self.reconnect(in_flight).await;
                            return;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    tracing::warn!("missed gateway heartbeat deadline");
                    self.reconnect(in_flight).await;
                    return;
                }
            }
        }
    }

    /// Parse one inbound frame and, for `EXECUTOR_REQUEST`, spawn the call
    /// dispatch so the run loop keeps reading while it's in flight. Returns
    /// `true` if the gateway asked this connection to drain.
    async fn dispatch(
        &self,
        text: &str,
        reply_tx: &mpsc::UnboundedSender<WorkerMessage>,
        in_flight: &mut JoinSet<()>,
    ) -> bool {
        let message: GatewayMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "unparseable gateway frame, ignoring");
                return false;
            }
        };

        match message {
            GatewayMessage::ExecutorRequest { request_id, signature, body } => {
                let comm = Arc::clone(&self.comm);
                let reply_tx = reply_tx.clone();
                in_flight.spawn(async move {
                    let mut headers = BTreeMap::new();
                    if let Some(signature) = signature {
                        headers.insert("x-inngest-signature".to_string(), signature);
                    }
                    let raw_body = serde_json::to_vec(&body).unwrap_or_default();
                    let request = RequestInfo::buffered(
                        "connect://gateway/executor-request",
                        HttpMethod::Post,
                        headers,
                        raw_body,
                    );
                    let response = comm.handle(&request).await;
                    let body = serde_json::from_slice(&response.body).unwrap_or(serde_json::Value::Null);
                    let _ = reply_tx.send(WorkerMessage::WorkerReply {
                        request_id,
                        status: response.status,
                        headers: response.headers,
                        body,
                    });
                });
                false
            }
            GatewayMessage::GatewayHeartbeat => {
                let _ = reply_tx.send(WorkerMessage::WorkerHeartbeat);
                false
            }
            GatewayMessage::Draining => {
                let _ = self
                    .lifecycle
                    .lock()
                    .await
                    .transition(ConnectionState::Draining, Some("gateway requested drain".into()));
                true
            }
            GatewayMessage::Unknown => {
                tracing::debug!("ignoring gateway frame of unrecognised kind");
                false
            }
        }
    }

    /// Lost the socket: mark `Reconnecting` (stays externally `Active`),
    /// finish in-flight work, and re-dial with backoff until it succeeds or
    /// the caller asks to shut down first (spec §4.9 step 5).
    async fn reconnect(&mut self, in_flight: JoinSet<()>) {
        let _ = self.lifecycle.lock().await.transition(ConnectionState::Reconnecting, Some("socket lost".into()));
        drain_in_flight(in_flight, CLOSE_GRACE_PERIOD).await;

        let mut backoff = Backoff::new(BackoffConfig::default());
        loop {
            if *self.close_rx.borrow() {
                let mut lifecycle = self.lifecycle.lock().await;
                let _ = lifecycle.transition(ConnectionState::Closing, Some("shutdown requested mid-reconnect".into()));
                let _ = lifecycle.transition(ConnectionState::Closed, None);
                let _ = self.closed_tx.send(true);
                return;
            }

            match dial(&self.client, &self.http, &self.lifecycle).await {
                Ok(socket) => {
                    let next = ConnectWorker {
                        client: Arc::clone(&self.client),
                        http: self.http.clone(),
                        comm: Arc::clone(&self.comm),
                        lifecycle: Arc::clone(&self.lifecycle),
                        close_rx: self.close_rx.clone(),
                        closed_tx: self.closed_tx.clone(),
                    };
                    // Spawn rather than recurse in place: `run` owns its own
                    // boxed future stack and this keeps `reconnect` iterative.
                    tokio::spawn(next.run(socket));
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "gateway reconnect attempt failed");
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
    }

    /// User-initiated shutdown (spec §4.9 step 7): stop taking new work,
    /// give in-flight requests `CLOSE_GRACE_PERIOD` to finish, then close
    /// the socket and publish the terminal state.
    async fn shut_down<S>(&mut self, write: &mut S, in_flight: JoinSet<()>)
    where
        S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let _ = self.lifecycle.lock().await.transition(ConnectionState::Closing, Some("close requested".into()));
        drain_in_flight(in_flight, CLOSE_GRACE_PERIOD).await;
        let _ = write.send(Message::Close(None)).await;
        let _ = self.lifecycle.lock().await.transition(ConnectionState::Closed, None);
        let _ = self.closed_tx.send(true);
    }
}

/// Wait for in-flight `EXECUTOR_REQUEST` handlers to finish, up to `grace`;
/// anything still running past that is abandoned (its task keeps running,
/// but its `WorkerReply` will race a closed or replaced socket).
async fn drain_in_flight(mut in_flight: JoinSet<()>, grace: Duration) {
    let _ = tokio::time::timeout(grace, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_fast_with_no_registered_functions() {
        let client = Arc::new(Client::new(dsdk_client::ClientOptions {
            signing_key: Some("signkey-prod-abc".into()),
            ..dsdk_client::ClientOptions::new("app-a")
        }));
        let err = ConnectHandle::connect(client).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigEmptyAppsList);
    }

    #[tokio::test]
    async fn connect_fails_fast_without_signing_key_in_cloud_mode() {
        let client = Arc::new(Client::new(dsdk_client::ClientOptions {
            is_dev: Some(false),
            ..dsdk_client::ClientOptions::new("app-a")
        }));
        let err = ConnectHandle::connect(client).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissingKey);
    }

    #[tokio::test]
    async fn connect_surfaces_dial_failure_against_an_unreachable_gateway() {
        // No gateway is listening at api_base_url, so the handshake POST
        // itself fails before any socket is opened.
        let client = Arc::new(Client::new(dsdk_client::ClientOptions {
            signing_key: Some("signkey-prod-abc".into()),
            api_base_url: Some("http://127.0.0.1:1".into()),
            ..dsdk_client::ClientOptions::new("app-a")
        }));
        let def = dsdk_function::FunctionBuilder::new("fn-a", dsdk_core::FunctionTrigger::event("app/a"))
            .build(Arc::new(|_ctx| Box::pin(async { Ok(serde_json::json!(null)) })))
            .unwrap();
        client.register_function(def);

        let err = ConnectHandle::connect(client).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportHandshakeFailed);
    }
}
