// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gateway ↔ worker message frames exchanged over the connect WebSocket
//! (spec §4.9 steps 3–6), and the handshake request/response (step 1).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Response body from `POST <apiBase>/v0/connect/start` (spec §4.9 step 1).
/// Wire fields are camelCase, unlike the snake_case call-dispatch body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Opaque id for this connection, used in diagnostics and reconnects.
    pub connection_id: String,
    /// WebSocket URL to open the gateway connection against.
    pub gateway_endpoint: String,
    /// Logical gateway group this connection was assigned to.
    pub gateway_group: String,
    /// Short-lived token authenticating the WebSocket upgrade.
    pub session_token: String,
    /// Token the worker echoes back in `WORKER_CONNECT` to prove it already
    /// completed the handshake.
    pub sync_token: String,
}

/// A message the worker sends to the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum WorkerMessage {
    /// Registration sent immediately after the socket opens (spec §4.9 step 3).
    #[serde(rename = "WORKER_CONNECT")]
    WorkerConnect {
        /// Token proving a completed handshake.
        sync_token: String,
        /// App id this worker serves.
        app_id: String,
        /// Registered function manifests, same shape as the GET introspection payload.
        functions: Vec<serde_json::Value>,
        /// Advertised capabilities.
        capabilities: serde_json::Value,
        /// Stable identity across reconnects of the same physical worker, if configured.
        #[serde(skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
    },
    /// Response to an `EXECUTOR_REQUEST` (spec §4.9 step 4).
    #[serde(rename = "WORKER_REPLY")]
    WorkerReply {
        /// Echoes the originating `ExecutorRequest::request_id`.
        request_id: String,
        /// HTTP-equivalent status code the call dispatch produced.
        status: u16,
        /// Response headers, as the HTTP path would have sent them.
        headers: BTreeMap<String, String>,
        /// Response body, JSON-decoded.
        body: serde_json::Value,
    },
    /// Reply to `GATEWAY_HEARTBEAT` (spec §4.9 step 5).
    #[serde(rename = "WORKER_HEARTBEAT")]
    WorkerHeartbeat,
}

/// A message the gateway sends to the worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum GatewayMessage {
    /// Carries the same logical POST body [`dsdk_comm::CommHandler`] answers
    /// over plain HTTP (spec §4.9 step 4).
    #[serde(rename = "EXECUTOR_REQUEST")]
    ExecutorRequest {
        /// Correlates the eventual `WorkerReply`.
        request_id: String,
        /// Request signature, verified the same way the HTTP path does.
        #[serde(default)]
        signature: Option<String>,
        /// The call-dispatch body, exactly as `RunRequestBody::parse` expects.
        body: serde_json::Value,
    },
    /// Liveness ping the worker must answer with `WorkerHeartbeat` (spec §4.9 step 5).
    #[serde(rename = "GATEWAY_HEARTBEAT")]
    GatewayHeartbeat,
    /// This connection is winding down; the worker keeps serving in-flight
    /// work but should establish a replacement (spec §4.9 step 6).
    #[serde(rename = "DRAINING")]
    Draining,
    /// Any message kind not recognised by this version of the protocol.
    #[serde(other)]
    Unknown,
}
