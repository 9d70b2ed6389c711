// SPDX-License-Identifier: MIT OR Apache-2.0
//! The connect handshake (spec §4.9 step 1): `POST <apiBase>/v0/connect/start`.

use dsdk_client::Client;
use dsdk_error::{DsdkError, ErrorCode};

use crate::protocol::HandshakeResponse;

/// Perform the handshake, failing fast per spec §4.9's failure semantics:
/// a missing signing key in cloud mode or an empty function registry are
/// fatal before any network call; a 4xx response is fatal; anything else
/// network-shaped is retried by the caller.
///
/// # Errors
///
/// [`ErrorCode::ConfigMissingKey`] if cloud mode has no signing key,
/// [`ErrorCode::ConfigEmptyAppsList`] if no functions are registered,
/// [`ErrorCode::TransportHandshakeFailed`] for a failed request, a 4xx
/// response, or a response that doesn't parse as [`HandshakeResponse`].
pub async fn perform_handshake(client: &Client, http: &reqwest::Client) -> Result<HandshakeResponse, DsdkError> {
    let mode = client.mode();
    if !mode.is_dev && client.signing_key().is_none() {
        return Err(DsdkError::new(
            ErrorCode::ConfigMissingKey,
            "connect requires a signing key in cloud mode",
        ));
    }

    let functions = client.functions();
    if functions.is_empty() {
        return Err(DsdkError::new(
            ErrorCode::ConfigEmptyAppsList,
            "connect requires at least one registered function",
        ));
    }

    let payload = serde_json::json!({
        "app_id": client.id(),
        "functions": functions
            .iter()
            .map(|f| serde_json::to_value(&f.config).unwrap_or(serde_json::Value::Null))
            .collect::<Vec<_>>(),
        "capabilities": { "trust_probe": "v1" },
    });

    let url = format!("{}/v0/connect/start", client.api_base_url().trim_end_matches('/'));
    let mut request = http.post(&url).json(&payload);
    if let Some(key) = client.signing_key() {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|err| {
        DsdkError::new(ErrorCode::TransportHandshakeFailed, format!("connect handshake request failed: {err}"))
    })?;

    let status = response.status();
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(DsdkError::new(
            ErrorCode::TransportHandshakeFailed,
            format!("connect handshake rejected ({status}): {body}"),
        ));
    }
    if !status.is_success() {
        return Err(DsdkError::new(
            ErrorCode::TransportHandshakeFailed,
            format!("connect handshake failed with status {status}"),
        ));
    }

    response.json::<HandshakeResponse>().await.map_err(|err| {
        DsdkError::new(
            ErrorCode::TransportHandshakeFailed,
            format!("malformed connect handshake response: {err}"),
        )
    })
}
