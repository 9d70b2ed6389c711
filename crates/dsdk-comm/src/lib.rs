// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! [`CommHandler`]: serves the three HTTP verbs the server speaks to a
//! function-serving endpoint (C7, spec §4.7).

mod signature;
mod wire;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dsdk_client::Client;
use dsdk_core::{HttpMethod, RequestInfo};
use dsdk_engine::{CallOutcome, CallRequest, Engine, Handler};
use dsdk_error::{DsdkError, ErrorCode};
use dsdk_event::{EventSender, EventSenderConfig};
use dsdk_middleware::{Middleware, MiddlewareStack, RequestContext, RequestOutcome};
use dsdk_step::{Invoker, RunMode};

pub use signature::{verify_signature, verify_with_fallback, CLOCK_SKEW_WINDOW_SECS};
pub use wire::{encode_call_outcome, encode_op, RunRequestBody, RunRequestContext};

/// Header carrying the request signature (spec §6.1).
const SIGNATURE_HEADER: &str = "x-inngest-signature";

/// A framework-agnostic HTTP response, as returned by [`CommHandler::handle`].
#[derive(Debug, Clone)]
pub struct CommResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

impl CommResponse {
    fn json(status: u16, body: serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body: serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec()),
        }
    }

    fn error(status: u16, err: &DsdkError) -> Self {
        Self::json(status, serde_json::json!({ "code": err.code, "message": err.message }))
    }
}

/// The communication handler (C7): the single entry point an HTTP adapter
/// calls for every request against the function-serving endpoint.
pub struct CommHandler {
    client: Arc<Client>,
    http: reqwest::Client,
}

impl CommHandler {
    /// Build a handler bound to `client`'s function registry and configuration.
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self { client, http: reqwest::Client::new() }
    }

    /// Dispatch a request by method (spec §6.1).
    pub async fn handle(&self, request: &RequestInfo) -> CommResponse {
        match request.method {
            HttpMethod::Get => self.handle_introspection(),
            HttpMethod::Put => self.handle_sync().await,
            HttpMethod::Post => self.handle_call(request).await,
            HttpMethod::Other => CommResponse::json(405, serde_json::json!({ "message": "method not allowed" })),
        }
    }

    fn introspection_payload(&self) -> serde_json::Value {
        let mode = self.client.mode();
        let functions: Vec<serde_json::Value> = self
            .client
            .functions()
            .iter()
            .map(|f| serde_json::to_value(&f.config).unwrap_or(serde_json::Value::Null))
            .collect();

        serde_json::json!({
            "app_id": self.client.id(),
            "framework": dsdk_core::SDK_NAME,
            "sdk_version": dsdk_core::SDK_VERSION,
            "mode": if mode.is_dev { "dev" } else { "cloud" },
            "functions": functions,
            "capabilities": { "trust_probe": "v1" },
            "signing_key_fingerprint": self.client.signing_key().map(fingerprint),
        })
    }

    fn handle_introspection(&self) -> CommResponse {
        CommResponse::json(200, self.introspection_payload())
    }

    async fn handle_sync(&self) -> CommResponse {
        let payload = self.introspection_payload();
        let url = format!("{}/fn/register", self.client.api_base_url().trim_end_matches('/'));

        let mut request = self.http.post(&url).json(&payload);
        if let Some(key) = self.client.signing_key() {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                CommResponse { status, headers: BTreeMap::new(), body }
            }
            Err(err) => {
                tracing::warn!(error = %err, "sync to register endpoint failed");
                CommResponse::json(500, serde_json::json!({ "message": format!("sync failed: {err}") }))
            }
        }
    }

    async fn handle_call(&self, request: &RequestInfo) -> CommResponse {
        let raw_body = match request.body.bytes() {
            Ok(bytes) => bytes,
            Err(err) => return CommResponse::error(400, &err),
        };

        let mode = self.client.mode();
        if let Err(err) = verify_with_fallback(
            request.header(SIGNATURE_HEADER),
            &raw_body,
            self.client.signing_key(),
            self.client.signing_key_fallback(),
            mode.is_dev,
        ) {
            return CommResponse::error(401, &err);
        }

        let body = match RunRequestBody::parse(&raw_body) {
            Ok(body) => body,
            Err(err) => return CommResponse::error(400, &err),
        };

        let Some(function) = self.client.function(&body.ctx.fn_id) else {
            let err = DsdkError::new(
                ErrorCode::ProtocolUnknownFunction,
                format!("no function registered for id '{}'", body.ctx.fn_id),
            );
            return CommResponse::error(400, &err);
        };

        let max_attempts = function.config.retries.unwrap_or(3) + 1;
        let call_request = body.into_call_request(max_attempts);

        let client_layers: Vec<Box<dyn Middleware>> =
            self.client.middleware_factories().iter().map(|f| f.create()).collect();
        let function_layers: Vec<Box<dyn Middleware>> =
            function.middleware.iter().map(|f| f.create()).collect();
        let stack = Arc::new(MiddlewareStack::new(client_layers, function_layers));

        let events: Arc<dyn dsdk_step::EventDispatch> = Arc::new(self.build_event_sender(&stack));
        let invoker: Arc<dyn Invoker> = Arc::new(LocalInvoker { client: Arc::clone(&self.client), http: self.http.clone() });

        let run_mode = if self.client.checkpointing() { RunMode::Checkpoint } else { RunMode::Interrupt };
        let checkpointer: Option<Arc<dyn dsdk_step::Checkpointer>> = if self.client.checkpointing() {
            Some(Arc::new(HttpCheckpointer {
                client: Arc::clone(&self.client),
                http: self.http.clone(),
                run_id: call_request.run_id.clone(),
            }))
        } else {
            None
        };

        let engine = Engine::new(Arc::clone(&stack), checkpointer, events, invoker, run_mode);
        let handler: Handler = Arc::clone(&function.handler);

        let request_ctx = RequestContext { url: request.url.clone(), method: "POST".to_string() };
        let outcome = stack
            .run_wrap_request(request_ctx, move || {
                Box::pin(async move {
                    let call_outcome = engine.run_request(handler, call_request).await;
                    let (status, body) = encode_call_outcome(call_outcome);
                    Ok(RequestOutcome { status, body })
                })
            })
            .await;

        match outcome {
            Ok(RequestOutcome { status, body }) => CommResponse::json(status, body),
            Err(err) => CommResponse::error(500, &err),
        }
    }

    /// Build an [`EventSender`] sharing `stack` — the same instantiated
    /// middleware layers the rest of this request uses — so `step.sendEvent`
    /// runs `wrapSendEvent` through the identical per-request instances as
    /// everything else (spec §4.5: "Middleware instances are per-request").
    fn build_event_sender(&self, stack: &Arc<MiddlewareStack>) -> EventSender {
        EventSender::new(
            self.http.clone(),
            EventSenderConfig {
                event_base: self.client.event_base_url(),
                event_key: self.client.event_key(),
                environment: self.client.environment(),
                mode: self.client.mode(),
            },
            Arc::clone(stack),
        )
    }
}

fn fingerprint(signing_key: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(signing_key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Posts a completed `run` step's result to the server out-of-band (spec
/// §4.4.2, §6.2): `POST <apiBase>/v0/runs/<runId>/actions`.
struct HttpCheckpointer {
    client: Arc<Client>,
    http: reqwest::Client,
    run_id: String,
}

#[async_trait]
impl dsdk_step::Checkpointer for HttpCheckpointer {
    async fn checkpoint(&self, op: &dsdk_ops::OutgoingOp) -> Result<(), DsdkError> {
        let url = format!(
            "{}/v0/runs/{}/actions",
            self.client.api_base_url().trim_end_matches('/'),
            self.run_id,
        );
        let body = encode_op(op);
        let mut request = self.http.post(&url).json(&serde_json::json!([body]));
        if let Some(key) = self.client.signing_key() {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| DsdkError::new(ErrorCode::Internal, format!("checkpoint post failed: {err}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DsdkError::new(
                ErrorCode::Internal,
                format!("checkpoint rejected with status {}", response.status()),
            ))
        }
    }
}

/// Invokes another registered function locally, by re-entering the engine
/// with a synthetic, unmemoized [`CallRequest`].
///
/// `StepTools::invoke` never actually reaches this (spec: `invoke` is
/// server-executed — the step always records a pending op and suspends);
/// it's implemented fully anyway, rather than stubbed, so any caller that
/// does construct an `Engine` around a real `LocalInvoker` gets working
/// behaviour, and so the unreachable-today status is a property of the
/// call path, not of this type. See `DESIGN.md`.
struct LocalInvoker {
    client: Arc<Client>,
    http: reqwest::Client,
}

#[async_trait]
impl Invoker for LocalInvoker {
    async fn invoke(
        &self,
        function_id: &str,
        data: serde_json::Value,
        _timeout: Option<std::time::Duration>,
    ) -> Result<serde_json::Value, dsdk_error::StepFailure> {
        let Some(target) = self.client.function(function_id) else {
            return Err(dsdk_error::StepFailure::non_retriable(format!(
                "invoke target '{function_id}' is not registered"
            )));
        };

        let client_layers: Vec<Box<dyn Middleware>> =
            self.client.middleware_factories().iter().map(|f| f.create()).collect();
        let function_layers: Vec<Box<dyn Middleware>> =
            target.middleware.iter().map(|f| f.create()).collect();
        let stack = Arc::new(MiddlewareStack::new(client_layers, function_layers));

        let events: Arc<dyn dsdk_step::EventDispatch> = Arc::new(EventSender::new(
            self.http.clone(),
            EventSenderConfig {
                event_base: self.client.event_base_url(),
                event_key: self.client.event_key(),
                environment: self.client.environment(),
                mode: self.client.mode(),
            },
            Arc::clone(&stack),
        ));
        let invoker: Arc<dyn Invoker> = Arc::new(LocalInvoker {
            client: Arc::clone(&self.client),
            http: self.http.clone(),
        });
        let engine = Engine::new(stack, None, events, invoker, RunMode::Interrupt);

        let request = CallRequest {
            run_id: format!("invoke-{function_id}"),
            attempt: 1,
            max_attempts: 1,
            event: dsdk_core::Event::new("inngest/function.invoked", data.clone()),
            events: vec![dsdk_core::Event::new("inngest/function.invoked", data)],
            steps: dsdk_ops::MemoizedMap::new(),
        };

        match engine.run_request(Arc::clone(&target.handler), request).await {
            CallOutcome::Complete(value) => Ok(value),
            CallOutcome::Ops(_) => Err(dsdk_error::StepFailure::retry_after(
                "invoked function suspended on its own steps; synchronous nested invoke does not support this yet",
                5,
            )),
            CallOutcome::Error(err) => Err(dsdk_error::StepFailure::Retriable(dsdk_error::StepError::from_message(err.message))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdk_core::FunctionTrigger;
    use dsdk_function::FunctionBuilder;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(signing_key: Option<&str>) -> Arc<Client> {
        Arc::new(Client::new(dsdk_client::ClientOptions {
            signing_key: signing_key.map(str::to_string),
            is_dev: Some(signing_key.is_none()),
            ..dsdk_client::ClientOptions::new("app-a")
        }))
    }

    fn echo_handler() -> dsdk_engine::Handler {
        Arc::new(|ctx| {
            Box::pin(async move {
                let value: serde_json::Value = ctx.step.run("echo", || async move { Ok(ctx.event.data.clone()) }).await?;
                Ok(value)
            })
        })
    }

    #[tokio::test]
    async fn get_introspection_lists_registered_functions() {
        let client = client(None);
        let def = FunctionBuilder::new("fn-a", FunctionTrigger::event("app/a"))
            .build(echo_handler())
            .unwrap();
        client.register_function(def);

        let handler = CommHandler::new(client);
        let request = RequestInfo::buffered("http://localhost/api/inngest", HttpMethod::Get, BTreeMap::new(), vec![]);
        let response = handler.handle(&request).await;
        assert_eq!(response.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["app_id"], "app-a");
        assert_eq!(body["functions"][0]["id"], "fn-a");
    }

    #[tokio::test]
    async fn post_in_dev_mode_without_signature_still_dispatches() {
        let client = client(None);
        let def = FunctionBuilder::new("fn-a", FunctionTrigger::event("app/a"))
            .build(echo_handler())
            .unwrap();
        client.register_function(def);

        let handler = CommHandler::new(client);
        let raw_body = serde_json::json!({
            "event": { "name": "app/a", "data": { "x": 1 } },
            "ctx": { "fn_id": "fn-a", "run_id": "run-1", "attempt": 1 },
        });
        let request = RequestInfo::buffered(
            "http://localhost/api/inngest",
            HttpMethod::Post,
            BTreeMap::new(),
            raw_body.to_string().into_bytes(),
        );
        let response = handler.handle(&request).await;
        assert_eq!(response.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body[0]["op"], "RunComplete");
        assert_eq!(body[0]["data"], serde_json::json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn post_with_unknown_function_is_400() {
        let client = client(None);
        let handler = CommHandler::new(client);
        let raw_body = serde_json::json!({
            "event": { "name": "app/a", "data": {} },
            "ctx": { "fn_id": "missing", "run_id": "run-1", "attempt": 1 },
        });
        let request = RequestInfo::buffered(
            "http://localhost/api/inngest",
            HttpMethod::Post,
            BTreeMap::new(),
            raw_body.to_string().into_bytes(),
        );
        let response = handler.handle(&request).await;
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn post_in_cloud_mode_without_signature_is_401() {
        let client = client(Some("signkey-prod-abc"));
        let def = FunctionBuilder::new("fn-a", FunctionTrigger::event("app/a"))
            .build(echo_handler())
            .unwrap();
        client.register_function(def);

        let handler = CommHandler::new(client);
        let raw_body = serde_json::json!({
            "event": { "name": "app/a", "data": {} },
            "ctx": { "fn_id": "fn-a", "run_id": "run-1", "attempt": 1 },
        });
        let request = RequestInfo::buffered(
            "http://localhost/api/inngest",
            HttpMethod::Post,
            BTreeMap::new(),
            raw_body.to_string().into_bytes(),
        );
        let response = handler.handle(&request).await;
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn put_forwards_register_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fn/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&mock_server)
            .await;

        let mut env_vars = HashMap::new();
        env_vars.insert("INNGEST_DEV".to_string(), "0".to_string());
        let client = Arc::new(Client::new(dsdk_client::ClientOptions {
            signing_key: Some("signkey-prod-abc".into()),
            api_base_url: Some(mock_server.uri()),
            env_vars,
            ..dsdk_client::ClientOptions::new("app-a")
        }));
        let handler = CommHandler::new(client);
        let request = RequestInfo::buffered("http://localhost/api/inngest", HttpMethod::Put, BTreeMap::new(), vec![]);
        let response = handler.handle(&request).await;
        assert_eq!(response.status, 200);
    }
}
