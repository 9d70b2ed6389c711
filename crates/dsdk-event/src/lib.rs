// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! [`EventSender`]: the event send pipeline (C8, spec §4.8).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dsdk_core::{Event, Mode};
use dsdk_error::{DsdkError, ErrorCode};
use dsdk_middleware::{MiddlewareStack, SendEventContext, SendEventOutcome};
use dsdk_step::EventDispatch;
use serde::Deserialize;

/// Header carrying the server-assigned environment name.
const ENV_HEADER: &str = "x-inngest-env";
/// Header seeding server-side idempotency when no event carries an explicit id.
const EVENT_ID_SEED_HEADER: &str = "x-inngest-event-id-seed";
/// Header identifying this SDK to the server.
const SDK_HEADER: &str = "x-inngest-sdk";
/// Dummy event key used in dev mode when none is configured (spec §4.8 step 3).
const DEV_DUMMY_EVENT_KEY: &str = "dev-mode-dummy-event-key";

/// The server's JSON response to an event-send POST (spec §4.8 step 2d).
#[derive(Debug, Deserialize)]
struct SendResponseBody {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Configuration fixed at construction: where to send, how to authenticate,
/// and which environment to report.
#[derive(Debug, Clone)]
pub struct EventSenderConfig {
    /// Base URL events are sent to; the sender appends `/e/<eventKey>`.
    pub event_base: String,
    /// Event key configured on the client (`Client::set_event_key`), if any.
    pub event_key: Option<String>,
    /// Environment name configured on the client (`Client::set_env_vars`),
    /// if any. Overridable per call via [`EventSender::send_with_env`].
    pub environment: Option<String>,
    /// Operating mode: decides whether a missing event key is fatal or
    /// filled with [`DEV_DUMMY_EVENT_KEY`].
    pub mode: Mode,
}

/// Sends batches of [`Event`]s to the server (spec §4.8).
///
/// One instance is shared by `Client::send` and, through the
/// [`EventDispatch`] impl below, by every function run's `step.sendEvent`.
pub struct EventSender {
    http: reqwest::Client,
    config: EventSenderConfig,
    middleware: Arc<MiddlewareStack>,
}

impl EventSender {
    /// Build a sender from an HTTP client, its fixed configuration, and the
    /// middleware stack whose `transformSendEvent`/`wrapSendEvent` hooks run
    /// on every batch.
    #[must_use]
    pub fn new(http: reqwest::Client, config: EventSenderConfig, middleware: Arc<MiddlewareStack>) -> Self {
        Self { http, config, middleware }
    }

    /// Send a batch using the configured environment.
    ///
    /// # Errors
    ///
    /// See [`EventSender::send_with_env`].
    pub async fn send(&self, events: Vec<Event>) -> Result<SendEventOutcome, DsdkError> {
        self.send_with_env(events, None).await
    }

    /// Send a batch, optionally overriding the configured environment for
    /// this call only (spec §4.8 step 2c: "explicit send option > client
    /// option > env var > platform env" — the env var/platform-env tiers are
    /// folded into `config.environment` at client construction, since this
    /// crate has no other way to read them).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::SendNoEventKey`] in cloud mode with no event key
    /// configured, or [`ErrorCode::SendRejected`] if the server rejects the
    /// batch or responds with a non-2xx status.
    pub async fn send_with_env(
        &self,
        events: Vec<Event>,
        env_override: Option<&str>,
    ) -> Result<SendEventOutcome, DsdkError> {
        if events.is_empty() {
            return Ok(SendEventOutcome { ids: Vec::new() });
        }

        let events = self.middleware.transform_send_event(events).await?;
        self.send_raw(events, env_override).await
    }

    /// Send a batch that has already passed through `transformSendEvent`,
    /// skipping that hook. `step.sendEvent` calls it this way: the execution
    /// engine runs `transformSendEvent` itself (spec §4.4 step "wrapStep"
    /// onion then `transformSendEvent`) before handing events to the
    /// [`EventDispatch`] impl below, so running it again here would apply it
    /// twice. `send`/`send_with_env` are the entry points that haven't
    /// transformed yet and call this after doing so.
    ///
    /// # Errors
    ///
    /// Same as [`EventSender::send_with_env`].
    pub async fn send_raw(
        &self,
        events: Vec<Event>,
        env_override: Option<&str>,
    ) -> Result<SendEventOutcome, DsdkError> {
        if events.is_empty() {
            return Ok(SendEventOutcome { ids: Vec::new() });
        }

        let ctx = SendEventContext { events };
        let event_key = self.resolve_event_key()?;
        let environment = env_override
            .map(str::to_string)
            .or_else(|| self.config.environment.clone());
        let http = self.http.clone();
        let url = format!("{}/e/{event_key}", self.config.event_base.trim_end_matches('/'));
        let events_for_send = ctx.events.clone();

        self.middleware
            .run_wrap_send_event(ctx, move || Box::pin(Self::run_send(http, url, environment, events_for_send)))
            .await
    }

    /// Resolve the event key per spec §4.8 step 3.
    fn resolve_event_key(&self) -> Result<String, DsdkError> {
        match &self.config.event_key {
            Some(key) => Ok(key.clone()),
            None if self.config.mode.is_dev => Ok(DEV_DUMMY_EVENT_KEY.to_string()),
            None => Err(DsdkError::new(ErrorCode::SendNoEventKey, "Failed to send event")),
        }
    }

    /// The actual HTTP dispatch: normalise, seed idempotency, POST, parse
    /// (spec §4.8 step 2a-d). A static fn, not a method, so it can be boxed
    /// as the terminal of the `wrapSendEvent` onion without borrowing `self`.
    async fn run_send(
        http: reqwest::Client,
        url: String,
        environment: Option<String>,
        mut events: Vec<Event>,
    ) -> Result<SendEventOutcome, DsdkError> {
        let now = Utc::now();
        for event in &mut events {
            event.normalize(now);
        }

        let mut request = http
            .post(&url)
            .header("content-type", "application/json")
            .header(SDK_HEADER, format!("{}:{}", dsdk_core::SDK_NAME, dsdk_core::SDK_VERSION))
            .json(&events);

        if let Some(env) = environment {
            request = request.header(ENV_HEADER, env);
        }

        if events.iter().all(|e| e.id.is_none()) {
            request = request.header(EVENT_ID_SEED_HEADER, uuid::Uuid::new_v4().to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|err| DsdkError::new(ErrorCode::SendRejected, format!("event send failed: {err}")))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|err| DsdkError::new(ErrorCode::SendRejected, format!("failed to read event response: {err}")))?;

        if status.is_success() {
            let body: SendResponseBody = serde_json::from_str(&body_text).map_err(|err| {
                DsdkError::new(ErrorCode::SendRejected, format!("malformed event response: {err}"))
            })?;
            if let Some(error) = body.error {
                tracing::warn!(error, "event batch rejected despite 2xx status");
                return Err(DsdkError::new(ErrorCode::SendRejected, error));
            }
            tracing::debug!(count = body.ids.len(), "event batch sent");
            return Ok(SendEventOutcome { ids: body.ids });
        }

        let message = serde_json::from_str::<SendResponseBody>(&body_text)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| {
                if status.is_client_error() {
                    "Cannot process event payload".to_string()
                } else {
                    status.to_string()
                }
            });
        tracing::warn!(status = status.as_u16(), message, "event send failed");
        Err(DsdkError::new(ErrorCode::SendRejected, message).with_context("status", status.as_u16()))
    }
}

#[async_trait]
impl EventDispatch for EventSender {
    /// Dispatches `events` as already-transformed (see [`EventSender::send_raw`]):
    /// the only caller of this trait is `step.sendEvent`, which runs
    /// `transformSendEvent` itself before reaching here.
    async fn dispatch(&self, events: Vec<Event>) -> Result<Vec<String>, DsdkError> {
        let outcome = self.send_raw(events, None).await?;
        Ok(outcome.ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdk_middleware::MiddlewareStack;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender(event_base: String, event_key: Option<String>, mode: Mode) -> EventSender {
        EventSender::new(
            reqwest::Client::new(),
            EventSenderConfig { event_base, event_key, environment: None, mode },
            Arc::new(MiddlewareStack::new(vec![], vec![])),
        )
    }

    #[tokio::test]
    async fn empty_batch_short_circuits_without_a_request() {
        let s = sender("http://localhost:0".into(), Some("key".into()), Mode::cloud());
        let outcome = s.send(vec![]).await.unwrap();
        assert!(outcome.ids.is_empty());
    }

    #[tokio::test]
    async fn cloud_mode_without_event_key_is_rejected() {
        let s = sender("http://localhost:0".into(), None, Mode::cloud());
        let err = s.send(vec![Event::new("a", serde_json::json!({}))]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SendNoEventKey);
    }

    #[tokio::test]
    async fn dev_mode_without_event_key_sends_with_dummy_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/e/{DEV_DUMMY_EVENT_KEY}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ids": ["evt-1"]})))
            .mount(&mock_server)
            .await;

        let s = sender(mock_server.uri(), None, Mode::dev(None));
        let outcome = s.send(vec![Event::new("a", serde_json::json!({}))]).await.unwrap();
        assert_eq!(outcome.ids, vec!["evt-1".to_string()]);
    }

    #[tokio::test]
    async fn seeds_idempotency_header_when_no_ids_supplied() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists(EVENT_ID_SEED_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ids": ["evt-1"]})))
            .mount(&mock_server)
            .await;

        let s = sender(mock_server.uri(), Some("key".into()), Mode::cloud());
        s.send(vec![Event::new("a", serde_json::json!({}))]).await.unwrap();
    }

    #[tokio::test]
    async fn does_not_seed_idempotency_header_when_id_supplied() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ids": ["evt-1"]})))
            .mount(&mock_server)
            .await;

        let mut event = Event::new("a", serde_json::json!({}));
        event.id = Some("custom-id".into());
        let s = sender(mock_server.uri(), Some("key".into()), Mode::cloud());
        let outcome = s.send(vec![event]).await.unwrap();
        assert_eq!(outcome.ids, vec!["evt-1".to_string()]);
    }

    #[tokio::test]
    async fn success_response_with_error_field_still_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ids": [], "error": "rejected"})))
            .mount(&mock_server)
            .await;

        let s = sender(mock_server.uri(), Some("key".into()), Mode::cloud());
        let err = s.send(vec![Event::new("a", serde_json::json!({}))]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SendRejected);
        assert_eq!(err.message, "rejected");
    }

    #[tokio::test]
    async fn non_2xx_with_unparseable_body_uses_generic_4xx_message() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let s = sender(mock_server.uri(), Some("key".into()), Mode::cloud());
        let err = s.send(vec![Event::new("a", serde_json::json!({}))]).await.unwrap_err();
        assert_eq!(err.message, "Cannot process event payload");
    }

    #[tokio::test]
    async fn non_2xx_5xx_with_unparseable_body_uses_status_text() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&mock_server)
            .await;

        let s = sender(mock_server.uri(), Some("key".into()), Mode::cloud());
        let err = s.send(vec![Event::new("a", serde_json::json!({}))]).await.unwrap_err();
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn dispatch_trait_returns_ids_only() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ids": ["evt-1", "evt-2"]})))
            .mount(&mock_server)
            .await;

        let s = sender(mock_server.uri(), Some("key".into()), Mode::cloud());
        let ids = s
            .dispatch(vec![
                Event::new("a", serde_json::json!({})),
                Event::new("b", serde_json::json!({})),
            ])
            .await
            .unwrap();
        assert_eq!(ids, vec!["evt-1".to_string(), "evt-2".to_string()]);
    }
}
