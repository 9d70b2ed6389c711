// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The public facade over this workspace's durable-execution SDK crates.
//!
//! This crate re-exports everything an application needs to define and
//! serve functions without naming `dsdk-client`, `dsdk-function`,
//! `dsdk-comm`, or `dsdk-connect` individually:
//!
//! - [`Client`]/[`ClientOptions`]: configuration, the function registry, and
//!   `send` (C6).
//! - [`FunctionBuilder`]/[`FunctionDefinition`]: defining a function (C10).
//! - [`CommHandler`]/[`CommResponse`]: serving calls over inbound HTTP (C7).
//! - [`ConnectHandle`]: serving calls over an outbound WebSocket (C9).
//! - [`Event`]: the payload type `send` and triggers deal in.
//! - [`DsdkError`]/[`StepFailure`]: the error types handler code returns.

pub use dsdk_client::{Client, ClientOptions, DEFAULT_CLOUD_API_URL, DEFAULT_CLOUD_EVENT_URL, DEFAULT_DEV_URL};
pub use dsdk_comm::{CommHandler, CommResponse};
pub use dsdk_connect::{
    BackoffConfig, ConnectHandle, ConnectionState, ExternalState, GatewayMessage, HandshakeResponse,
    WorkerMessage,
};
pub use dsdk_core::{
    default_logger, BatchConfig, CancelOn, ConcurrencyConfig, Debounce, Event, FunctionConfig,
    FunctionTrigger, HttpMethod, InMemoryBody, LogLevel, Logger, Mode, Priority, RateLimit,
    RequestBody, RequestInfo, RunContext, SharedLogger, TracingLogger, Throttle, SDK_NAME,
    SDK_VERSION,
};
pub use dsdk_engine::Handler;
pub use dsdk_error::{DsdkError, ErrorCategory, ErrorCode, StepError, StepFailure};
pub use dsdk_event::EventSender;
pub use dsdk_function::{FunctionBuilder, FunctionDefinition};
pub use dsdk_middleware::{
    FunctionInput, FunctionOutcome, Middleware, MiddlewareFactory, MiddlewareStack, RequestContext,
    RequestOutcome, SendEventContext, SendEventOutcome, StepContext, StepHandlerContext, StepOutcome,
};
pub use dsdk_ops::{MemoizedStep, OutgoingOp, StepKind};
pub use dsdk_step::{Group, StepTools};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn echo_handler() -> Handler {
        Arc::new(|ctx| {
            Box::pin(async move {
                let value: serde_json::Value =
                    ctx.step.run("echo", || async move { Ok(ctx.event.data.clone()) }).await?;
                Ok(value)
            })
        })
    }

    #[tokio::test]
    async fn facade_wires_a_function_through_the_comm_handler() {
        let client = Arc::new(Client::new(ClientOptions::new("app-a")));
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
            std::collections::BTreeMap::new(),
            raw_body.to_string().into_bytes(),
        );
        let response = handler.handle(&request).await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn connect_still_fails_fast_through_the_facade_without_registered_functions() {
        let client = Arc::new(Client::new(ClientOptions {
            signing_key: Some("signkey-prod-abc".into()),
            ..ClientOptions::new("app-a")
        }));
        let err = ConnectHandle::connect(client).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigEmptyAppsList);
    }
}
