// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end call dispatch through [`dsdk_sdk::CommHandler`]: registration,
//! a multi-step handler that suspends once per fresh step across three HTTP
//! round trips, and the introspection/401 paths a real function-serving
//! endpoint must honor.

use std::collections::BTreeMap;
use std::sync::Arc;

use dsdk_sdk::{Client, ClientOptions, CommHandler, FunctionBuilder, FunctionTrigger, HttpMethod, RequestInfo};

fn buffered(method: HttpMethod, body: serde_json::Value) -> RequestInfo {
    RequestInfo::buffered(
        "http://localhost/api/inngest",
        method,
        BTreeMap::new(),
        body.to_string().into_bytes(),
    )
}

fn two_step_handler() -> dsdk_sdk::Handler {
    Arc::new(|ctx| {
        Box::pin(async move {
            let first: String = ctx.step.run("step-one", || async { Ok("first".to_string()) }).await?;
            let second: String = ctx
                .step
                .run("step-two", || async move { Ok(format!("{first}-second")) })
                .await?;
            Ok(serde_json::json!({ "result": second }))
        })
    })
}

#[tokio::test]
async fn multi_step_handler_suspends_once_per_fresh_step_then_completes() {
    let client = Arc::new(Client::new(ClientOptions::new("app-a")));
    let def = FunctionBuilder::new("fn-multi-step", FunctionTrigger::event("app/a"))
        .build(two_step_handler())
        .unwrap();
    client.register_function(def);
    let handler = CommHandler::new(client);

    // First request: no memoized steps. "step-one" is fresh, so the handler
    // records its op and suspends — even though the handler has more work
    // after it, the engine can't know that without running it, and a fresh
    // step always interrupts (see dsdk-engine's module docs).
    let first_request = buffered(
        HttpMethod::Post,
        serde_json::json!({
            "event": { "name": "app/a", "data": {} },
            "ctx": { "fn_id": "fn-multi-step", "run_id": "run-1", "attempt": 1 },
        }),
    );
    let first_response = handler.handle(&first_request).await;
    assert_eq!(first_response.status, 206);
    let first_body: serde_json::Value = serde_json::from_slice(&first_response.body).unwrap();
    assert_eq!(first_body[0]["op"], "Step");
    assert_eq!(first_body[0]["name"], "step-one");
    let step_one_id = first_body[0]["id"].as_str().unwrap().to_string();

    // Second request: "step-one" replays from memory, the handler proceeds
    // past it and reaches "step-two", which is fresh in turn and suspends.
    let second_request = buffered(
        HttpMethod::Post,
        serde_json::json!({
            "event": { "name": "app/a", "data": {} },
            "ctx": { "fn_id": "fn-multi-step", "run_id": "run-1", "attempt": 1 },
            "steps": { step_one_id.clone(): { "type": "data", "data": "first" } },
        }),
    );
    let second_response = handler.handle(&second_request).await;
    assert_eq!(second_response.status, 206);
    let second_body: serde_json::Value = serde_json::from_slice(&second_response.body).unwrap();
    assert_eq!(second_body[0]["op"], "Step");
    assert_eq!(second_body[0]["name"], "step-two");
    let step_two_id = second_body[0]["id"].as_str().unwrap().to_string();

    // Third request: both steps replay from memory, so the handler runs
    // through to the end without touching an unmemoized step and completes.
    let third_request = buffered(
        HttpMethod::Post,
        serde_json::json!({
            "event": { "name": "app/a", "data": {} },
            "ctx": { "fn_id": "fn-multi-step", "run_id": "run-1", "attempt": 1 },
            "steps": {
                step_one_id: { "type": "data", "data": "first" },
                step_two_id: { "type": "data", "data": "first-second" },
            },
        }),
    );
    let third_response = handler.handle(&third_request).await;
    assert_eq!(third_response.status, 200);
    let third_body: serde_json::Value = serde_json::from_slice(&third_response.body).unwrap();
    assert_eq!(third_body[0]["op"], "RunComplete");
    assert_eq!(third_body[0]["data"]["result"], "first-second");
}

#[tokio::test]
async fn get_introspects_registered_functions_with_fingerprint_in_cloud_mode() {
    let client = Arc::new(Client::new(ClientOptions {
        signing_key: Some("signkey-prod-abc".into()),
        ..ClientOptions::new("app-a")
    }));
    let def = FunctionBuilder::new("fn-a", FunctionTrigger::event("app/a"))
        .retries(5)
        .build(Arc::new(|_ctx| Box::pin(async { Ok(serde_json::json!(null)) })))
        .unwrap();
    client.register_function(def);
    let handler = CommHandler::new(client);

    let request = RequestInfo::buffered("http://localhost/api/inngest", HttpMethod::Get, BTreeMap::new(), vec![]);
    let response = handler.handle(&request).await;
    assert_eq!(response.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["mode"], "cloud");
    assert_eq!(body["functions"][0]["retries"], 5);
    assert!(body["signing_key_fingerprint"].is_string());
}

#[tokio::test]
async fn post_without_signature_in_cloud_mode_is_rejected_before_dispatch() {
    let client = Arc::new(Client::new(ClientOptions {
        signing_key: Some("signkey-prod-abc".into()),
        ..ClientOptions::new("app-a")
    }));
    let def = FunctionBuilder::new("fn-a", FunctionTrigger::event("app/a"))
        .build(Arc::new(|_ctx| Box::pin(async { Ok(serde_json::json!(null)) })))
        .unwrap();
    client.register_function(def);
    let handler = CommHandler::new(client);

    let request = buffered(
        HttpMethod::Post,
        serde_json::json!({
            "event": { "name": "app/a", "data": {} },
            "ctx": { "fn_id": "fn-a", "run_id": "run-1", "attempt": 1 },
        }),
    );
    let response = handler.handle(&request).await;
    assert_eq!(response.status, 401);
}
