//! Sandbox runtime operations: init, execute with callback, validate.

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weft::sandbox::SandboxRuntime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn init_then_execute_returns_target_closure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/echo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"echoed": true})))
        .mount(&server)
        .await;

    let runtime = SandboxRuntime::new();
    let yaml = format!(
        r#"
metadata: {{name: sbx, targetActionId: call}}
resources:
  - metadata: {{actionId: call}}
    run:
      http:
        url: '{uri}/echo'
        method: POST
        data:
          n: "{{{{input.n}}}}"
"#,
        uri = server.uri()
    );
    runtime.init(&yaml, None).await.unwrap();

    let result = runtime.execute(r#"{"n": 3}"#, None).await.unwrap();
    assert_eq!(result["call"]["statusCode"], 200);
    assert_eq!(result["call"]["data"]["echoed"], true);

    // The engine saw the bare payload wrapped as POST / with typed body
    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent, json!({"n": 3}));
}

#[tokio::test]
async fn execute_invokes_the_callback_before_returning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pong": true})))
        .mount(&server)
        .await;

    let runtime = SandboxRuntime::new();
    let yaml = format!(
        r"
metadata: {{name: cb, targetActionId: ping}}
resources:
  - metadata: {{actionId: ping}}
    run: {{http: {{url: '{uri}/ping'}}}}
",
        uri = server.uri()
    );
    runtime.init(&yaml, None).await.unwrap();

    let called = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&called);
    let result = runtime
        .execute(
            "{}",
            Some(Box::new(move |message| {
                assert_eq!(message["type"], "result");
                assert_eq!(message["data"]["ping"]["statusCode"], 200);
                seen.store(true, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();

    assert!(called.load(Ordering::SeqCst), "callback never invoked");
    assert_eq!(result["ping"]["statusCode"], 200);
}

#[tokio::test]
async fn marked_input_supplies_the_full_request_context() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/headers"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let runtime = SandboxRuntime::new();
    let yaml = format!(
        r#"
metadata: {{name: req, targetActionId: fwd}}
resources:
  - metadata: {{actionId: fwd}}
    run:
      http:
        url: '{uri}/headers'
        headers:
          X-Relay: "{{{{request.headers['X-Trace']}}}}"
"#,
        uri = server.uri()
    );
    runtime.init(&yaml, None).await.unwrap();

    runtime
        .execute(
            r#"{"__request": true, "method": "GET", "path": "/in", "headers": {"X-Trace": "t-1"}, "body": null}"#,
            None,
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let relayed = requests[0].headers.get("x-relay").unwrap();
    assert_eq!(relayed.to_str().unwrap(), "t-1");
}

#[tokio::test]
async fn validate_reports_disallowed_kinds_with_action_ids() {
    let runtime = SandboxRuntime::new();
    let report = runtime
        .validate(
            r"
metadata: {name: p8, targetActionId: fetch}
resources:
  - metadata: {actionId: fetch}
    run: {http: {url: 'http://example.com'}}
  - metadata: {actionId: shell-step}
    run: {exec: {command: 'rm -rf /tmp/x'}}
  - metadata: {actionId: llm}
    run: {chat: {backend: ollama, model: llama3, prompt: hi}}
",
        )
        .await;

    assert!(!report.valid);
    assert_eq!(report.errors.len(), 2);
    assert!(report
        .errors
        .iter()
        .any(|e| e == "resource 'shell-step': exec is not supported in WASM builds"));
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("resource 'llm'") && e.contains("ollama")));
}

#[tokio::test]
async fn validate_passes_clean_remote_workflows() {
    let runtime = SandboxRuntime::new();
    let report = runtime
        .validate(
            r"
metadata: {name: clean, targetActionId: q}
resources:
  - metadata: {actionId: q}
    run:
      sql:
        driver: sqlite
        dsn: 'sqlite::memory:'
        query: 'SELECT 1'
",
        )
        .await;
    assert!(report.valid, "unexpected errors: {:?}", report.errors);
    assert!(report.errors.is_empty());
}
