//! Session lifecycle against a real HTTP server.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use vizstream_core::DebugState;
use vizstream_core::SessionController;
use vizstream_core::SessionPhase;
use vizstream_core::SessionSnapshot;
use vizstream_core::VizConfig;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn sse(frames: &[serde_json::Value]) -> String {
    frames.iter().map(|frame| format!("data: {frame}\n\n")).collect()
}

fn config_for(server: &MockServer) -> VizConfig {
    VizConfig {
        base_url: server.uri(),
        ..VizConfig::default()
    }
}

async fn run_to_end(controller: &SessionController) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), controller.wait_for_terminal())
        .await
        .expect("session did not finish")
}

#[tokio::test]
async fn completes_with_full_state() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"stage": "classification", "payload": {"type": "graph"}}),
        json!({"stage": "graph_start", "payload": null}),
        json!({"stage": "graph_step", "payload": {"node": "a"}}),
        json!({"stage": "graph_step", "payload": {"node": "b"}}),
        json!({"stage": "issues", "payload": [{"line": 3}]}),
        json!({"stage": "explanation", "payload": "Breadth-first search."}),
        json!({"stage": "done", "payload": null}),
    ]);
    Mock::given(method("POST"))
        .and(path("/debug/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut controller = SessionController::from_config(&config_for(&server)).unwrap();
    controller.start_debug_session("bfs(graph)", "");
    let snapshot = run_to_end(&controller).await;

    assert_eq!(snapshot.phase, SessionPhase::Completed);
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.events, 7);
    let state = snapshot.state;
    assert_eq!(state.classification, Some(json!({"type": "graph"})));
    assert_eq!(
        state.graph.unwrap().steps,
        vec![json!({"node": "a"}), json!({"node": "b"})]
    );
    assert_eq!(state.issues, Some(json!([{"line": 3}])));
    assert_eq!(state.explanation, Some(json!("Breadth-first search.")));
}

#[tokio::test]
async fn backend_error_status_fails_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string(r#"{"detail": "no code"}"#))
        .mount(&server)
        .await;

    let mut controller = SessionController::from_config(&config_for(&server)).unwrap();
    controller.start_debug_session("", "");
    let snapshot = run_to_end(&controller).await;

    assert_eq!(snapshot.phase, SessionPhase::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("Backend error (422): no code"));
    assert_eq!(snapshot.state, DebugState::default());
}

#[tokio::test]
async fn stream_end_without_done_completes() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"stage": "dp_start", "payload": null}),
        json!({"stage": "dp_step", "payload": {"table": {"0": 1, "2": 3, "1": 2}}}),
    ]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut controller = SessionController::from_config(&config_for(&server)).unwrap();
    controller.start_debug_session("fib(3)", "");
    let snapshot = run_to_end(&controller).await;

    assert_eq!(snapshot.phase, SessionPhase::Completed);
    assert!(!snapshot.state.is_complete());
    let table = snapshot.state.dp.unwrap().table.unwrap();
    assert_eq!(table.indices(), &[0, 1, 2]);
    assert_eq!(table.values(), &[json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn restart_replaces_previous_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({"code": "slow()", "input": ""})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    sse(&[json!({"stage": "classification", "payload": "slow"})]),
                    "text/event-stream",
                )
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!({"code": "fast()", "input": ""})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                json!({"stage": "classification", "payload": "fast"}),
                json!({"stage": "done", "payload": null}),
            ]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let mut controller = SessionController::from_config(&config_for(&server)).unwrap();
    let first = controller.start_debug_session("slow()", "");
    let second = controller.start_debug_session("fast()", "");
    assert!(second > first);

    let snapshot = run_to_end(&controller).await;
    assert_eq!(snapshot.session_id, second);
    assert_eq!(snapshot.state.classification, Some(json!("fast")));

    // The first request may still be in flight; it must never surface.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.snapshot().session_id, second);
    assert_eq!(controller.snapshot().state.classification, Some(json!("fast")));
}
