//! End-to-end exchange tests over an in-memory duplex stream.
//!
//! | Scenario | Expectation |
//! |----------|-------------|
//! | `ping` request | exactly one `{id:1, result:"pong"}` frame |
//! | notification | handled, zero frames |
//! | malformed frames | skipped, later frames still answered |
//! | handler failure | error-shaped reply with the request id |
//! | slow id 1, fast id 2 | both answered once, fast one first |

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;

use stdio_exchange::EndpointState;

use super::test_helpers::{launch, wait_closed, ScriptedHandler, STEP_TIMEOUT};

#[tokio::test]
async fn ping_yields_exactly_one_pong_frame() {
    let (endpoint, mut peer, _cancel) = launch(Arc::new(ScriptedHandler::default()), None);

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], json!(1));
    assert_eq!(reply["result"], json!("pong"));
    assert!(reply.get("error").is_none());

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}

#[tokio::test]
async fn notification_is_handled_without_any_frame() {
    let handler = Arc::new(ScriptedHandler::default());
    let (endpoint, mut peer, _cancel) = launch(handler.clone(), None);

    peer.send(json!({"method": "log", "params": {"level": "info", "text": "hi"}}))
        .await;
    tokio::time::timeout(STEP_TIMEOUT, handler.notified.notified())
        .await
        .expect("notification was never handled");
    assert_eq!(handler.notifications.load(Ordering::SeqCst), 1);

    // The first frame the peer sees answers the request, not the notification.
    peer.send(json!({"id": 2, "method": "ping"})).await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], json!(2));

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}

#[tokio::test]
async fn declined_request_produces_no_frame() {
    let (endpoint, mut peer, _cancel) = launch(Arc::new(ScriptedHandler::default()), None);

    peer.send(json!({"id": 1, "method": "quiet"})).await;
    peer.send(json!({"id": 2, "method": "ping"})).await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], json!(2));

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}

#[tokio::test]
async fn malformed_frames_do_not_stop_the_read_loop() {
    let (endpoint, mut peer, _cancel) = launch(Arc::new(ScriptedHandler::default()), None);

    peer.send_bytes(b"\xff\xfe\n").await;
    peer.send_line("this is not json").await;
    peer.send_line("{\"id\": 9}").await;
    peer.send_line("").await;
    peer.send(json!({"id": 3, "method": "ping"})).await;

    let reply = peer.recv().await;
    assert_eq!(reply["id"], json!(3));
    assert_eq!(reply["result"], json!("pong"));
    assert_eq!(endpoint.state(), EndpointState::Running);

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}

#[tokio::test]
async fn handler_failure_is_surfaced_as_error_reply() {
    let (endpoint, mut peer, _cancel) = launch(Arc::new(ScriptedHandler::default()), None);

    peer.send(json!({"id": "req-7", "method": "fail"})).await;
    let reply = peer.recv().await;
    assert_eq!(reply["id"], json!("req-7"));
    assert_eq!(reply["error"]["code"], json!(-32000));
    assert_eq!(reply["error"]["message"], json!("boom"));
    assert!(reply.get("result").is_none());

    // The session survives the failure.
    peer.send(json!({"id": "req-8", "method": "ping"})).await;
    assert_eq!(peer.recv().await["id"], json!("req-8"));

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}

#[tokio::test]
async fn unsolicited_response_from_peer_is_dropped() {
    let (endpoint, mut peer, _cancel) = launch(Arc::new(ScriptedHandler::default()), None);

    peer.send(json!({"id": 41, "result": {"ok": true}})).await;
    peer.send(json!({"id": 42, "method": "ping"})).await;
    assert_eq!(peer.recv().await["id"], json!(42));

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}

#[tokio::test]
async fn slow_request_does_not_hold_back_fast_one() {
    let (endpoint, mut peer, _cancel) = launch(Arc::new(ScriptedHandler::default()), None);

    peer.send(json!({"id": 1, "method": "sleep", "params": {"ms": 500}}))
        .await;
    peer.send(json!({"id": 2, "method": "ping"})).await;

    let first = peer.recv().await;
    let second = peer.recv().await;
    assert_eq!(first["id"], json!(2), "read loop must not wait on the slow handler");
    assert_eq!(second["id"], json!(1));
    assert_eq!(second["result"], json!({"ms": 500}));

    let ids: HashSet<String> = [&first, &second]
        .iter()
        .map(|frame| frame["id"].to_string())
        .collect();
    assert_eq!(ids.len(), 2);

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}

#[tokio::test]
async fn many_concurrent_replies_never_interleave() {
    let (endpoint, mut peer, _cancel) = launch(Arc::new(ScriptedHandler::default()), None);

    for id in 0..50 {
        peer.send(json!({"id": id, "method": "sleep", "params": {"ms": (id % 5) * 10}}))
            .await;
    }

    let mut seen = HashSet::new();
    for _ in 0..50 {
        let frame = peer.recv().await;
        let id = frame["id"].as_i64().unwrap();
        assert!(seen.insert(id), "id {id} answered twice");
        assert_eq!(frame["result"]["ms"], json!((id % 5) * 10));
    }
    assert_eq!(seen.len(), 50);

    peer.close().await;
    peer.expect_eof().await;
    wait_closed(&endpoint).await;
}
