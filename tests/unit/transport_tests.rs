//! Unit tests for frame parsing and the stdio transport.
//!
//! Covers:
//! - blank, malformed and shape-less frames
//! - oversized and non-UTF-8 frames are dropped without ending the read loop
//! - concurrent sends never interleave on the wire
//! - `close` on a transport that never started releases waiters

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stdio_exchange::models::message::MessageKind;
use stdio_exchange::transport::reader::{parse_frame, ReadExit};
use stdio_exchange::transport::StdioTransport;
use stdio_exchange::{AppError, Message, RequestId};

const STEP: Duration = Duration::from_secs(5);

// ── parse_frame ─────────────────────────────────────────

#[test]
fn whitespace_frame_is_skipped() {
    assert!(parse_frame("   \t").unwrap().is_none());
}

#[test]
fn request_frame_parses() {
    let message = parse_frame(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#)
        .unwrap()
        .expect("message");
    assert_eq!(message.kind(), Some(MessageKind::Request));
    assert_eq!(message.id, Some(RequestId::from("a")));
}

#[test]
fn malformed_json_is_a_decode_error() {
    let err = parse_frame("{not json").unwrap_err();
    assert!(matches!(err, AppError::Decode(ref m) if m.starts_with("malformed json")));
}

#[test]
fn object_without_method_or_outcome_is_a_decode_error() {
    let err = parse_frame(r#"{"id": 4}"#).unwrap_err();
    assert!(matches!(err, AppError::Decode(ref m) if m.starts_with("invalid message")));
}

// ── StdioTransport ──────────────────────────────────────

#[tokio::test]
async fn oversized_frame_is_dropped_and_next_frame_delivered() {
    let (mut peer, local) = tokio::io::duplex(8 * 1024);
    let (read, write) = tokio::io::split(local);
    let transport = StdioTransport::new("unit", read, write, 128);
    let (tx, mut rx) = mpsc::channel(8);
    let handle = transport.start(tx, &CancellationToken::new()).unwrap();

    let huge = format!("{{\"method\":\"x\",\"params\":\"{}\"}}\n", "y".repeat(1024));
    peer.write_all(huge.as_bytes()).await.unwrap();
    peer.write_all(b"{\"id\":1,\"method\":\"ping\"}\n").await.unwrap();

    let message = tokio::time::timeout(STEP, rx.recv()).await.unwrap().unwrap();
    assert_eq!(message.id, Some(RequestId::Number(1)));

    peer.shutdown().await.unwrap();
    let exit = tokio::time::timeout(STEP, handle).await.unwrap().unwrap();
    assert_eq!(exit, ReadExit::Eof);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn non_utf8_frame_is_dropped_and_loop_keeps_reading() {
    let (mut peer, local) = tokio::io::duplex(8 * 1024);
    let (read, write) = tokio::io::split(local);
    let transport = StdioTransport::new("unit", read, write, 1024);
    let (tx, mut rx) = mpsc::channel(8);
    let handle = transport.start(tx, &CancellationToken::new()).unwrap();

    peer.write_all(b"\xff\xfe garbage\n").await.unwrap();
    peer.write_all(b"{\"id\":1,\"method\":\"ping\"}\n").await.unwrap();

    let message = tokio::time::timeout(STEP, rx.recv()).await.unwrap().unwrap();
    assert_eq!(message.id, Some(RequestId::Number(1)));
    assert!(!transport.is_terminated());

    peer.shutdown().await.unwrap();
    let exit = tokio::time::timeout(STEP, handle).await.unwrap().unwrap();
    assert_eq!(exit, ReadExit::Eof);
}

#[tokio::test]
async fn concurrent_sends_never_interleave() {
    let (peer, local) = tokio::io::duplex(256 * 1024);
    let (read, write) = tokio::io::split(local);
    let transport = Arc::new(StdioTransport::new("unit", read, write, 1024));

    let senders: Vec<_> = (0..32_i64)
        .map(|id| {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let payload = json!({"blob": "z".repeat(2048), "id": id});
                transport
                    .send(&Message::reply(RequestId::Number(id), payload))
                    .await
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap().unwrap();
    }
    transport.close().await;

    let mut lines = BufReader::new(peer).lines();
    let mut count = 0;
    while let Some(line) = tokio::time::timeout(STEP, lines.next_line())
        .await
        .unwrap()
        .unwrap()
    {
        let frame: Value = serde_json::from_str(&line).expect("whole frame per line");
        assert_eq!(frame["id"], frame["result"]["id"]);
        count += 1;
    }
    assert_eq!(count, 32);
}

#[tokio::test]
async fn close_before_start_releases_waiters_and_blocks_start() {
    let (_peer, local) = tokio::io::duplex(1024);
    let (read, write) = tokio::io::split(local);
    let transport = StdioTransport::new("unit", read, write, 1024);

    transport.close().await;
    transport.close().await;
    tokio::time::timeout(STEP, transport.wait()).await.unwrap();
    assert!(transport.is_terminated());
    assert!(transport.is_closed());

    let (tx, _rx) = mpsc::channel(1);
    assert!(matches!(
        transport.start(tx, &CancellationToken::new()),
        Err(AppError::Start(_))
    ));
}

#[tokio::test]
async fn outer_cancellation_stops_read_loop() {
    let (_peer, local) = tokio::io::duplex(1024);
    let (read, write) = tokio::io::split(local);
    let transport = StdioTransport::new("unit", read, write, 1024);
    let (tx, _rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let handle = transport.start(tx, &cancel).unwrap();

    cancel.cancel();
    let exit = tokio::time::timeout(STEP, handle).await.unwrap().unwrap();
    assert_eq!(exit, ReadExit::Cancelled);
    tokio::time::timeout(STEP, transport.wait()).await.unwrap();
}
