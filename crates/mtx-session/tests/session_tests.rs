// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for [`McpTxSession`]: handshake, retry, deduplication,
//! timeouts, validation, and shutdown.
//!
//! Timing-sensitive tests run on a paused clock so backoff sleeps and
//! per-attempt timeouts resolve instantly and deterministically.

use mtx_core::{RetryPolicy, SessionConfig, TxError};
use mtx_mock::{MockSession, Reply};
use mtx_session::{CallError, CallOptions, InitializeOptions, McpTxSession};
use serde_json::json;
use std::sync::Arc;

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 100,
        max_delay_ms: 1000,
        backoff_multiplier: 2.0,
        jitter: false,
        ..RetryPolicy::default()
    }
}

fn fast_config(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        retry_policy: fast_policy(max_attempts),
        ..SessionConfig::default()
    }
}

async fn initialized_session(mock: &Arc<MockSession>, config: SessionConfig) -> McpTxSession {
    let transport: Arc<dyn mtx_session::BaseSession> = Arc::clone(mock) as Arc<dyn mtx_session::BaseSession>;
    let session = McpTxSession::new(transport, config).expect("config");
    session
        .initialize(InitializeOptions::default())
        .await
        .expect("handshake");
    session
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn happy_path_single_attempt() {
    let mock = Arc::new(MockSession::new());
    mock.set_default_reply(Reply::Ok(json!({"ok": 1})));
    let session = initialized_session(&mock, fast_config(3)).await;

    let started = tokio::time::Instant::now();
    let result = session
        .call_tool("echo", None, CallOptions::default())
        .await
        .expect("call");

    assert!(result.ack());
    assert!(result.processed());
    assert!(!result.meta.duplicate);
    assert_eq!(result.attempts(), 1);
    assert_eq!(result.meta.final_status, mtx_core::FinalStatus::Completed);
    assert_eq!(result.result, Some(json!({"ok": 1})));
    assert_eq!(mock.send_calls(), 1);
    assert_eq!(started.elapsed(), std::time::Duration::ZERO, "no backoff on success");
}

// ---------------------------------------------------------------------------
// Retry behavior
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn retries_then_succeeds() {
    let mock = Arc::new(MockSession::new());
    mock.push_error("Network error");
    mock.push_error("Network error");
    mock.push_ok(json!({"done": true}));
    let session = initialized_session(&mock, fast_config(3)).await;

    let started = tokio::time::Instant::now();
    let result = session
        .call_tool("flaky", None, CallOptions::default())
        .await
        .expect("call");

    assert!(result.ack());
    assert_eq!(result.attempts(), 3);
    assert_eq!(mock.send_calls(), 3);
    // Two backoffs with jitter disabled: 100ms + 200ms.
    assert!(started.elapsed() >= std::time::Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_return_failure() {
    let mock = Arc::new(MockSession::new());
    mock.set_default_reply(Reply::Error("Network error".into()));
    let session = initialized_session(&mock, fast_config(2)).await;

    let result = session
        .call_tool("doomed", None, CallOptions::default())
        .await
        .expect("call");

    assert!(!result.ack());
    assert!(!result.processed());
    assert!(!result.meta.duplicate);
    assert_eq!(result.attempts(), 2);
    assert_eq!(result.meta.final_status, mtx_core::FinalStatus::Failed);
    assert_eq!(
        result.meta.error_code.as_deref(),
        Some("MCP_TX_NETWORK_ERROR"),
        "network-looking messages are wrapped as network errors"
    );
    let message = result.meta.error_message.expect("error message");
    assert!(!message.is_empty());
    assert!(message.chars().count() <= 200);
    assert_eq!(mock.send_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_stops_early() {
    let mock = Arc::new(MockSession::new());
    mock.set_default_reply(Reply::Error("invalid arguments".into()));
    let session = initialized_session(&mock, fast_config(3)).await;

    let started = tokio::time::Instant::now();
    let result = session
        .call_tool("strict", None, CallOptions::default())
        .await
        .expect("call");

    assert!(!result.ack());
    assert_eq!(result.attempts(), 1, "attempts reflect the failing attempt");
    assert_eq!(result.meta.error_code.as_deref(), Some("UNKNOWN_ERROR"));
    assert_eq!(mock.send_calls(), 1);
    assert_eq!(started.elapsed(), std::time::Duration::ZERO, "no backoff for terminal errors");
}

#[tokio::test(start_paused = true)]
async fn taxonomy_retryable_flag_is_honored() {
    let mock = Arc::new(MockSession::new());
    // Non-retryable by flag even though the message looks harmless.
    mock.push_tx(TxError::sequence("out of order", 1, 5));
    let session = initialized_session(&mock, fast_config(3)).await;

    let result = session
        .call_tool("ordered", None, CallOptions::default())
        .await
        .expect("call");

    assert!(!result.ack());
    assert_eq!(result.attempts(), 1);
    assert_eq!(
        result.meta.error_code.as_deref(),
        Some("MCP_TX_SEQUENCE_ERROR")
    );
    assert_eq!(mock.send_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn per_call_retry_policy_overrides_session_default() {
    let mock = Arc::new(MockSession::new());
    mock.set_default_reply(Reply::Error("Network error".into()));
    let session = initialized_session(&mock, fast_config(3)).await;

    let result = session
        .call_tool(
            "flaky",
            None,
            CallOptions::default().with_retry_policy(fast_policy(2)),
        )
        .await
        .expect("call");

    assert!(!result.ack());
    assert_eq!(result.attempts(), 2, "per-call policy, not the session's 3");
    assert_eq!(mock.send_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn single_attempt_policy_never_sleeps() {
    let mock = Arc::new(MockSession::new());
    mock.set_default_reply(Reply::Error("Network error".into()));
    let session = initialized_session(&mock, fast_config(1)).await;

    let started = tokio::time::Instant::now();
    let result = session
        .call_tool("once", None, CallOptions::default())
        .await
        .expect("call");

    assert!(!result.ack());
    assert_eq!(result.attempts(), 1);
    assert_eq!(started.elapsed(), std::time::Duration::ZERO);
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn slow_peer_times_out_and_retries() {
    let mock = Arc::new(MockSession::new());
    mock.set_default_reply(Reply::Hang);
    let session = initialized_session(&mock, fast_config(3)).await;

    let result = session
        .call_tool("sleepy", None, CallOptions::default().with_timeout_ms(1))
        .await
        .expect("call");

    assert!(!result.ack());
    assert_eq!(result.attempts(), 3, "timeouts are retryable");
    assert_eq!(result.meta.error_code.as_deref(), Some("MCP_TX_TIMEOUT"));
    assert_eq!(mock.send_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn per_call_timeout_overrides_default() {
    let mock = Arc::new(MockSession::new());
    mock.push(Reply::Delayed(
        std::time::Duration::from_millis(50),
        json!({"late": true}),
    ));
    let session = initialized_session(&mock, fast_config(1)).await;

    // 50ms of peer latency is fine under a 200ms budget.
    let result = session
        .call_tool("latent", None, CallOptions::default().with_timeout_ms(200))
        .await
        .expect("call");
    assert!(result.ack());
    assert_eq!(result.result, Some(json!({"late": true})));
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duplicate_key_returns_cached_result() {
    let mock = Arc::new(MockSession::new());
    mock.push_ok(json!({"written": 1}));
    let session = initialized_session(&mock, fast_config(3)).await;

    let first = session
        .call_tool(
            "write",
            Some(json!({"v": 1})),
            CallOptions::idempotency_key("K"),
        )
        .await
        .expect("first");
    assert!(!first.meta.duplicate);

    // Different arguments, same key: the peer is not consulted again.
    let second = session
        .call_tool(
            "write",
            Some(json!({"v": 2})),
            CallOptions::idempotency_key("K"),
        )
        .await
        .expect("second");

    assert!(second.meta.duplicate);
    assert_eq!(second.result, first.result);
    assert_eq!(second.attempts(), first.attempts(), "original attempts preserved");
    assert_eq!(second.meta.final_status, first.meta.final_status);
    assert_eq!(mock.send_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failures_are_cached_under_their_key() {
    let mock = Arc::new(MockSession::new());
    mock.set_default_reply(Reply::Error("Network error".into()));
    let session = initialized_session(&mock, fast_config(2)).await;

    let first = session
        .call_tool("write", None, CallOptions::idempotency_key("K"))
        .await
        .expect("first");
    assert!(!first.ack());
    assert_eq!(mock.send_calls(), 2);

    let second = session
        .call_tool("write", None, CallOptions::idempotency_key("K"))
        .await
        .expect("second");

    assert!(second.meta.duplicate, "failed results dedup too");
    assert!(!second.ack());
    assert_eq!(second.attempts(), 2);
    assert_eq!(mock.send_calls(), 2, "no fresh retry storm behind the key");
}

#[tokio::test(start_paused = true)]
async fn calls_without_keys_are_never_cached() {
    let mock = Arc::new(MockSession::new());
    let session = initialized_session(&mock, fast_config(3)).await;

    session
        .call_tool("echo", None, CallOptions::default())
        .await
        .expect("first");
    session
        .call_tool("echo", None, CallOptions::default())
        .await
        .expect("second");

    assert_eq!(mock.send_calls(), 2);
    assert_eq!(session.dedup_entries(), 0);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn validation_errors_precede_any_send() {
    let mock = Arc::new(MockSession::new());
    let session = initialized_session(&mock, fast_config(3)).await;
    let sends_before = mock.send_calls();

    let cases: Vec<CallError> = vec![
        session
            .call_tool("", None, CallOptions::default())
            .await
            .expect_err("empty name"),
        session
            .call_tool("bad@name", None, CallOptions::default())
            .await
            .expect_err("bad name"),
        session
            .call_tool("echo", Some(json!("not a map")), CallOptions::default())
            .await
            .expect_err("bad arguments"),
        session
            .call_tool("echo", None, CallOptions::default().with_timeout_ms(0))
            .await
            .expect_err("zero timeout"),
        session
            .call_tool("echo", None, CallOptions::default().with_timeout_ms(7_300_000))
            .await
            .expect_err("huge timeout"),
        session
            .call_tool("echo", None, CallOptions::idempotency_key(""))
            .await
            .expect_err("blank key"),
    ];

    assert!(matches!(cases[0], CallError::EmptyToolName));
    assert!(matches!(cases[1], CallError::InvalidToolName { .. }));
    assert!(matches!(cases[2], CallError::InvalidArguments));
    assert!(matches!(cases[3], CallError::InvalidTimeout { timeout_ms: 0 }));
    assert!(matches!(cases[4], CallError::InvalidTimeout { .. }));
    assert!(matches!(cases[5], CallError::EmptyIdempotencyKey));
    assert_eq!(mock.send_calls(), sends_before, "nothing reached the peer");
}

#[tokio::test]
async fn out_of_range_config_is_rejected() {
    let mock: Arc<dyn mtx_session::BaseSession> = Arc::new(MockSession::new());
    let mut config = SessionConfig::default();
    config.max_concurrent_requests = 0;
    let err = McpTxSession::new(mock, config).expect_err("invalid config");
    assert_eq!(err.field, "max_concurrent_requests");
}

// ---------------------------------------------------------------------------
// Handshake and wire shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_advertises_the_extension() {
    let mock = Arc::new(MockSession::new());
    let session = initialized_session(&mock, fast_config(3)).await;

    assert!(session.extension_enabled());
    assert_eq!(mock.initialize_calls(), 1);

    let sent = &mock.initialize_options()[0];
    assert_eq!(
        sent["capabilities"]["experimental"]["mcp_tx"],
        json!({"version": "0.1.0", "features": ["ack", "retry", "idempotency", "transactions"]})
    );
}

#[tokio::test]
async fn peers_without_the_extension_disable_metadata() {
    for mock in [
        Arc::new(MockSession::without_extension()),
        Arc::new(MockSession::with_empty_experimental()),
        Arc::new(MockSession::without_capabilities()),
    ] {
        let session = initialized_session(&mock, fast_config(3)).await;
        assert!(!session.extension_enabled());

        session
            .call_tool("echo", None, CallOptions::default())
            .await
            .expect("call still works");

        let request = &mock.requests()[0];
        assert!(
            request["params"].as_object().expect("params").get("_meta").is_none(),
            "no metadata without peer support"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn metadata_carries_monotonic_retry_count() {
    let mock = Arc::new(MockSession::new());
    mock.push_error("Network error");
    mock.push_ok(json!({}));
    let session = initialized_session(&mock, fast_config(3)).await;

    session
        .call_tool(
            "flaky",
            Some(json!({"a": 1})),
            CallOptions::idempotency_key("key-9"),
        )
        .await
        .expect("call");

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);

    let first = &requests[0]["params"]["_meta"]["mcp_tx"];
    let second = &requests[1]["params"]["_meta"]["mcp_tx"];
    assert_eq!(first["retry_count"], json!(0));
    assert_eq!(second["retry_count"], json!(1));
    assert_eq!(
        first["request_id"], second["request_id"],
        "one request id per attempt-group"
    );
    assert_eq!(first["idempotency_key"], json!("key-9"));
    assert_eq!(requests[0]["params"]["arguments"], json!({"a": 1}));
    assert_eq!(requests[0]["method"], json!("tools/call"));
}

// ---------------------------------------------------------------------------
// Lifecycle and shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn trackers_are_removed_after_every_call() {
    let mock = Arc::new(MockSession::new());
    mock.push_ok(json!({}));
    mock.push_error("terminal failure");
    let session = initialized_session(&mock, fast_config(1)).await;

    session
        .call_tool("ok", None, CallOptions::default())
        .await
        .expect("success");
    assert!(session.active_requests().is_empty());

    session
        .call_tool("bad", None, CallOptions::default())
        .await
        .expect("failure result");
    assert!(session.active_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn close_clears_state_and_is_idempotent() {
    let mock = Arc::new(MockSession::new());
    let session = initialized_session(&mock, fast_config(3)).await;

    session
        .call_tool("echo", None, CallOptions::idempotency_key("K"))
        .await
        .expect("call");
    assert_eq!(session.dedup_entries(), 1);

    session.close().await.expect("close");
    assert!(session.active_requests().is_empty());
    assert_eq!(session.dedup_entries(), 0);
    assert_eq!(mock.close_calls(), 1);

    session.close().await.expect("second close");
    assert_eq!(mock.close_calls(), 1, "close is idempotent");
}
