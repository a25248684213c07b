// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request/response metadata, the result wrapper, and the lifecycle tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version string advertised in outbound metadata and the capability handshake.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ── Request metadata ────────────────────────────────────────────────

/// Reliability metadata attached to every outbound tool call when the peer
/// supports the `mcp_tx` extension.
///
/// Absent optional fields are omitted from the serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Extension version, currently [`PROTOCOL_VERSION`].
    pub version: String,
    /// Unique id for this attempt-group (one per `call`, stable across retries).
    pub request_id: String,
    /// Transaction id, carried through unchanged when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Caller-supplied deduplication key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Whether the caller expects an acknowledgement.
    pub expect_ack: bool,
    /// Zero-indexed attempt number of the current attempt.
    pub retry_count: u32,
    /// Effective per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// UTC time of metadata construction.
    pub timestamp: DateTime<Utc>,
    /// Opaque correlation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl RequestMeta {
    /// Build metadata for a new call with a fresh `request_id`.
    #[must_use]
    pub fn new(idempotency_key: Option<String>, timeout_ms: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            transaction_id: None,
            idempotency_key,
            expect_ack: true,
            retry_count: 0,
            timeout_ms,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }
}

// ── Response metadata ───────────────────────────────────────────────

/// Terminal status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// The returning attempt produced a successful peer response.
    Completed,
    /// The call exhausted its attempts or hit a non-retryable error.
    Failed,
}

/// Reliability metadata returned alongside every call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// `true` iff the attempt completed with a successful peer response.
    pub ack: bool,
    /// `true` iff the peer executed the tool to completion.
    pub processed: bool,
    /// `true` iff the result came from the deduplication cache.
    pub duplicate: bool,
    /// Total attempts made, at least 1.
    pub attempts: u32,
    /// Terminal status of the call.
    pub final_status: FinalStatus,
    /// Stable error code; present only when `ack` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Sanitized error message; present only when `ack` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResponseMeta {
    /// Metadata for a successful call that took `attempts` attempts.
    #[must_use]
    pub fn completed(attempts: u32) -> Self {
        Self {
            ack: true,
            processed: true,
            duplicate: false,
            attempts,
            final_status: FinalStatus::Completed,
            error_code: None,
            error_message: None,
        }
    }

    /// Metadata for a failed call.
    #[must_use]
    pub fn failed(attempts: u32, error_code: String, error_message: String) -> Self {
        Self {
            ack: false,
            processed: false,
            duplicate: false,
            attempts,
            final_status: FinalStatus::Failed,
            error_code: Some(error_code),
            error_message: Some(error_message),
        }
    }
}

// ── Result wrapper ──────────────────────────────────────────────────

/// Result wrapper pairing the peer's tool result with reliability metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    /// The peer's response, `None` when the call failed.
    pub result: Option<Value>,
    /// Reliability metadata for the call.
    pub meta: ResponseMeta,
}

impl TxResult {
    /// Whether the request was acknowledged.
    #[must_use]
    pub fn ack(&self) -> bool {
        self.meta.ack
    }

    /// Whether the tool was actually executed.
    #[must_use]
    pub fn processed(&self) -> bool {
        self.meta.processed
    }

    /// Terminal status of the call.
    #[must_use]
    pub fn final_status(&self) -> FinalStatus {
        self.meta.final_status
    }

    /// Number of attempts made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.meta.attempts
    }
}

// ── Lifecycle tracking ──────────────────────────────────────────────

/// Status of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created, nothing sent yet.
    Pending,
    /// An attempt's send is in flight.
    Sent,
    /// The peer responded successfully; terminal.
    Acknowledged,
    /// An attempt failed; may loop back to `Sent` on retry.
    Failed,
    /// An attempt timed out; surfaced as a `Failed` with a timeout code.
    Timeout,
}

/// In-memory record of a call's lifecycle, kept while the call is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTracker {
    /// The call's `request_id`.
    pub request_id: String,
    /// Transaction id when one is being carried.
    pub transaction_id: Option<String>,
    /// Current status.
    pub status: MessageStatus,
    /// When the tracker was created.
    pub created_at: DateTime<Utc>,
    /// When the tracker last changed.
    pub updated_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempts: u32,
    /// Sanitized message of the most recent failure.
    pub last_error: Option<String>,
}

impl RequestTracker {
    /// Create a tracker in [`MessageStatus::Pending`].
    #[must_use]
    pub fn new(request_id: String, transaction_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            transaction_id,
            status: MessageStatus::Pending,
            created_at: now,
            updated_at: now,
            attempts: 0,
            last_error: None,
        }
    }

    /// Transition to `status`, refreshing `updated_at` and recording `error`
    /// when one is given.
    pub fn update_status(&mut self, status: MessageStatus, error: Option<String>) {
        self.status = status;
        self.updated_at = Utc::now();
        if let Some(error) = error {
            self.last_error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_meta_defaults() {
        let meta = RequestMeta::new(Some("k".into()), 5000);
        assert_eq!(meta.version, PROTOCOL_VERSION);
        assert!(meta.expect_ack);
        assert_eq!(meta.retry_count, 0);
        assert_eq!(meta.timeout_ms, 5000);
        assert_eq!(meta.idempotency_key.as_deref(), Some("k"));
        assert!(!meta.request_id.is_empty());
    }

    #[test]
    fn request_meta_ids_are_unique() {
        let a = RequestMeta::new(None, 1000);
        let b = RequestMeta::new(None, 1000);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn request_meta_omits_absent_fields() {
        let meta = RequestMeta::new(None, 1000);
        let value = serde_json::to_value(&meta).expect("serialize");
        let obj = value.as_object().expect("object");
        assert!(!obj.contains_key("transaction_id"));
        assert!(!obj.contains_key("idempotency_key"));
        assert!(!obj.contains_key("correlation_id"));
        assert!(obj.contains_key("request_id"));
        assert_eq!(obj["version"], json!("0.1.0"));
    }

    #[test]
    fn response_meta_completed_has_no_error_fields() {
        let meta = ResponseMeta::completed(2);
        assert!(meta.ack);
        assert!(meta.processed);
        assert_eq!(meta.attempts, 2);
        assert!(meta.error_code.is_none());
        assert!(meta.error_message.is_none());

        let value = serde_json::to_value(&meta).expect("serialize");
        let obj = value.as_object().expect("object");
        assert!(!obj.contains_key("error_code"));
        assert!(!obj.contains_key("error_message"));
        assert_eq!(obj["final_status"], json!("completed"));
    }

    #[test]
    fn response_meta_failed_serializes_error_fields() {
        let meta = ResponseMeta::failed(3, "MCP_TX_TIMEOUT".into(), "timed out".into());
        let value = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(value["final_status"], json!("failed"));
        assert_eq!(value["error_code"], json!("MCP_TX_TIMEOUT"));
        assert_eq!(value["attempts"], json!(3));
    }

    #[test]
    fn message_status_serde_strings() {
        for (status, expected) in [
            (MessageStatus::Pending, "\"pending\""),
            (MessageStatus::Sent, "\"sent\""),
            (MessageStatus::Acknowledged, "\"acknowledged\""),
            (MessageStatus::Failed, "\"failed\""),
            (MessageStatus::Timeout, "\"timeout\""),
        ] {
            assert_eq!(serde_json::to_string(&status).expect("serialize"), expected);
        }
    }

    #[test]
    fn tx_result_accessors_mirror_meta() {
        let result = TxResult {
            result: Some(json!({"ok": 1})),
            meta: ResponseMeta::completed(1),
        };
        assert!(result.ack());
        assert!(result.processed());
        assert_eq!(result.attempts(), 1);
        assert_eq!(result.final_status(), FinalStatus::Completed);
    }

    #[test]
    fn tracker_update_keeps_last_error() {
        let mut tracker = RequestTracker::new("req-1".into(), None);
        assert_eq!(tracker.status, MessageStatus::Pending);

        tracker.update_status(MessageStatus::Sent, None);
        assert_eq!(tracker.status, MessageStatus::Sent);
        assert!(tracker.last_error.is_none());

        tracker.update_status(MessageStatus::Failed, Some("boom".into()));
        assert_eq!(tracker.last_error.as_deref(), Some("boom"));

        // A later transition without an error must not clear the last one.
        tracker.update_status(MessageStatus::Sent, None);
        assert_eq!(tracker.last_error.as_deref(), Some("boom"));
    }
}
