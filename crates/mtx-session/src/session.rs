// SPDX-License-Identifier: MIT OR Apache-2.0
//! The reliability session: capability handshake, retry loop, deduplication,
//! concurrency control, and per-call lifecycle tracking around an underlying
//! session.

use mtx_core::{
    ConfigError, ErrorCode, MessageStatus, RequestMeta, RequestTracker, ResponseMeta, RetryPolicy,
    SessionConfig, TxError, TxResult, sanitize_error_message,
};
use mtx_dedup::DedupCache;
use mtx_transport::BaseSession;
use mtx_transport::wire::{
    EXTENSION_KEY, InitializeOptions, InitializeResult, Request, extension_advertisement,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Hard bounds on the per-call timeout override, in milliseconds.
const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=600_000;

// ── Call options ────────────────────────────────────────────────────

/// Per-call overrides; session defaults apply where a field is `None`.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deduplication key for this call.
    pub idempotency_key: Option<String>,
    /// Per-attempt timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retry policy override.
    pub retry_policy: Option<RetryPolicy>,
}

impl CallOptions {
    /// Options carrying only an idempotency key.
    #[must_use]
    pub fn idempotency_key(key: impl Into<String>) -> Self {
        Self {
            idempotency_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Set the per-attempt timeout override.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the retry policy override.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

// ── Validation errors ───────────────────────────────────────────────

/// Programmer-facing validation errors, raised before any underlying call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// The tool name is empty or whitespace.
    #[error("tool name must be a non-empty string")]
    EmptyToolName,

    /// The tool name contains a forbidden character.
    #[error("tool name '{name}' may contain only alphanumerics, hyphens, and underscores")]
    InvalidToolName {
        /// The rejected name.
        name: String,
    },

    /// The arguments value is not a JSON object.
    #[error("tool arguments must be an object or absent")]
    InvalidArguments,

    /// An idempotency key was supplied but is blank.
    #[error("idempotency key must be non-empty if provided")]
    EmptyIdempotencyKey,

    /// The timeout override is outside the permitted range.
    #[error("timeout must be between 1 and 600000 ms, got {timeout_ms}")]
    InvalidTimeout {
        /// The rejected value.
        timeout_ms: u64,
    },
}

// ── Session ─────────────────────────────────────────────────────────

/// Reliability session wrapping an underlying [`BaseSession`].
///
/// Provides at-least-once delivery with at-most-once effect for tool calls:
/// automatic retry with exponential backoff, idempotency-keyed
/// deduplication, a concurrency gate, per-attempt timeouts, and lifecycle
/// tracking. Fully backward compatible: a peer that never negotiated the
/// `mcp_tx` extension sees plain `tools/call` requests.
pub struct McpTxSession {
    inner: Arc<dyn BaseSession>,
    config: SessionConfig,
    extension_enabled: AtomicBool,
    peer_experimental: Mutex<Map<String, Value>>,
    active: Mutex<HashMap<String, RequestTracker>>,
    dedup: Mutex<DedupCache>,
    gate: Semaphore,
    closed: AtomicBool,
}

impl McpTxSession {
    /// Wrap `inner` with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a configuration value is outside its
    /// permitted range.
    pub fn new(inner: Arc<dyn BaseSession>, config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            target: "mtx.session",
            max_concurrent = config.max_concurrent_requests,
            default_timeout_ms = config.default_timeout_ms,
            dedup_window_ms = config.deduplication_window_ms,
            "session created"
        );
        Ok(Self {
            inner,
            gate: Semaphore::new(config.max_concurrent_requests),
            dedup: Mutex::new(DedupCache::new(config.deduplication_window())),
            config,
            extension_enabled: AtomicBool::new(false),
            peer_experimental: Mutex::new(Map::new()),
            active: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Perform the capability handshake.
    ///
    /// Adds the `mcp_tx` advertisement under `capabilities.experimental`,
    /// forwards the options to the underlying session, and records whether
    /// the peer negotiated the extension. A peer without an `experimental`
    /// map (or with an empty one) leaves the session fully functional but
    /// metadata-free.
    ///
    /// # Errors
    ///
    /// Propagates any error from the underlying session's handshake.
    pub async fn initialize(
        &self,
        mut options: InitializeOptions,
    ) -> anyhow::Result<InitializeResult> {
        options
            .capabilities
            .experimental
            .insert(EXTENSION_KEY.to_string(), extension_advertisement());

        debug!(target: "mtx.session", "initializing underlying session with mcp_tx capabilities");
        let result = self.inner.initialize(options).await?;

        let supported = result
            .capabilities
            .as_ref()
            .is_some_and(|caps| caps.supports_extension());
        if let Some(experimental) = result
            .capabilities
            .as_ref()
            .and_then(|caps| caps.experimental.as_ref())
        {
            *self
                .peer_experimental
                .lock()
                .expect("peer capability lock poisoned") = experimental.clone();
        }
        self.extension_enabled.store(supported, Ordering::SeqCst);

        if supported {
            info!(target: "mtx.session", "mcp_tx enabled - peer supports reliability features");
        } else {
            info!(target: "mtx.session", "mcp_tx disabled - peer does not support the extension");
        }
        Ok(result)
    }

    /// Call a tool with reliability guarantees.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] when input validation fails; no request is
    /// sent in that case. Operational failures (exhausted retries,
    /// non-retryable peer errors, timeouts) are reported inside the returned
    /// [`TxResult`] with `ack = false`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        options: CallOptions,
    ) -> Result<TxResult, CallError> {
        let arguments = validate_call_inputs(name, arguments, &options)?;

        let retry_policy = options
            .retry_policy
            .unwrap_or_else(|| self.config.retry_policy.clone());
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let idempotency_key = options.idempotency_key;

        // Dedup hits are cheap and never occupy a concurrency slot.
        if let Some(key) = idempotency_key.as_deref() {
            let cached = self.dedup.lock().expect("dedup lock poisoned").lookup(key);
            if let Some(hit) = cached {
                debug!(target: "mtx.session", key, "returning cached result for idempotency key");
                return Ok(hit);
            }
        }

        let _permit = self.gate.acquire().await.expect("concurrency gate closed");
        Ok(self
            .call_with_retry(name, arguments, idempotency_key, timeout_ms, retry_policy)
            .await)
    }

    /// The attempt loop. Runs inside the concurrency gate.
    async fn call_with_retry(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        idempotency_key: Option<String>,
        timeout_ms: u64,
        retry_policy: RetryPolicy,
    ) -> TxResult {
        let mut meta = RequestMeta::new(idempotency_key.clone(), timeout_ms);
        let request_id = meta.request_id.clone();

        {
            let mut active = self.active.lock().expect("active request lock poisoned");
            active.insert(
                request_id.clone(),
                RequestTracker::new(request_id.clone(), meta.transaction_id.clone()),
            );
        }
        // Removes the tracker on every exit path, including drop.
        let _tracker_guard = TrackerGuard {
            active: &self.active,
            request_id: request_id.clone(),
        };

        let mut last_error: Option<anyhow::Error> = None;
        let mut attempts_made = 0;

        for attempt in 0..retry_policy.max_attempts {
            attempts_made = attempt + 1;
            meta.retry_count = attempt;
            self.with_tracker(&request_id, |tracker| {
                tracker.attempts = attempt + 1;
                tracker.update_status(MessageStatus::Sent, None);
            });

            debug!(
                target: "mtx.session",
                tool = name,
                attempt = attempt + 1,
                max_attempts = retry_policy.max_attempts,
                "attempting tool call"
            );

            match self.execute_attempt(name, &arguments, &meta, timeout_ms).await {
                Ok(value) => {
                    self.with_tracker(&request_id, |tracker| {
                        tracker.update_status(MessageStatus::Acknowledged, None);
                    });

                    let result = TxResult {
                        result: Some(value),
                        meta: ResponseMeta::completed(attempt + 1),
                    };
                    if let Some(key) = &idempotency_key {
                        self.dedup
                            .lock()
                            .expect("dedup lock poisoned")
                            .store(key.clone(), result.clone());
                    }
                    return result;
                }
                Err(err) => {
                    let sanitized = sanitize_error_message(&err.to_string());
                    let status = if is_timeout(&err) {
                        MessageStatus::Timeout
                    } else {
                        MessageStatus::Failed
                    };
                    self.with_tracker(&request_id, |tracker| {
                        tracker.update_status(status, Some(sanitized));
                    });

                    warn!(
                        target: "mtx.session",
                        tool = name,
                        attempt = attempt + 1,
                        max_attempts = retry_policy.max_attempts,
                        error = %err,
                        "tool call attempt failed"
                    );

                    let more_attempts = attempt + 1 < retry_policy.max_attempts;
                    if more_attempts && mtx_retry::should_retry(&retry_policy, &err) {
                        let delay = mtx_retry::compute_delay(&retry_policy, attempt);
                        debug!(
                            target: "mtx.session",
                            delay_ms = delay.as_millis() as u64,
                            "retryable error, backing off"
                        );
                        last_error = Some(err);
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if more_attempts {
                        debug!(target: "mtx.session", error = %err, "error not retryable, giving up");
                    }
                    last_error = Some(err);
                    break;
                }
            }
        }

        let (error_code, error_message) = match &last_error {
            Some(err) => (
                err.downcast_ref::<TxError>()
                    .map_or(ErrorCode::Unknown, |tx| tx.code)
                    .as_str()
                    .to_string(),
                sanitize_error_message(&err.to_string()),
            ),
            None => (
                ErrorCode::Unknown.as_str().to_string(),
                "Unknown error".to_string(),
            ),
        };

        let result = TxResult {
            result: None,
            meta: ResponseMeta::failed(attempts_made, error_code, error_message),
        };
        if let Some(key) = idempotency_key {
            self.dedup
                .lock()
                .expect("dedup lock poisoned")
                .store(key, result.clone());
        }
        result
    }

    /// One attempt: build the request (with metadata only when the peer
    /// negotiated the extension), bound the send by the per-attempt timeout,
    /// and classify transport failures.
    async fn execute_attempt(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        meta: &RequestMeta,
        timeout_ms: u64,
    ) -> anyhow::Result<Value> {
        let request = if self.extension_enabled() {
            Request::tool_call_with_meta(name, arguments.clone(), meta.clone())
        } else {
            Request::tool_call(name, arguments.clone())
        };

        let send = self.inner.send_request(request);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), send).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let lowered = err.to_string().to_lowercase();
                if lowered.contains("connection") || lowered.contains("network") {
                    Err(anyhow::Error::new(TxError::network(
                        format!("network error during tool call: {err}"),
                        Some(err.to_string()),
                    )))
                } else {
                    Err(err)
                }
            }
            Err(_) => Err(anyhow::Error::new(TxError::timeout(
                format!("tool call timeout after {timeout_ms}ms"),
                timeout_ms,
            ))),
        }
    }

    fn with_tracker(&self, request_id: &str, f: impl FnOnce(&mut RequestTracker)) {
        let mut active = self.active.lock().expect("active request lock poisoned");
        if let Some(tracker) = active.get_mut(request_id) {
            f(tracker);
        }
    }

    /// Whether the peer negotiated the `mcp_tx` extension and the session
    /// has it enabled.
    #[must_use]
    pub fn extension_enabled(&self) -> bool {
        self.config.enabled && self.extension_enabled.load(Ordering::SeqCst)
    }

    /// Snapshot of the currently in-flight request trackers.
    #[must_use]
    pub fn active_requests(&self) -> HashMap<String, RequestTracker> {
        self.active
            .lock()
            .expect("active request lock poisoned")
            .clone()
    }

    /// The peer's experimental capability map as reported at handshake.
    #[must_use]
    pub fn peer_experimental(&self) -> Map<String, Value> {
        self.peer_experimental
            .lock()
            .expect("peer capability lock poisoned")
            .clone()
    }

    /// Number of entries currently held by the deduplication cache.
    #[must_use]
    pub fn dedup_entries(&self) -> usize {
        self.dedup.lock().expect("dedup lock poisoned").len()
    }

    /// The session's configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Close the session.
    ///
    /// Grants in-flight work a short grace period, closes the underlying
    /// session, and empties the active-request map and the deduplication
    /// cache. Idempotent; repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Propagates an error from the underlying session's `close`; local
    /// state is cleared regardless.
    pub async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(target: "mtx.session", "closing session");

        let in_flight = self
            .active
            .lock()
            .expect("active request lock poisoned")
            .len();
        if in_flight > 0 {
            info!(target: "mtx.session", in_flight, "waiting for in-flight calls to complete");
            tokio::time::sleep(self.config.shutdown_grace).await;
        }

        let closed = self.inner.close().await;

        self.active
            .lock()
            .expect("active request lock poisoned")
            .clear();
        self.dedup.lock().expect("dedup lock poisoned").clear();

        info!(target: "mtx.session", "session closed");
        closed
    }
}

impl std::fmt::Debug for McpTxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpTxSession")
            .field("extension_enabled", &self.extension_enabled())
            .field("in_flight", &self.active_requests().len())
            .field("dedup_entries", &self.dedup_entries())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Validate call inputs, normalizing absent arguments to an empty object.
fn validate_call_inputs(
    name: &str,
    arguments: Option<Value>,
    options: &CallOptions,
) -> Result<Map<String, Value>, CallError> {
    if name.trim().is_empty() {
        return Err(CallError::EmptyToolName);
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CallError::InvalidToolName { name: name.into() });
    }

    let arguments = match arguments {
        None => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(CallError::InvalidArguments),
    };

    if let Some(key) = options.idempotency_key.as_deref() {
        if key.trim().is_empty() {
            return Err(CallError::EmptyIdempotencyKey);
        }
    }

    if let Some(timeout_ms) = options.timeout_ms {
        if !TIMEOUT_RANGE_MS.contains(&timeout_ms) {
            return Err(CallError::InvalidTimeout { timeout_ms });
        }
    }

    Ok(arguments)
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TxError>()
        .is_some_and(|tx| tx.code == ErrorCode::Timeout)
}

/// Removes a tracker from the active map when dropped, so every exit path
/// (success, failure, panic, caller cancellation) cleans up.
struct TrackerGuard<'a> {
    active: &'a Mutex<HashMap<String, RequestTracker>>,
    request_id: String,
}

impl Drop for TrackerGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.request_id);
        }
    }
}
