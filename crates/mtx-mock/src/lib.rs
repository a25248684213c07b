// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! mtx-mock
#![deny(unsafe_code)]
#![warn(missing_docs)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use mtx_core::TxError;
use mtx_transport::BaseSession;
use mtx_transport::wire::{InitializeOptions, InitializeResult, PeerCapabilities, Request};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted reply for a `send_request` call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond successfully with this value.
    Ok(Value),
    /// Fail with a plain error carrying this message.
    Error(String),
    /// Fail with a taxonomy error.
    Tx(TxError),
    /// Sleep, then respond successfully with this value.
    Delayed(Duration, Value),
    /// Never respond within any reasonable per-attempt timeout.
    Hang,
}

/// Scriptable mock transport.
///
/// Replies are consumed FIFO from the script; once the script is empty the
/// default reply answers everything. All counters and records are behind
/// interior mutability so the mock can be shared as `Arc<MockSession>`.
#[derive(Debug)]
pub struct MockSession {
    capabilities: Option<PeerCapabilities>,
    script: Mutex<VecDeque<Reply>>,
    default_reply: Mutex<Reply>,
    latency: Mutex<Option<Duration>>,
    initialize_calls: AtomicUsize,
    send_calls: AtomicUsize,
    close_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<Value>>,
    initialize_options: Mutex<Vec<Value>>,
}

impl MockSession {
    /// A mock whose peer advertises the `mcp_tx` extension.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capabilities(Some(PeerCapabilities::with_extension()))
    }

    /// A mock whose peer reports capabilities without an `experimental` map.
    #[must_use]
    pub fn without_extension() -> Self {
        Self::with_capabilities(Some(PeerCapabilities::default()))
    }

    /// A mock whose peer reports an empty `experimental` map.
    #[must_use]
    pub fn with_empty_experimental() -> Self {
        Self::with_capabilities(Some(PeerCapabilities::empty_experimental()))
    }

    /// A mock whose peer reports no capability object at all.
    #[must_use]
    pub fn without_capabilities() -> Self {
        Self::with_capabilities(None)
    }

    fn with_capabilities(capabilities: Option<PeerCapabilities>) -> Self {
        Self {
            capabilities,
            script: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(Reply::Ok(json!({"ok": true}))),
            latency: Mutex::new(None),
            initialize_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            initialize_options: Mutex::new(Vec::new()),
        }
    }

    /// Queue a scripted reply.
    pub fn push(&self, reply: Reply) {
        self.script.lock().expect("script lock").push_back(reply);
    }

    /// Queue a successful reply.
    pub fn push_ok(&self, value: Value) {
        self.push(Reply::Ok(value));
    }

    /// Queue a plain error reply.
    pub fn push_error(&self, message: impl Into<String>) {
        self.push(Reply::Error(message.into()));
    }

    /// Queue a taxonomy error reply.
    pub fn push_tx(&self, error: TxError) {
        self.push(Reply::Tx(error));
    }

    /// Replace the reply used once the script is exhausted.
    pub fn set_default_reply(&self, reply: Reply) {
        *self.default_reply.lock().expect("default reply lock") = reply;
    }

    /// Add artificial latency to every `send_request`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("latency lock") = Some(latency);
    }

    /// How many times `initialize` was called.
    #[must_use]
    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// How many times `send_request` was called.
    #[must_use]
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// High-water mark of concurrently in-flight `send_request` calls.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Serialized copies of every request seen, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("request log lock").clone()
    }

    /// Serialized copies of every `initialize` options payload seen.
    #[must_use]
    pub fn initialize_options(&self) -> Vec<Value> {
        self.initialize_options
            .lock()
            .expect("initialize log lock")
            .clone()
    }

    fn next_reply(&self) -> Reply {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.default_reply.lock().expect("default reply lock").clone())
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter even when the send future is dropped
/// mid-way (for example by a per-attempt timeout).
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BaseSession for MockSession {
    async fn initialize(&self, options: InitializeOptions) -> Result<InitializeResult> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.initialize_options
            .lock()
            .expect("initialize log lock")
            .push(serde_json::to_value(&options)?);
        Ok(InitializeResult {
            capabilities: self.capabilities.clone(),
        })
    }

    async fn send_request(&self, request: Request) -> Result<Value> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("request log lock")
            .push(serde_json::to_value(&request)?);

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let latency = *self.latency.lock().expect("latency lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match self.next_reply() {
            Reply::Ok(value) => Ok(value),
            Reply::Error(message) => Err(anyhow!(message)),
            Reply::Tx(error) => Err(anyhow::Error::new(error)),
            Reply::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(anyhow!("hang reply elapsed"))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
