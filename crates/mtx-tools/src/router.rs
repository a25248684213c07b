// SPDX-License-Identifier: MIT OR Apache-2.0
//! The invoke-by-name facade.
//!
//! A [`ToolRouter`] owns a reliability session and a [`ToolRegistry`]. Tools
//! are registered once with per-tool defaults; `invoke` looks the tool up,
//! derives an idempotency key when the tool asks for one, and routes the
//! call through the session with the tool's retry policy and timeout.

use crate::local::LocalSession;
use crate::registry::{KeyFn, RegistryError, ToolEntry, ToolHandler, ToolInfo, ToolRegistry};
use mtx_core::{ConfigError, RetryPolicy, SessionConfig, TxResult};
use mtx_session::{BaseSession, CallError, CallOptions, InitializeOptions, McpTxSession};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Errors surfaced by [`ToolRouter`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The tool name is empty or whitespace.
    #[error("tool name must be a non-empty string")]
    EmptyToolName,

    /// `invoke` was called before `initialize`.
    #[error("router '{name}' not initialized; call initialize() or use scoped()")]
    NotInitialized {
        /// The router's name.
        name: String,
    },

    /// The tool is not registered.
    #[error("tool '{name}' not registered; available tools: {available:?}")]
    UnknownTool {
        /// The requested name.
        name: String,
        /// Every registered name, sorted.
        available: Vec<String>,
    },

    /// A registration failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A session-level validation failure.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Facade wrapping a reliability session with a tool registry.
pub struct ToolRouter {
    name: String,
    session: McpTxSession,
    registry: Arc<RwLock<ToolRegistry>>,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl ToolRouter {
    /// Wrap `transport` with a reliability session and an empty registry.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration is out of range.
    pub fn new(
        transport: Arc<dyn BaseSession>,
        config: SessionConfig,
        name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let session = McpTxSession::new(transport, config)?;
        info!(target: "mtx.router", router = %name, "created tool router");
        Ok(Self {
            name,
            session,
            registry: Arc::new(RwLock::new(ToolRegistry::new())),
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// A router whose registered handlers are the execution transport.
    ///
    /// Calls still flow through the full reliability pipeline (metadata,
    /// retry, dedup, concurrency gate); execution happens in-process via
    /// [`LocalSession`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration is out of range.
    pub fn local(config: SessionConfig, name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let registry = Arc::new(RwLock::new(ToolRegistry::new()));
        let transport = Arc::new(LocalSession::new(Arc::clone(&registry)));
        let session = McpTxSession::new(transport, config)?;
        info!(target: "mtx.router", router = %name, "created local tool router");
        Ok(Self {
            name,
            session,
            registry,
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The router's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped reliability session.
    #[must_use]
    pub fn session(&self) -> &McpTxSession {
        &self.session
    }

    /// Whether `initialize` has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Start registering a tool under `name`.
    #[must_use]
    pub fn tool(&self, name: impl Into<String>) -> ToolBuilder<'_> {
        ToolBuilder {
            router: self,
            name: name.into(),
            retry_policy: None,
            key_fn: None,
            timeout_ms: None,
            description: None,
        }
    }

    /// Initialize the session exactly once.
    ///
    /// Double-checked: the fast path returns without taking the lock once a
    /// prior call completed; concurrent initializers serialize on the lock
    /// and re-check before handshaking, so the peer sees exactly one
    /// handshake.
    ///
    /// # Errors
    ///
    /// Propagates a handshake failure; a later call may retry.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.session.initialize(InitializeOptions::default()).await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!(target: "mtx.router", router = %self.name, "initialized");
        Ok(())
    }

    /// Invoke a registered tool with reliability guarantees.
    ///
    /// Merges the tool's defaults with the call: an explicit
    /// `idempotency_key` wins over the tool's key generator; the tool's
    /// retry policy and timeout apply unless the session defaults are all
    /// there is.
    ///
    /// # Errors
    ///
    /// Validation failures (bad name, non-object arguments, unregistered
    /// tool, use before initialization) are returned as [`RouterError`];
    /// operational failures ride inside the returned [`TxResult`].
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Option<Value>,
        idempotency_key: Option<String>,
    ) -> Result<TxResult, RouterError> {
        if name.trim().is_empty() {
            return Err(RouterError::EmptyToolName);
        }
        let arguments = match arguments {
            None => Value::Object(serde_json::Map::new()),
            Some(value @ Value::Object(_)) => value,
            Some(_) => return Err(CallError::InvalidArguments.into()),
        };

        if !self.is_initialized() {
            return Err(RouterError::NotInitialized {
                name: self.name.clone(),
            });
        }

        let entry = {
            let registry = self.registry.read().expect("registry lock poisoned");
            match registry.get(name) {
                Some(entry) => entry,
                None => {
                    return Err(RouterError::UnknownTool {
                        name: name.to_string(),
                        available: registry.list(),
                    });
                }
            }
        };

        let idempotency_key = self.resolve_key(name, idempotency_key, &entry, &arguments);

        let options = CallOptions {
            idempotency_key,
            timeout_ms: entry.timeout_ms,
            retry_policy: entry.retry_policy,
        };
        Ok(self.session.call_tool(name, Some(arguments), options).await?)
    }

    /// Explicit key wins; otherwise run the tool's generator. A failing
    /// generator must not fail the call.
    fn resolve_key(
        &self,
        tool: &str,
        explicit: Option<String>,
        entry: &ToolEntry,
        arguments: &Value,
    ) -> Option<String> {
        if explicit.is_some() {
            return explicit;
        }
        let key_fn = entry.key_fn.as_ref()?;
        match key_fn(arguments) {
            Ok(key) => Some(key),
            Err(error) => {
                warn!(
                    target: "mtx.router",
                    tool,
                    error = %error,
                    "idempotency key generator failed; proceeding without a key"
                );
                None
            }
        }
    }

    /// Sorted names of every registered tool.
    #[must_use]
    pub fn list_tools(&self) -> Vec<String> {
        self.registry.read().expect("registry lock poisoned").list()
    }

    /// Introspection projection for one tool.
    #[must_use]
    pub fn tool_info(&self, name: &str) -> Option<ToolInfo> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .info(name)
    }

    /// Introspection projections for every tool.
    #[must_use]
    pub fn all_tool_info(&self) -> BTreeMap<String, ToolInfo> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .info_all()
    }

    /// Close the wrapped session. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates an error from the underlying transport's `close`.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.session.close().await
    }

    /// Run `f` inside the router's lifetime: initialize first, close on
    /// every exit path.
    ///
    /// # Errors
    ///
    /// Returns the initialization error, `f`'s error, or (only when `f`
    /// succeeded) the close error.
    pub async fn scoped<'a, T, F, Fut>(&'a self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + 'a,
    {
        self.initialize().await?;
        let outcome = f(self).await;
        let closed = self.close().await;
        match outcome {
            Ok(value) => {
                closed?;
                Ok(value)
            }
            Err(error) => {
                if let Err(close_error) = closed {
                    warn!(
                        target: "mtx.router",
                        router = %self.name,
                        error = %close_error,
                        "close failed while unwinding"
                    );
                }
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .field("tools", &self.list_tools().len())
            .finish()
    }
}

// ── Registration builder ────────────────────────────────────────────

/// Builder returned by [`ToolRouter::tool`].
///
/// Finish with [`register`](Self::register) for a synchronous handler or
/// [`register_async`](Self::register_async) for an asynchronous one.
#[must_use = "a tool builder does nothing until register() is called"]
pub struct ToolBuilder<'a> {
    router: &'a ToolRouter,
    name: String,
    retry_policy: Option<RetryPolicy>,
    key_fn: Option<KeyFn>,
    timeout_ms: Option<u64>,
    description: Option<String>,
}

impl ToolBuilder<'_> {
    /// Retry policy applied to every invocation of this tool.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Per-attempt timeout applied to every invocation of this tool.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Description surfaced through introspection.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Derive an idempotency key from the call arguments when the caller
    /// supplies none.
    pub fn idempotency_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }

    /// Register a synchronous handler.
    ///
    /// # Errors
    ///
    /// Fails when the registry is full or the name is taken.
    pub fn register<F>(self, f: F) -> Result<(), RegistryError>
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.finish(ToolHandler::sync(f))
    }

    /// Register an asynchronous handler.
    ///
    /// # Errors
    ///
    /// Fails when the registry is full or the name is taken.
    pub fn register_async<F, Fut>(self, f: F) -> Result<(), RegistryError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.finish(ToolHandler::async_fn(f))
    }

    fn finish(self, handler: ToolHandler) -> Result<(), RegistryError> {
        let entry = ToolEntry {
            handler,
            retry_policy: self.retry_policy,
            key_fn: self.key_fn,
            timeout_ms: self.timeout_ms,
            description: self.description,
        };
        self.router
            .registry
            .write()
            .expect("registry lock poisoned")
            .register(self.name, entry)
    }
}
