// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tool storage: named entries with per-tool defaults, a size cap, and
//! tamper-proof copies on lookup.

use futures::FutureExt;
use futures::future::BoxFuture;
use mtx_core::RetryPolicy;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

/// Default cap on registered tools.
pub const DEFAULT_MAX_TOOLS: usize = 1000;

/// Derives an idempotency key from a call's arguments.
pub type KeyFn = Arc<dyn Fn(&Value) -> anyhow::Result<String> + Send + Sync>;

/// A registered handler, tagged by whether it is synchronous or
/// asynchronous in the host program. The session contract does not depend
/// on the tag; it only surfaces in introspection and local execution.
#[derive(Clone)]
pub enum ToolHandler {
    /// A synchronous handler.
    Sync(Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>),
    /// An asynchronous handler.
    Async(Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>),
}

impl ToolHandler {
    /// Wrap a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous function.
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::Async(Arc::new(move |arguments| f(arguments).boxed()))
    }

    /// Whether the handler is asynchronous.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Execute the handler with the given arguments.
    ///
    /// # Errors
    ///
    /// Propagates whatever the handler returns.
    pub async fn invoke(&self, arguments: Value) -> anyhow::Result<Value> {
        match self {
            Self::Sync(f) => f(arguments),
            Self::Async(f) => f(arguments).await,
        }
    }
}

impl std::fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("ToolHandler::Sync"),
            Self::Async(_) => f.write_str("ToolHandler::Async"),
        }
    }
}

/// One registered tool with its per-tool defaults.
#[derive(Clone)]
pub struct ToolEntry {
    /// The handler body.
    pub handler: ToolHandler,
    /// Retry policy applied when the caller does not override it.
    pub retry_policy: Option<RetryPolicy>,
    /// Idempotency-key generator applied when the caller supplies no key.
    pub key_fn: Option<KeyFn>,
    /// Per-attempt timeout applied when the caller does not override it.
    pub timeout_ms: Option<u64>,
    /// Human-readable description for introspection.
    pub description: Option<String>,
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("handler", &self.handler)
            .field("retry_policy", &self.retry_policy)
            .field("has_key_fn", &self.key_fn.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .field("description", &self.description)
            .finish()
    }
}

/// Introspection projection of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Description, when one was registered.
    pub description: Option<String>,
    /// Whether the handler is asynchronous.
    pub is_async: bool,
    /// Whether the tool carries its own retry policy.
    pub has_retry_policy: bool,
    /// Per-tool timeout, when one was registered.
    pub timeout_ms: Option<u64>,
}

/// Registration failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The registry reached its size cap.
    #[error("registry full: cannot register more than {max_tools} tools")]
    Full {
        /// The cap that was hit.
        max_tools: usize,
    },

    /// The name is already taken.
    #[error("tool '{name}' already registered")]
    Duplicate {
        /// The contested name.
        name: String,
    },
}

/// Registry of named tools.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
    max_tools: usize,
}

impl ToolRegistry {
    /// A registry capped at [`DEFAULT_MAX_TOOLS`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_TOOLS)
    }

    /// A registry capped at `max_tools`.
    #[must_use]
    pub fn with_capacity(max_tools: usize) -> Self {
        Self {
            tools: HashMap::new(),
            max_tools,
        }
    }

    /// Register a tool under `name`.
    ///
    /// # Errors
    ///
    /// Fails when the registry is full or the name is already present; the
    /// existing entry is never replaced.
    pub fn register(&mut self, name: impl Into<String>, entry: ToolEntry) -> Result<(), RegistryError> {
        let name = name.into();
        if self.tools.len() >= self.max_tools {
            return Err(RegistryError::Full {
                max_tools: self.max_tools,
            });
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }
        tracing::debug!(target: "mtx.registry", tool = %name, "registered tool");
        self.tools.insert(name, entry);
        Ok(())
    }

    /// Look up a tool, returning a copy.
    ///
    /// Mutating the returned entry does not affect the canonical record.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolEntry> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted list of registered tool names.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Introspection projection for one tool.
    #[must_use]
    pub fn info(&self, name: &str) -> Option<ToolInfo> {
        self.tools.get(name).map(|entry| ToolInfo {
            name: name.to_string(),
            description: entry.description.clone(),
            is_async: entry.handler.is_async(),
            has_retry_policy: entry.retry_policy.is_some(),
            timeout_ms: entry.timeout_ms,
        })
    }

    /// Introspection projections for every tool, keyed by name.
    #[must_use]
    pub fn info_all(&self) -> BTreeMap<String, ToolInfo> {
        self.tools
            .keys()
            .filter_map(|name| self.info(name).map(|info| (name.clone(), info)))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> ToolEntry {
        ToolEntry {
            handler: ToolHandler::sync(|args| Ok(args)),
            retry_policy: None,
            key_fn: None,
            timeout_ms: None,
            description: None,
        }
    }

    #[test]
    fn register_and_list_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register("zeta", entry()).expect("register");
        registry.register("alpha", entry()).expect("register");
        assert_eq!(registry.list(), vec!["alpha", "zeta"]);
        assert!(registry.contains("alpha"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", entry()).expect("register");
        let err = registry.register("echo", entry()).expect_err("duplicate");
        assert!(matches!(err, RegistryError::Duplicate { name } if name == "echo"));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut registry = ToolRegistry::with_capacity(2);
        registry.register("a", entry()).expect("register");
        registry.register("b", entry()).expect("register");
        let err = registry.register("c", entry()).expect_err("full");
        assert!(matches!(err, RegistryError::Full { max_tools: 2 }));
    }

    #[test]
    fn get_returns_a_detached_copy() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", entry()).expect("register");

        let mut copy = registry.get("echo").expect("entry");
        copy.timeout_ms = Some(1);
        copy.description = Some("mutated".into());

        let canonical = registry.get("echo").expect("entry");
        assert_eq!(canonical.timeout_ms, None);
        assert_eq!(canonical.description, None);
    }

    #[test]
    fn info_projects_entry_metadata() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                "fetch",
                ToolEntry {
                    handler: ToolHandler::async_fn(|args| async move { Ok(args) }),
                    retry_policy: Some(RetryPolicy::default()),
                    key_fn: None,
                    timeout_ms: Some(5000),
                    description: Some("fetches things".into()),
                },
            )
            .expect("register");

        let info = registry.info("fetch").expect("info");
        assert_eq!(info.name, "fetch");
        assert!(info.is_async);
        assert!(info.has_retry_policy);
        assert_eq!(info.timeout_ms, Some(5000));
        assert_eq!(info.description.as_deref(), Some("fetches things"));

        assert!(registry.info("missing").is_none());
        assert_eq!(registry.info_all().len(), 1);
    }

    #[tokio::test]
    async fn handlers_execute_both_variants() {
        let sync = ToolHandler::sync(|args| Ok(json!({"echo": args})));
        assert!(!sync.is_async());
        assert_eq!(
            sync.invoke(json!(1)).await.expect("sync"),
            json!({"echo": 1})
        );

        let asynchronous = ToolHandler::async_fn(|args| async move { Ok(json!({"echo": args})) });
        assert!(asynchronous.is_async());
        assert_eq!(
            asynchronous.invoke(json!(2)).await.expect("async"),
            json!({"echo": 2})
        );
    }
}
