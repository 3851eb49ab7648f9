//! Host values visible to scripts.
//!
//! Scripts resolve names at call time through `ScriptContext::query`. The
//! lookup order is fixed: the host context first, then values scoped to
//! the request that started the execution. A name neither knows is
//! unresolved, which the script sees as `None` (or a fault via `require`).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::cancel::CancelSignal;

/// Read-only values the host application exposes to scripts.
pub trait HostContext: Send + Sync {
    /// Look up a value by dotted name, e.g. `process.pid`.
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// A host context exposing nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyHost;

impl HostContext for EmptyHost {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// A host context backed by a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticHost {
    values: BTreeMap<String, Value>,
}

impl StaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }
}

impl HostContext for StaticHost {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
}

/// Everything an invocation can reach: its cancellation signal and the
/// two layers of host values.
#[derive(Clone)]
pub struct InvocationScope {
    signal: CancelSignal,
    host: Arc<dyn HostContext>,
    request: BTreeMap<String, Value>,
}

impl InvocationScope {
    pub fn new(signal: CancelSignal, host: Arc<dyn HostContext>) -> Self {
        Self {
            signal,
            host,
            request: BTreeMap::new(),
        }
    }

    /// Add a value scoped to the initiating request.
    pub fn with_request_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request.insert(name.into(), value.into());
        self
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Resolve a name: host context first, then request values.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.host
            .resolve(name)
            .or_else(|| self.request.get(name).cloned())
    }
}

impl std::fmt::Debug for InvocationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationScope")
            .field("signal", &self.signal)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
