//! Safe extension API for registering host functions.
//!
//! The bridge is synchronous by contract: `invoke` runs the handler to
//! completion on the calling thread and returns either a value or an
//! error. There is no queuing and no suspension point inside an op.

use crate::error::{HostError, HostResult};
use crate::value::HostValue;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub type OpResult = HostResult<HostValue>;
/// Type alias for extension initialization functions.
pub type ExtensionInitFn = Arc<dyn Fn(&ExtensionState) + Send + Sync>;
/// Type alias for extension teardown functions.
pub type ExtensionTeardownFn = Arc<dyn Fn(&ExtensionState) + Send + Sync>;

/// TypeId-keyed state shared between an extension's ops.
///
/// Extensions install their coordinating object here from `with_init`
/// and fetch it back through [`OpContext::state`]. The state lives as
/// long as the registry, which matches the bridge's init/teardown span.
#[derive(Clone)]
pub struct ExtensionState {
    inner: Arc<Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl Default for ExtensionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn put<T: Any + Send + Sync>(&self, value: T) {
        let mut map = self.inner.lock();
        map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let map = self.inner.lock();
        map.get(&TypeId::of::<T>()).and_then(|value| {
            let value = value.clone();
            value.downcast::<T>().ok()
        })
    }
}

/// Per-call context handed to op handlers.
#[derive(Clone)]
pub struct OpContext {
    state: ExtensionState,
}

impl OpContext {
    pub fn state(&self) -> ExtensionState {
        self.state.clone()
    }
}

type OpHandler = Arc<dyn Fn(OpContext, Vec<HostValue>) -> OpResult + Send + Sync>;

#[derive(Clone)]
pub struct OpDecl {
    name: String,
    handler: OpHandler,
}

impl OpDecl {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub fn op_sync<F>(name: &str, handler: F) -> OpDecl
where
    F: Fn(OpContext, Vec<HostValue>) -> OpResult + Send + Sync + 'static,
{
    OpDecl {
        name: name.to_string(),
        handler: Arc::new(handler),
    }
}

#[derive(Clone)]
pub struct Extension {
    name: String,
    ops: Vec<OpDecl>,
    init: Option<ExtensionInitFn>,
    teardown: Option<ExtensionTeardownFn>,
}

impl Extension {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ops: Vec::new(),
            init: None,
            teardown: None,
        }
    }

    /// Get the name of this extension
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_ops(mut self, ops: Vec<OpDecl>) -> Self {
        self.ops = ops;
        self
    }

    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&ExtensionState) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    /// Register a hook run once at registry teardown. Teardown hooks
    /// must release every resource the extension still holds.
    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn(&ExtensionState) + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(teardown));
        self
    }
}

/// Registry of ops installed by extensions.
///
/// One registry backs one bridge instance; the host serializes calls
/// into `invoke`, so handlers never run concurrently from the host's
/// point of view.
pub struct ExtensionRegistry {
    ops: Mutex<HashMap<String, OpDecl>>,
    state: ExtensionState,
    teardowns: Mutex<Vec<ExtensionTeardownFn>>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(HashMap::new()),
            state: ExtensionState::new(),
            teardowns: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ExtensionState {
        self.state.clone()
    }

    pub fn register_extension(&self, extension: Extension) -> HostResult<()> {
        debug!(
            extension = extension.name(),
            ops_count = extension.ops.len(),
            "Registering extension"
        );

        if let Some(init) = extension.init.as_ref() {
            init(&self.state);
        }

        for op in extension.ops {
            self.register_op(op)?;
        }

        if let Some(teardown) = extension.teardown {
            self.teardowns.lock().push(teardown);
        }

        Ok(())
    }

    /// Dispatch one op synchronously to completion.
    pub fn invoke(&self, name: &str, args: Vec<HostValue>) -> OpResult {
        let op = self
            .get_op(name)
            .ok_or_else(|| HostError::UnknownOp(name.to_string()))?;

        let op_context = OpContext {
            state: self.state.clone(),
        };

        (op.handler)(op_context, args)
    }

    /// Run every registered teardown hook, in registration order.
    ///
    /// Hooks are drained, so a second call is a no-op.
    pub fn teardown(&self) {
        let hooks: Vec<ExtensionTeardownFn> = self.teardowns.lock().drain(..).collect();
        for hook in hooks {
            hook(&self.state);
        }
    }

    fn register_op(&self, op: OpDecl) -> HostResult<()> {
        let mut ops = self.ops.lock();
        if ops.contains_key(op.name()) {
            return Err(HostError::AlreadyRegistered(op.name().to_string()));
        }

        ops.insert(op.name().to_string(), op);
        Ok(())
    }

    fn get_op(&self, name: &str) -> Option<OpDecl> {
        let ops = self.ops.lock();
        ops.get(name).cloned()
    }
}

impl Drop for ExtensionRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}
