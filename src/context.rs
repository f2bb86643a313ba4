//! Per-call contexts handed to handler bodies.
//!
//! Each context is built fresh for one invocation from the values the store
//! supplies for that call, so handlers always observe current store state
//! even though the part instance that owns them is long-lived.

use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::descriptor::{GetterLookup, GetterOutput};
use crate::error::StoreError;
use crate::module::{ModuleHandle, ModuleInstance};
use crate::store::{ActionContext, BoxFuture, CallOptions};

fn decode<T: DeserializeOwned>(value: &Value) -> anyhow::Result<T> {
    Ok(serde_json::from_value(value.clone())?)
}

fn computed(name: &str, output: GetterOutput) -> anyhow::Result<Value> {
    output
        .into_value()
        .ok_or_else(|| anyhow!("getter '{}' is a method getter", name))
}

// ============================================================================
// Getters
// ============================================================================

/// Context of one getter evaluation.
#[derive(Clone)]
pub struct GetterContext {
    state: Value,
    root_state: Value,
    getters: Arc<dyn GetterLookup>,
    module: ModuleHandle,
}

impl GetterContext {
    pub(crate) fn new(
        state: Value,
        getters: Arc<dyn GetterLookup>,
        root_state: Value,
        module: ModuleHandle,
    ) -> Self {
        Self {
            state,
            root_state,
            getters,
            module,
        }
    }

    /// The module's state.
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// The whole state tree.
    pub fn root_state(&self) -> &Value {
        &self.root_state
    }

    /// Deserialize the module's state into `T`.
    pub fn state_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        decode(&self.state)
    }

    /// Evaluate another computed getter of this module.
    pub fn getter(&self, name: &str) -> anyhow::Result<Value> {
        computed(name, self.getters.get(name)?)
    }

    /// Look up another getter of this module, computed or method.
    pub fn getter_output(&self, name: &str) -> Result<GetterOutput, StoreError> {
        self.getters.get(name)
    }

    /// The module that owns this getter, if it is still alive.
    pub fn module(&self) -> Option<ModuleInstance> {
        self.module.upgrade()
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Context of one mutation.
pub struct MutationContext<'a> {
    state: &'a mut Value,
    module: ModuleHandle,
}

impl<'a> MutationContext<'a> {
    pub(crate) fn new(state: &'a mut Value, module: ModuleHandle) -> Self {
        Self { state, module }
    }

    pub fn state(&self) -> &Value {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut Value {
        &mut *self.state
    }

    pub fn state_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        decode(&*self.state)
    }

    /// Edit the state through a typed view and write it back. Keys the
    /// view does not serialize, such as child module state, are kept.
    ///
    /// ```ignore
    /// ctx.update(|s: &mut Counter| s.count += 1)?;
    /// ```
    pub fn update<T, R, F>(&mut self, f: F) -> anyhow::Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R,
    {
        let mut typed: T = decode(&*self.state)?;
        let out = f(&mut typed);
        match serde_json::to_value(typed)? {
            Value::Object(fields) if self.state.is_object() => {
                if let Some(current) = self.state.as_object_mut() {
                    current.extend(fields);
                }
            }
            other => *self.state = other,
        }
        Ok(out)
    }

    pub fn module(&self) -> Option<ModuleInstance> {
        self.module.upgrade()
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Context of one action. Cheap to clone into an `async move` block.
#[derive(Clone)]
pub struct DispatchContext {
    context: ActionContext,
    module: ModuleHandle,
}

impl DispatchContext {
    pub(crate) fn new(context: ActionContext, module: ModuleHandle) -> Self {
        Self { context, module }
    }

    /// The store-supplied action context.
    pub fn context(&self) -> &ActionContext {
        &self.context
    }

    /// The module's current state, read from the store.
    pub fn state(&self) -> Value {
        self.context.state()
    }

    /// The current state tree, read from the store.
    pub fn root_state(&self) -> Value {
        self.context.root_state()
    }

    pub fn state_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        decode(&self.context.state())
    }

    /// Evaluate a computed getter of this module.
    pub fn getter(&self, name: &str) -> anyhow::Result<Value> {
        computed(name, self.context.getter(name)?)
    }

    /// Commit a mutation of this module.
    pub fn commit(&self, name: &str, payload: Value) -> anyhow::Result<()> {
        Ok(self.context.commit(name, payload, CallOptions::local())?)
    }

    /// Commit a mutation by fully qualified name.
    pub fn commit_root(&self, name: &str, payload: Value) -> anyhow::Result<()> {
        Ok(self.context.commit(name, payload, CallOptions::root())?)
    }

    /// Dispatch an action of this module.
    pub fn dispatch(&self, name: &str, payload: Value) -> BoxFuture<Result<Value, StoreError>> {
        self.context.dispatch(name, payload, CallOptions::local())
    }

    /// Dispatch an action by fully qualified name.
    pub fn dispatch_root(
        &self,
        name: &str,
        payload: Value,
    ) -> BoxFuture<Result<Value, StoreError>> {
        self.context.dispatch(name, payload, CallOptions::root())
    }

    pub fn module(&self) -> Option<ModuleInstance> {
        self.module.upgrade()
    }
}
