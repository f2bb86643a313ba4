//! Accessor proxies: a module's getters, mutations and actions as seen from
//! outside the module.
//!
//! Every call resolves the handler name inside the module's namespace and
//! goes through the bound store, so callers observe exactly what the store
//! holds. Handler names are checked against the module's own tables first.

use serde_json::Value;

use crate::descriptor::GetterOutput;
use crate::error::{ModuleError, Result, StoreError};
use crate::module::ModuleInstance;
use crate::namespace;
use crate::store::{BoxFuture, CallOptions, SharedStore};

fn unknown(module: &ModuleInstance, kind: &'static str, name: &str) -> ModuleError {
    ModuleError::UnknownHandler {
        module: module.name().to_string(),
        kind,
        name: name.to_string(),
    }
}

/// The bound store and the qualified name of `handler`.
fn resolve(module: &ModuleInstance, access: &str, handler: &str) -> Result<(SharedStore, String)> {
    let (store, path) = module.binding(access)?;
    Ok((store, namespace::qualify(&namespace::join(&path), handler)))
}

// ============================================================================
// Getters
// ============================================================================

/// Getter access for one module.
#[derive(Clone, Debug)]
pub struct GettersProxy {
    module: ModuleInstance,
}

impl GettersProxy {
    pub(crate) fn new(module: ModuleInstance) -> Self {
        Self { module }
    }

    pub fn module(&self) -> &ModuleInstance {
        &self.module
    }

    /// Declared getter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.module
            .bound_getters()
            .map(|g| g.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.module
            .bound_getters()
            .is_some_and(|g| g.contains_key(name))
    }

    /// Look up a getter through the store.
    pub fn get(&self, name: &str) -> Result<GetterOutput> {
        let (store, qualified) = resolve(&self.module, "getters", name)?;
        if !self.contains(name) {
            return Err(unknown(&self.module, "getter", name));
        }
        Ok(store.getter(&qualified)?)
    }

    /// The value of a computed getter.
    pub fn value(&self, name: &str) -> Result<Value> {
        match self.get(name)? {
            GetterOutput::Value(v) => Ok(v),
            GetterOutput::Method(_) => Err(ModuleError::GetterShape {
                module: self.module.name().to_string(),
                name: name.to_string(),
                expected: "computed",
            }),
        }
    }

    /// Invoke a method getter with `args`.
    pub fn call(&self, name: &str, args: Value) -> Result<Value> {
        match self.get(name)? {
            GetterOutput::Method(f) => Ok(f(args).map_err(StoreError::Handler)?),
            GetterOutput::Value(_) => Err(ModuleError::GetterShape {
                module: self.module.name().to_string(),
                name: name.to_string(),
                expected: "method",
            }),
        }
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Commit access for one module. Only exists for modules that declare
/// mutations.
#[derive(Clone, Debug)]
pub struct MutationsProxy {
    module: ModuleInstance,
}

impl MutationsProxy {
    pub(crate) fn new(module: ModuleInstance) -> Result<Self> {
        if module.bound_mutations().is_none() {
            return Err(ModuleError::NoMutationsDefined {
                module: module.name().to_string(),
            });
        }
        Ok(Self { module })
    }

    pub fn module(&self) -> &ModuleInstance {
        &self.module
    }

    pub fn names(&self) -> Vec<&str> {
        self.module
            .bound_mutations()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.module
            .bound_mutations()
            .is_some_and(|m| m.contains_key(name))
    }

    /// Commit `name` with `payload` as a root-scoped, fully qualified call.
    pub fn commit(&self, name: &str, payload: Value) -> Result<()> {
        let (store, qualified) = resolve(&self.module, "commit", name)?;
        if !self.contains(name) {
            return Err(unknown(&self.module, "mutation", name));
        }
        Ok(store.commit(&qualified, payload, CallOptions::root())?)
    }

    /// A committer for one mutation, to be called with the payload later.
    pub fn committer(
        &self,
        name: &str,
    ) -> Result<impl Fn(Value) -> Result<()> + Send + Sync + use<>> {
        if !self.contains(name) {
            return Err(unknown(&self.module, "mutation", name));
        }
        let proxy = self.clone();
        let name = name.to_string();
        Ok(move |payload: Value| proxy.commit(&name, payload))
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Dispatch access for one module. Only exists for modules that declare
/// actions.
#[derive(Clone, Debug)]
pub struct ActionsProxy {
    module: ModuleInstance,
}

impl ActionsProxy {
    pub(crate) fn new(module: ModuleInstance) -> Result<Self> {
        if module.bound_actions().is_none() {
            return Err(ModuleError::NoActionsDefined {
                module: module.name().to_string(),
            });
        }
        Ok(Self { module })
    }

    pub fn module(&self) -> &ModuleInstance {
        &self.module
    }

    pub fn names(&self) -> Vec<&str> {
        self.module
            .bound_actions()
            .map(|a| a.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.module
            .bound_actions()
            .is_some_and(|a| a.contains_key(name))
    }

    /// Dispatch `name` with `payload` as a root-scoped, fully qualified call.
    ///
    /// The action starts when the returned future is first polled; dropping
    /// it unpolled skips the action.
    pub fn dispatch(&self, name: &str, payload: Value) -> Result<BoxFuture<Result<Value>>> {
        let (store, qualified) = resolve(&self.module, "dispatch", name)?;
        if !self.contains(name) {
            return Err(unknown(&self.module, "action", name));
        }
        let pending = store.dispatch(&qualified, payload, CallOptions::root());
        Ok(Box::pin(async move { pending.await.map_err(ModuleError::from) }))
    }
}
