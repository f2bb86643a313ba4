//! The static module shape handed to a store.
//!
//! A [`ModuleDescriptor`] is what a store sees of a module: its initial
//! state, flat handler tables, and the descriptors of its children. Handler
//! closures take store-supplied values only; the binding layer builds them
//! from a module's parts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::store::{ActionContext, BoxFuture};

/// A method getter: bound to its call context, waiting for an argument.
pub type MethodGetter = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// `(state, getters, root_state) -> value`
pub type GetterHandler = Arc<
    dyn Fn(Value, Arc<dyn GetterLookup>, Value) -> anyhow::Result<GetterOutput> + Send + Sync,
>;

/// `(state, payload) -> ()`
pub type MutationHandler = Arc<dyn Fn(&mut Value, Value) -> anyhow::Result<()> + Send + Sync>;

/// `(context, payload) -> future`
pub type ActionHandler =
    Arc<dyn Fn(ActionContext, Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

/// Result of looking up a getter.
///
/// Computed getters are returned evaluated. Method getters are returned
/// bound but uninvoked; the caller supplies the argument.
#[derive(Clone)]
pub enum GetterOutput {
    Value(Value),
    Method(MethodGetter),
}

impl GetterOutput {
    /// The evaluated value, if this is a computed getter.
    pub fn into_value(self) -> Option<Value> {
        match self {
            GetterOutput::Value(v) => Some(v),
            GetterOutput::Method(_) => None,
        }
    }

    /// Invoke a method getter. Returns `None` for a computed getter.
    pub fn call(&self, args: Value) -> Option<anyhow::Result<Value>> {
        match self {
            GetterOutput::Value(_) => None,
            GetterOutput::Method(f) => Some(f(args)),
        }
    }

    pub fn is_method(&self) -> bool {
        matches!(self, GetterOutput::Method(_))
    }
}

impl fmt::Debug for GetterOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetterOutput::Value(v) => f.debug_tuple("Value").field(v).finish(),
            GetterOutput::Method(_) => f.write_str("Method(..)"),
        }
    }
}

/// Getter lookup scoped to one module's namespace, passed to getter handlers.
pub trait GetterLookup: Send + Sync {
    fn get(&self, name: &str) -> Result<GetterOutput, StoreError>;
}

/// How a store obtains a module's initial state.
#[derive(Clone)]
pub enum DescriptorState {
    /// Used as-is. Root modules carry their snapshot literally.
    Literal(Value),
    /// Called once per installation. Non-root modules hand out a factory so
    /// re-registration starts from a fresh copy.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DescriptorState {
    pub fn resolve(&self) -> Value {
        match self {
            DescriptorState::Literal(v) => v.clone(),
            DescriptorState::Factory(f) => f(),
        }
    }
}

/// The static shape of a module as accepted by a [`Store`](crate::store::Store).
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub namespaced: bool,
    pub state: DescriptorState,
    pub getters: BTreeMap<String, GetterHandler>,
    pub mutations: BTreeMap<String, MutationHandler>,
    pub actions: BTreeMap<String, ActionHandler>,
    pub modules: BTreeMap<String, ModuleDescriptor>,
}

impl Default for ModuleDescriptor {
    fn default() -> Self {
        Self {
            namespaced: true,
            state: DescriptorState::Literal(Value::Object(Default::default())),
            getters: BTreeMap::new(),
            mutations: BTreeMap::new(),
            actions: BTreeMap::new(),
            modules: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("namespaced", &self.namespaced)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("modules", &self.modules)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_descriptor_is_namespaced_and_empty() {
        let d = ModuleDescriptor::default();
        assert!(d.namespaced);
        assert_eq!(d.state.resolve(), json!({}));
        assert!(d.getters.is_empty() && d.mutations.is_empty() && d.actions.is_empty());
    }

    #[test]
    fn factory_state_is_fresh_per_resolve() {
        let state = DescriptorState::Factory(Arc::new(|| json!({"items": []})));
        let mut a = state.resolve();
        a["items"] = json!(["x"]);
        assert_eq!(state.resolve(), json!({"items": []}));
    }

    #[test]
    fn getter_output_value() {
        let out = GetterOutput::Value(json!(3));
        assert!(!out.is_method());
        assert!(out.call(json!(null)).is_none());
        assert_eq!(out.into_value(), Some(json!(3)));
    }

    #[test]
    fn getter_output_method() {
        let out = GetterOutput::Method(Arc::new(|args: Value| -> anyhow::Result<Value> {
            Ok(json!({"echo": args}))
        }));
        assert!(out.is_method());
        assert_eq!(out.call(json!(1)).unwrap().unwrap(), json!({"echo": 1}));
        assert!(out.into_value().is_none());
    }

    #[test]
    fn debug_lists_handler_names() {
        let mut d = ModuleDescriptor::default();
        let add: MutationHandler =
            Arc::new(|_state: &mut Value, _payload: Value| -> anyhow::Result<()> { Ok(()) });
        d.mutations.insert("add".into(), add);
        let debug = format!("{:?}", d);
        assert!(debug.contains("add"));
    }
}
