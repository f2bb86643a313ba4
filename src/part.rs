//! Module parts: the getters, mutations and actions a module declares.
//!
//! A part is an ordinary struct. Its handlers are registered once in a
//! lookup table, either as method references or closures:
//!
//! ```ignore
//! struct TodoMutations;
//!
//! impl ModuleMutations for TodoMutations {
//!     fn mutations(table: &mut MutationTable<Self>) {
//!         table.on("add", Self::add);
//!     }
//! }
//!
//! impl TodoMutations {
//!     fn add(&self, ctx: &mut MutationContext<'_>, payload: Value) -> anyhow::Result<()> {
//!         match ctx.state_mut()["todos"].as_array_mut() {
//!             Some(todos) => todos.push(payload),
//!             None => anyhow::bail!("todos is not a list"),
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Handler bodies only ever see store-supplied values through their
//! context argument.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::context::{DispatchContext, GetterContext, MutationContext};
use crate::store::BoxFuture;

/// Names that address a part's own context and can never be handlers.
pub const RESERVED_NAMES: &[&str] = &[
    "constructor",
    "context",
    "module",
    "parent",
    "rootState",
    "root_state",
    "state",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

// ============================================================================
// Author-facing traits
// ============================================================================

/// Derived values of a module.
pub trait ModuleGetters: Send + Sync + Sized + 'static {
    fn getters(table: &mut GetterTable<Self>);
}

/// State-changing handlers of a module.
pub trait ModuleMutations: Send + Sync + Sized + 'static {
    fn mutations(table: &mut MutationTable<Self>);
}

/// Asynchronous handlers of a module.
pub trait ModuleActions: Send + Sync + Sized + 'static {
    fn actions(table: &mut ActionTable<Self>);
}

// ============================================================================
// Tables
// ============================================================================

type ComputedFn<T> = Arc<dyn Fn(&T, &GetterContext) -> anyhow::Result<Value> + Send + Sync>;
type MethodFn<T> = Arc<dyn Fn(&T, &GetterContext, Value) -> anyhow::Result<Value> + Send + Sync>;
type MutationFn<T> =
    Arc<dyn Fn(&T, &mut MutationContext<'_>, Value) -> anyhow::Result<()> + Send + Sync>;
type ActionFn<T> =
    Arc<dyn Fn(Arc<T>, DispatchContext, Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

enum GetterEntry<T> {
    Computed(ComputedFn<T>),
    Method(MethodFn<T>),
}

/// Getter declarations of part `T`.
pub struct GetterTable<T> {
    entries: Vec<(String, GetterEntry<T>)>,
}

impl<T> GetterTable<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// A zero-argument derived value. Lookups return it evaluated.
    pub fn computed<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&T, &GetterContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries
            .push((name.to_string(), GetterEntry::Computed(Arc::new(f))));
        self
    }

    /// A getter taking an argument. Lookups return it bound but uninvoked.
    pub fn method<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&T, &GetterContext, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries
            .push((name.to_string(), GetterEntry::Method(Arc::new(f))));
        self
    }
}

/// Mutation declarations of part `T`.
pub struct MutationTable<T> {
    entries: Vec<(String, MutationFn<T>)>,
}

impl<T> MutationTable<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn on<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&T, &mut MutationContext<'_>, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.push((name.to_string(), Arc::new(f)));
        self
    }
}

/// Action declarations of part `T`.
///
/// Action handlers receive the part as `Arc<Self>` so the returned future
/// can be `'static`.
pub struct ActionTable<T> {
    entries: Vec<(String, ActionFn<T>)>,
}

impl<T: Send + Sync + 'static> ActionTable<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn on<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Arc<T>, DispatchContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let erased: ActionFn<T> = Arc::new(
            move |part: Arc<T>,
                  ctx: DispatchContext,
                  payload: Value|
                  -> BoxFuture<anyhow::Result<Value>> { Box::pin(f(part, ctx, payload)) },
        );
        self.entries.push((name.to_string(), erased));
        self
    }
}

// ============================================================================
// Bound parts
// ============================================================================
//
// A bound part is one part instance with every handler closed over it,
// keyed by handler name. Later declarations of a name replace earlier ones.

#[derive(Clone)]
pub(crate) enum BoundGetter {
    Computed(Arc<dyn Fn(&GetterContext) -> anyhow::Result<Value> + Send + Sync>),
    Method(Arc<dyn Fn(&GetterContext, Value) -> anyhow::Result<Value> + Send + Sync>),
}

pub(crate) type BoundMutation =
    Arc<dyn Fn(&mut MutationContext<'_>, Value) -> anyhow::Result<()> + Send + Sync>;

pub(crate) type BoundAction =
    Arc<dyn Fn(DispatchContext, Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

pub(crate) type BoundGetters = BTreeMap<String, BoundGetter>;
pub(crate) type BoundMutations = BTreeMap<String, BoundMutation>;
pub(crate) type BoundActions = BTreeMap<String, BoundAction>;

fn accept(kind: &str, name: &str) -> bool {
    if is_reserved(name) {
        warn!("ModulePart: skipping {} '{}', the name is reserved", kind, name);
        return false;
    }
    true
}

fn computed_fn<F>(f: F) -> BoundGetter
where
    F: Fn(&GetterContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    BoundGetter::Computed(Arc::new(f))
}

fn method_fn<F>(f: F) -> BoundGetter
where
    F: Fn(&GetterContext, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    BoundGetter::Method(Arc::new(f))
}

fn mutation_fn<F>(f: F) -> BoundMutation
where
    F: Fn(&mut MutationContext<'_>, Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn action_fn<F>(f: F) -> BoundAction
where
    F: Fn(DispatchContext, Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn bind_getters<T: ModuleGetters>(part: T) -> BoundGetters {
    let mut table = GetterTable::new();
    T::getters(&mut table);
    let part = Arc::new(part);

    let mut bound = BTreeMap::new();
    for (name, entry) in table.entries {
        if !accept("getter", &name) {
            continue;
        }
        let part = part.clone();
        let getter = match entry {
            GetterEntry::Computed(f) => computed_fn(move |ctx| f(&*part, ctx)),
            GetterEntry::Method(f) => method_fn(move |ctx, args| f(&*part, ctx, args)),
        };
        bound.insert(name, getter);
    }
    bound
}

pub(crate) fn bind_mutations<T: ModuleMutations>(part: T) -> BoundMutations {
    let mut table = MutationTable::new();
    T::mutations(&mut table);
    let part = Arc::new(part);

    let mut bound = BTreeMap::new();
    for (name, f) in table.entries {
        if !accept("mutation", &name) {
            continue;
        }
        let part = part.clone();
        bound.insert(name, mutation_fn(move |ctx, payload| f(&*part, ctx, payload)));
    }
    bound
}

pub(crate) fn bind_actions<T: ModuleActions>(part: T) -> BoundActions {
    let mut table = ActionTable::new();
    T::actions(&mut table);
    let part = Arc::new(part);

    let mut bound = BTreeMap::new();
    for (name, f) in table.entries {
        if !accept("action", &name) {
            continue;
        }
        let part = part.clone();
        bound.insert(name, action_fn(move |ctx, payload| f(part.clone(), ctx, payload)));
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::descriptor::{GetterLookup, GetterOutput};
    use crate::error::StoreError;
    use crate::module::ModuleHandle;

    struct NoLookup;

    impl GetterLookup for NoLookup {
        fn get(&self, name: &str) -> Result<GetterOutput, StoreError> {
            Err(StoreError::UnknownGetter(name.to_string()))
        }
    }

    struct Doubler {
        factor: i64,
    }

    impl ModuleGetters for Doubler {
        fn getters(table: &mut GetterTable<Self>) {
            table
                .computed("doubled", Self::doubled)
                .method("times", |part, _ctx, args| {
                    Ok(json!(args.as_i64().unwrap_or(0) * part.factor))
                })
                .computed("state", |_, _| Ok(json!("shadowed")));
        }
    }

    impl Doubler {
        fn doubled(&self, ctx: &GetterContext) -> anyhow::Result<Value> {
            Ok(json!(ctx.state()["n"].as_i64().unwrap_or(0) * self.factor))
        }
    }

    struct Counter;

    impl ModuleMutations for Counter {
        fn mutations(table: &mut MutationTable<Self>) {
            table.on("bump", Self::bump);
            table.on("bump", |_, ctx, _| {
                ctx.state_mut()["n"] = json!(100);
                Ok(())
            });
            table.on("module", |_, _, _| Ok(()));
        }
    }

    impl Counter {
        fn bump(&self, ctx: &mut MutationContext<'_>, _payload: Value) -> anyhow::Result<()> {
            let n = ctx.state()["n"].as_i64().unwrap_or(0);
            ctx.state_mut()["n"] = json!(n + 1);
            Ok(())
        }
    }

    struct Loader;

    impl ModuleActions for Loader {
        fn actions(table: &mut ActionTable<Self>) {
            table.on("load", Self::load);
        }
    }

    impl Loader {
        async fn load(
            self: Arc<Self>,
            _ctx: DispatchContext,
            payload: Value,
        ) -> anyhow::Result<Value> {
            Ok(json!({"loaded": payload}))
        }
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved("state"));
        assert!(is_reserved("rootState"));
        assert!(is_reserved("module"));
        assert!(!is_reserved("items"));
    }

    #[test]
    fn getters_skip_reserved_and_keep_kind() {
        let bound = bind_getters(Doubler { factor: 3 });
        assert_eq!(bound.len(), 2);
        assert!(matches!(bound["doubled"], BoundGetter::Computed(_)));
        assert!(matches!(bound["times"], BoundGetter::Method(_)));
        assert!(!bound.contains_key("state"));
    }

    #[test]
    fn bound_getter_closes_over_part() {
        let bound = bind_getters(Doubler { factor: 3 });
        let ctx = GetterContext::new(
            json!({"n": 5}),
            Arc::new(NoLookup),
            json!({}),
            ModuleHandle::dangling(),
        );
        match &bound["doubled"] {
            BoundGetter::Computed(f) => assert_eq!(f(&ctx).unwrap(), json!(15)),
            BoundGetter::Method(_) => panic!("expected computed getter"),
        }
        match &bound["times"] {
            BoundGetter::Method(f) => assert_eq!(f(&ctx, json!(4)).unwrap(), json!(12)),
            BoundGetter::Computed(_) => panic!("expected method getter"),
        }
    }

    #[test]
    fn later_mutation_declaration_wins() {
        let bound = bind_mutations(Counter);
        assert_eq!(bound.len(), 1);

        let mut state = json!({"n": 1});
        let mut ctx = MutationContext::new(&mut state, ModuleHandle::dangling());
        bound["bump"](&mut ctx, Value::Null).unwrap();
        assert_eq!(state, json!({"n": 100}));
    }

    #[test]
    fn actions_bind_async_methods() {
        let bound = bind_actions(Loader);
        assert_eq!(bound.keys().collect::<Vec<_>>(), vec!["load"]);
    }
}
