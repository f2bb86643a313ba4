use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::part::{
    BoundActions, BoundGetters, BoundMutations, ModuleActions, ModuleGetters, ModuleMutations,
    bind_actions, bind_getters, bind_mutations,
};

/// Initial state of a module definition: a value, or a factory evaluated
/// once per instance.
#[derive(Clone)]
pub enum InitialState {
    Value(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl InitialState {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        InitialState::Factory(Arc::new(f))
    }

    pub(crate) fn evaluate(&self) -> Value {
        match self {
            InitialState::Value(v) => v.clone(),
            InitialState::Factory(f) => f(),
        }
    }
}

impl From<Value> for InitialState {
    fn from(value: Value) -> Self {
        InitialState::Value(value)
    }
}

pub(crate) type GettersFactory = Arc<dyn Fn() -> BoundGetters + Send + Sync>;
pub(crate) type MutationsFactory = Arc<dyn Fn() -> BoundMutations + Send + Sync>;
pub(crate) type ActionsFactory = Arc<dyn Fn() -> BoundActions + Send + Sync>;
pub(crate) type ChildrenFactory = Arc<dyn Fn() -> Children + Send + Sync>;

/// Blueprint of a module.
///
/// Cheap to clone; many instances may be built from one definition, each
/// with its own identity.
///
/// ```ignore
/// let todo = ModuleDefinition::new("todo", json!({ "todos": [] }))
///     .getters(|| TodoGetters)
///     .mutations(|| TodoMutations)
///     .children(|| Children::new().mount("archive", &archive));
/// ```
#[derive(Clone)]
pub struct ModuleDefinition {
    pub(crate) name: String,
    pub(crate) state: InitialState,
    pub(crate) getters: Option<GettersFactory>,
    pub(crate) mutations: Option<MutationsFactory>,
    pub(crate) actions: Option<ActionsFactory>,
    pub(crate) children: Option<ChildrenFactory>,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>, state: impl Into<InitialState>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            getters: None,
            mutations: None,
            actions: None,
            children: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn getters<T, F>(mut self, factory: F) -> Self
    where
        T: ModuleGetters,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.getters = Some(Arc::new(move || bind_getters(factory())));
        self
    }

    pub fn mutations<T, F>(mut self, factory: F) -> Self
    where
        T: ModuleMutations,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.mutations = Some(Arc::new(move || bind_mutations(factory())));
        self
    }

    pub fn actions<T, F>(mut self, factory: F) -> Self
    where
        T: ModuleActions,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.actions = Some(Arc::new(move || bind_actions(factory())));
        self
    }

    pub fn children<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Children + Send + Sync + 'static,
    {
        self.children = Some(Arc::new(factory));
        self
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("getters", &self.getters.is_some())
            .field("mutations", &self.mutations.is_some())
            .field("actions", &self.actions.is_some())
            .field("children", &self.children.is_some())
            .finish()
    }
}

/// Child modules declared by a definition, keyed by mount name.
///
/// Each mount is built as a fresh instance named after its mount point, so
/// one definition may be mounted under several parents.
#[derive(Clone, Default)]
pub struct Children {
    mounts: BTreeMap<String, ModuleDefinition>,
}

impl Children {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `definition` under `name`. Mounting a name twice keeps the
    /// later definition.
    pub fn mount(mut self, name: impl Into<String>, definition: &ModuleDefinition) -> Self {
        self.mounts.insert(name.into(), definition.clone());
        self
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub(crate) fn into_mounts(self) -> BTreeMap<String, ModuleDefinition> {
        self.mounts
    }
}
