//! Module instances and the builder that wires them.
//!
//! A [`ModuleInstance`] is one uniquely identified realization of a
//! [`ModuleDefinition`]. Instances are cheap handles (`Arc` inside); the
//! bound parts, children and identity are fixed at build time, while the
//! store binding lives in the [`BindingRegistry`] the instance was built with.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;
use tracing::debug;

use crate::adapter;
use crate::binder;
use crate::config::StoreOptions;
use crate::definition::ModuleDefinition;
use crate::descriptor::{DescriptorState, GetterOutput, ModuleDescriptor};
use crate::error::{ModuleError, Result};
use crate::id::ModuleId;
use crate::memory::MemoryStore;
use crate::namespace;
use crate::part::{BoundActions, BoundGetters, BoundMutations};
use crate::plugin;
use crate::proxy::{ActionsProxy, GettersProxy, MutationsProxy};
use crate::registry::BindingRegistry;
use crate::store::{BoxFuture, SharedStore, Store, state_at};

/// Where an instance sits in its tree. Written by the binder and by
/// [`ModuleInstance::to_store_with`].
#[derive(Clone, Default)]
pub(crate) struct Placement {
    pub(crate) is_root: bool,
    pub(crate) is_nested: bool,
    pub(crate) parent: Option<ModuleHandle>,
}

pub(crate) struct ModuleInner {
    id: ModuleId,
    name: String,
    definition: ModuleDefinition,
    registry: Arc<BindingRegistry>,
    initial_state: Value,
    placement: RwLock<Placement>,
    getters: Option<BoundGetters>,
    mutations: Option<BoundMutations>,
    actions: Option<BoundActions>,
    children: BTreeMap<String, ModuleInstance>,
}

/// A weak reference to a module instance.
///
/// Handed to handler contexts and held by store-side handler closures, so a
/// store never keeps a module tree alive.
#[derive(Clone, Default)]
pub struct ModuleHandle(Weak<ModuleInner>);

impl ModuleHandle {
    /// A handle that never upgrades.
    pub(crate) fn dangling() -> Self {
        ModuleHandle(Weak::new())
    }

    /// The module, if it has not been dropped.
    pub fn upgrade(&self) -> Option<ModuleInstance> {
        self.0.upgrade().map(ModuleInstance)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(module) => write!(f, "ModuleHandle({})", module.name()),
            None => f.write_str("ModuleHandle(<dropped>)"),
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds module instances against one [`BindingRegistry`].
///
/// Instances built by the same builder (and their clones) share the
/// registry; tests create a builder per case to stay isolated.
#[derive(Clone, Debug)]
pub struct ModuleBuilder {
    registry: Arc<BindingRegistry>,
}

impl ModuleBuilder {
    pub fn new(registry: Arc<BindingRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    /// Build one fully wired instance of `definition`.
    ///
    /// The initial state is evaluated once, every declared part is
    /// instantiated and bound, and every child mount is built as its own
    /// instance.
    ///
    /// # Panics
    ///
    /// Panics if the definition's name is blank.
    pub fn build(&self, definition: &ModuleDefinition) -> ModuleInstance {
        self.build_named(definition, definition.name())
    }

    pub(crate) fn build_named(&self, definition: &ModuleDefinition, name: &str) -> ModuleInstance {
        assert!(
            !name.trim().is_empty(),
            "module definitions need a non-empty name"
        );

        let children: BTreeMap<String, ModuleInstance> = definition
            .children
            .as_ref()
            .map(|factory| factory().into_mounts())
            .unwrap_or_default()
            .into_iter()
            .map(|(mount, child)| {
                let instance = self.build_named(&child, &mount);
                (mount, instance)
            })
            .collect();

        let inner = ModuleInner {
            id: ModuleId::next(),
            name: name.to_string(),
            definition: definition.clone(),
            registry: self.registry.clone(),
            initial_state: definition.state.evaluate(),
            placement: RwLock::new(Placement::default()),
            getters: definition.getters.as_ref().map(|factory| factory()),
            mutations: definition.mutations.as_ref().map(|factory| factory()),
            actions: definition.actions.as_ref().map(|factory| factory()),
            children,
        };
        debug!(
            "ModuleBuilder: built '{}' {:?} with {} children",
            inner.name,
            inner.id,
            inner.children.len()
        );
        ModuleInstance(Arc::new(inner))
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new(Arc::new(BindingRegistry::new()))
    }
}

// ============================================================================
// Instance
// ============================================================================

/// One constructed module.
///
/// Cloning the Rust value clones the handle, not the module; use
/// [`clone_module`](Self::clone_module) for a new identity.
#[derive(Clone)]
pub struct ModuleInstance(Arc<ModuleInner>);

impl ModuleInstance {
    pub(crate) fn id(&self) -> ModuleId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn definition(&self) -> &ModuleDefinition {
        &self.0.definition
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.0.registry
    }

    /// The state snapshot taken when this instance was built.
    pub fn initial_state(&self) -> &Value {
        &self.0.initial_state
    }

    pub fn handle(&self) -> ModuleHandle {
        ModuleHandle(Arc::downgrade(&self.0))
    }

    pub fn is_root(&self) -> bool {
        self.0.placement.read().unwrap().is_root
    }

    pub fn is_nested(&self) -> bool {
        self.0.placement.read().unwrap().is_nested
    }

    /// The module this one was bound under, if any.
    pub fn parent(&self) -> Option<ModuleInstance> {
        let placement = self.0.placement.read().unwrap();
        placement.parent.as_ref().and_then(ModuleHandle::upgrade)
    }

    pub fn is_bound(&self) -> bool {
        self.0.registry.is_bound(self.0.id)
    }

    pub(crate) fn set_placement(&self, is_nested: bool, parent: Option<ModuleHandle>) {
        let mut placement = self.0.placement.write().unwrap();
        placement.is_nested = is_nested;
        placement.parent = parent;
    }

    pub(crate) fn bound_getters(&self) -> Option<&BoundGetters> {
        self.0.getters.as_ref()
    }

    pub(crate) fn bound_mutations(&self) -> Option<&BoundMutations> {
        self.0.mutations.as_ref()
    }

    pub(crate) fn bound_actions(&self) -> Option<&BoundActions> {
        self.0.actions.as_ref()
    }

    // ------------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------------

    /// The child mounted under `name`.
    pub fn child(&self, name: &str) -> Option<ModuleInstance> {
        self.0.children.get(name).cloned()
    }

    /// Children in mount-name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ModuleInstance)> {
        self.0
            .children
            .iter()
            .map(|(name, child)| (name.as_str(), child))
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Attach this module and its children to `store`.
    pub fn register(&self, store: &SharedStore) -> Result<()> {
        self.try_register(Some(store))
    }

    /// Like [`register`](Self::register), but accepts a missing store so the
    /// caller gets [`ModuleError::UndefinedStore`] instead of having to
    /// check first.
    pub fn try_register(&self, store: Option<&SharedStore>) -> Result<()> {
        let Some(store) = store else {
            return Err(ModuleError::UndefinedStore {
                module: self.name().to_string(),
            });
        };
        if !store.state().is_object() {
            return Err(ModuleError::InvalidStore {
                module: self.name().to_string(),
            });
        }
        binder::bind(self, store)
    }

    /// Detach this module and its children from their store.
    ///
    /// Only top-level dynamic modules can be detached. Nested modules go
    /// with their nearest top-level ancestor; the root never goes.
    pub fn unregister(&self) -> Result<()> {
        if !self.is_bound() {
            return Err(ModuleError::not_bound(self.name(), "unregister"));
        }
        if self.is_root() {
            return Err(ModuleError::RootModuleUnregister {
                module: self.name().to_string(),
            });
        }
        if self.is_nested() {
            let ancestor = self.top_level_ancestor();
            return Err(ModuleError::NestedModuleUnregister {
                module: self.name().to_string(),
                parent: ancestor
                    .as_ref()
                    .map(|a| a.name().to_string())
                    .unwrap_or_default(),
                parent_is_root: ancestor.as_ref().is_some_and(ModuleInstance::is_root),
            });
        }
        binder::unbind(self)
    }

    /// The nearest ancestor that is not nested: the module whose
    /// `unregister` detaches this one.
    fn top_level_ancestor(&self) -> Option<ModuleInstance> {
        let mut ancestor = self.parent();
        while let Some(next) = ancestor
            .as_ref()
            .filter(|a| a.is_nested())
            .and_then(ModuleInstance::parent)
        {
            ancestor = Some(next);
        }
        ancestor
    }

    /// The store and namespace path this module is bound at.
    pub(crate) fn binding(&self, access: &str) -> Result<(SharedStore, Vec<String>)> {
        let store = self.0.registry.store(self.0.id);
        let path = self.0.registry.namespace(self.0.id);
        match (store, path) {
            (Some(store), Some(path)) => Ok((store, path)),
            _ => Err(ModuleError::not_bound(self.name(), access)),
        }
    }

    /// The `/`-joined namespace of this module; `""` for the root.
    pub fn namespace_key(&self) -> Result<String> {
        let (_, path) = self.binding("namespace")?;
        Ok(namespace::join(&path))
    }

    /// The module's current state, read from its store.
    pub fn state(&self) -> Result<Value> {
        let (store, path) = self.binding("state")?;
        let root = store.state();
        if self.is_root() {
            return Ok(root);
        }
        Ok(state_at(&root, &path).cloned().unwrap_or(Value::Null))
    }

    // ------------------------------------------------------------------------
    // Cloning and store creation
    // ------------------------------------------------------------------------

    /// A fresh instance of the same definition with a new identity, unbound
    /// from any store. Children are rebuilt too.
    pub fn clone_module(&self, name: Option<&str>) -> ModuleInstance {
        ModuleBuilder::new(self.0.registry.clone())
            .build_named(&self.0.definition, name.unwrap_or(self.name()))
    }

    /// Create a store with this module as its root.
    pub fn to_store(&self) -> Result<Arc<MemoryStore>> {
        self.to_store_with(StoreOptions::default())
    }

    /// Create a store with this module as its root, merged with `options`.
    ///
    /// A registration plugin for this module runs before the plugins in
    /// `options`. If the store cannot be built or a plugin fails, every
    /// module bound to the new store through this module's registry is
    /// unbound again and this module is no longer marked root.
    pub fn to_store_with(&self, mut options: StoreOptions) -> Result<Arc<MemoryStore>> {
        if self.is_bound() {
            return Err(ModuleError::ModuleBoundToDifferentStore {
                module: self.name().to_string(),
                namespace: namespace::qualify_namespace(&self.0.registry, self),
            });
        }
        self.0.placement.write().unwrap().is_root = true;
        let mut plugins = std::mem::take(&mut options.plugins);
        plugins.insert(0, plugin::register_modules(vec![self.clone()]));

        debug!("ModuleInstance: creating store with root '{}'", self.name());
        let store = match MemoryStore::install(self.static_module(), options) {
            Ok(store) => store,
            Err(err) => {
                self.0.placement.write().unwrap().is_root = false;
                return Err(err.into());
            }
        };
        let shared: SharedStore = store.clone();
        if let Err(err) = MemoryStore::run_plugins(&shared, &plugins) {
            let released = binder::release_store(&self.0.registry, &shared);
            self.0.placement.write().unwrap().is_root = false;
            debug!(
                "ModuleInstance: store creation failed, released {} modules",
                released
            );
            return Err(err.into());
        }
        Ok(store)
    }

    /// The descriptor a store installs for this module and its children.
    pub fn static_module(&self) -> ModuleDescriptor {
        let handle = self.handle();
        let is_root = self.is_root();
        let state = if is_root {
            DescriptorState::Literal(self.0.initial_state.clone())
        } else {
            let snapshot = self.0.initial_state.clone();
            DescriptorState::Factory(Arc::new(move || snapshot.clone()))
        };

        ModuleDescriptor {
            namespaced: !is_root,
            state,
            getters: self
                .bound_getters()
                .map(|g| adapter::getters(g, &handle))
                .unwrap_or_default(),
            mutations: self
                .bound_mutations()
                .map(|m| adapter::mutations(m, &handle))
                .unwrap_or_default(),
            actions: self
                .bound_actions()
                .map(|a| adapter::actions(a, &handle))
                .unwrap_or_default(),
            modules: self
                .0
                .children
                .iter()
                .map(|(name, child)| (name.clone(), child.static_module()))
                .collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Access through the store
    // ------------------------------------------------------------------------

    pub fn getters(&self) -> GettersProxy {
        GettersProxy::new(self.clone())
    }

    pub fn mutations(&self) -> Result<MutationsProxy> {
        MutationsProxy::new(self.clone())
    }

    pub fn actions(&self) -> Result<ActionsProxy> {
        ActionsProxy::new(self.clone())
    }

    /// Look up a getter of this module in its store.
    pub fn get(&self, name: &str) -> Result<GetterOutput> {
        self.getters().get(name)
    }

    /// Invoke a method getter of this module with `args`.
    pub fn call_getter(&self, name: &str, args: Value) -> Result<Value> {
        self.getters().call(name, args)
    }

    /// Commit a mutation of this module.
    pub fn commit(&self, name: &str, payload: Value) -> Result<()> {
        self.mutations()?.commit(name, payload)
    }

    /// Dispatch an action of this module.
    ///
    /// Failures to resolve the action surface immediately; the returned
    /// future carries the action's own result.
    pub fn dispatch(&self, name: &str, payload: Value) -> Result<BoxFuture<Result<Value>>> {
        self.actions()?.dispatch(name, payload)
    }
}

impl PartialEq for ModuleInstance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ModuleInstance {}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("root", &self.is_root())
            .field("nested", &self.is_nested())
            .field("children", &self.0.children.keys().collect::<Vec<_>>())
            .finish()
    }
}
