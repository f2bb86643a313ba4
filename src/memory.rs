//! In-memory reference store.
//!
//! [`MemoryStore`] keeps one JSON state tree and flat handler tables keyed by
//! qualified name (`"cart/items/add"`). Child module state lives under the
//! parent's state object at the child's key.
//!
//! Handlers never run under the store's lock. Getters see snapshots;
//! mutations edit a copy of their module's state that is written back when
//! the handler returns, so a failed mutation leaves state untouched.
//!
//! A mutation handler may commit into its descendants: child module keys
//! that changed in the store while the handler ran keep the store's value
//! on write-back, and a child key the handler dropped is put back.
//! Committing into the running module or one of its ancestors from the same
//! thread would be overwritten and is rejected with
//! [`StoreError::ReentrantCommit`].

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, ThreadId};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{StoreConfig, StoreOptions};
use crate::descriptor::{
    ActionHandler, GetterHandler, GetterLookup, GetterOutput, ModuleDescriptor, MutationHandler,
};
use crate::error::StoreError;
use crate::id::SubscriptionId;
use crate::namespace;
use crate::plugin::Plugin;
use crate::store::{
    ActionContext, BoxFuture, CallOptions, SharedStore, Store, state_at, state_at_mut,
};

/// One committed mutation, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// Qualified mutation name.
    pub name: String,
    pub payload: Value,
}

/// Callback type for mutation notifications: `(mutation, root_state)`.
pub type MutationSubscriber = Arc<dyn Fn(&MutationRecord, &Value) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum HandlerKind {
    Getter,
    Mutation,
    Action,
}

impl HandlerKind {
    fn label(self) -> &'static str {
        match self {
            HandlerKind::Getter => "getter",
            HandlerKind::Mutation => "mutation",
            HandlerKind::Action => "action",
        }
    }
}

#[derive(Clone)]
struct Entry<H> {
    handler: H,
    path: Vec<String>,
    namespace: String,
}

struct Installed {
    handlers: Vec<(HandlerKind, String)>,
    /// Handler prefix: empty, or ending in `/`.
    namespace: String,
}

#[derive(Default)]
struct Tables {
    state: Value,
    /// Keyed by `/`-joined path; the root is `""`.
    modules: BTreeMap<String, Installed>,
    getters: BTreeMap<String, Entry<GetterHandler>>,
    mutations: BTreeMap<String, Entry<MutationHandler>>,
    actions: BTreeMap<String, Entry<ActionHandler>>,
}

impl Tables {
    fn contains(&self, kind: HandlerKind, name: &str) -> bool {
        match kind {
            HandlerKind::Getter => self.getters.contains_key(name),
            HandlerKind::Mutation => self.mutations.contains_key(name),
            HandlerKind::Action => self.actions.contains_key(name),
        }
    }

    fn remove(&mut self, kind: HandlerKind, name: &str) {
        match kind {
            HandlerKind::Getter => {
                self.getters.remove(name);
            }
            HandlerKind::Mutation => {
                self.mutations.remove(name);
            }
            HandlerKind::Action => {
                self.actions.remove(name);
            }
        }
    }
}

fn child_namespace(parent: &str, path: &[String], descriptor: &ModuleDescriptor) -> String {
    match path.last() {
        Some(name) if descriptor.namespaced => format!("{}{}/", parent, name),
        _ => parent.to_string(),
    }
}

fn child_path(path: &[String], name: &str) -> Vec<String> {
    let mut out = path.to_vec();
    out.push(name.to_string());
    out
}

/// Check that installing `descriptor` at `path` would not collide with any
/// installed or staged handler.
fn check(
    tables: &Tables,
    path: &[String],
    parent_namespace: &str,
    descriptor: &ModuleDescriptor,
    staged: &mut HashSet<(HandlerKind, String)>,
) -> Result<(), StoreError> {
    let namespace = child_namespace(parent_namespace, path, descriptor);
    let names = descriptor
        .getters
        .keys()
        .map(|n| (HandlerKind::Getter, n))
        .chain(descriptor.mutations.keys().map(|n| (HandlerKind::Mutation, n)))
        .chain(descriptor.actions.keys().map(|n| (HandlerKind::Action, n)));
    for (kind, name) in names {
        let qualified = format!("{}{}", namespace, name);
        if tables.contains(kind, &qualified) || !staged.insert((kind, qualified.clone())) {
            return Err(StoreError::DuplicateHandler {
                kind: kind.label(),
                name: qualified,
            });
        }
    }
    for (name, child) in &descriptor.modules {
        check(tables, &child_path(path, name), &namespace, child, staged)?;
    }
    Ok(())
}

/// Names of the modules installed directly under `path`.
fn child_keys(tables: &Tables, path: &[String]) -> Vec<String> {
    let prefix = if path.is_empty() {
        String::new()
    } else {
        format!("{}/", namespace::join(path))
    };
    tables
        .modules
        .keys()
        .filter_map(|key| key.strip_prefix(prefix.as_str()))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .map(str::to_string)
        .collect()
}

fn insert_state(tree: &mut Value, path: &[String], value: Value) {
    let Some((key, parent_path)) = path.split_last() else {
        *tree = value;
        return;
    };
    if let Some(parent) = state_at_mut(tree, parent_path) {
        if !parent.is_object() {
            *parent = Value::Object(Map::new());
        }
        if let Some(object) = parent.as_object_mut() {
            object.insert(key.clone(), value);
        }
    }
}

fn remove_state(tree: &mut Value, path: &[String]) {
    let Some((key, parent_path)) = path.split_last() else {
        return;
    };
    if let Some(object) = state_at_mut(tree, parent_path).and_then(Value::as_object_mut) {
        object.remove(key);
    }
}

fn entry<H>(handler: H, path: &[String], namespace: &str) -> Entry<H> {
    Entry {
        handler,
        path: path.to_vec(),
        namespace: namespace.to_string(),
    }
}

/// Install a checked descriptor tree. Cannot fail.
fn apply(
    tables: &mut Tables,
    path: &[String],
    parent_namespace: &str,
    descriptor: &ModuleDescriptor,
) {
    let namespace = child_namespace(parent_namespace, path, descriptor);
    insert_state(&mut tables.state, path, descriptor.state.resolve());

    let mut handlers = Vec::new();
    for (name, handler) in &descriptor.getters {
        let qualified = format!("{}{}", namespace, name);
        tables.getters.insert(qualified.clone(), entry(handler.clone(), path, &namespace));
        handlers.push((HandlerKind::Getter, qualified));
    }
    for (name, handler) in &descriptor.mutations {
        let qualified = format!("{}{}", namespace, name);
        tables.mutations.insert(qualified.clone(), entry(handler.clone(), path, &namespace));
        handlers.push((HandlerKind::Mutation, qualified));
    }
    for (name, handler) in &descriptor.actions {
        let qualified = format!("{}{}", namespace, name);
        tables.actions.insert(qualified.clone(), entry(handler.clone(), path, &namespace));
        handlers.push((HandlerKind::Action, qualified));
    }
    tables.modules.insert(
        namespace::join(path),
        Installed {
            handlers,
            namespace: namespace.clone(),
        },
    );
    debug!("MemoryStore: installed module at '{}'", namespace::join(path));

    for (name, child) in &descriptor.modules {
        apply(tables, &child_path(path, name), &namespace, child);
    }
}

/// A [`Store`] holding everything in memory.
pub struct MemoryStore {
    this: Weak<MemoryStore>,
    config: StoreConfig,
    tables: RwLock<Tables>,
    subscribers: RwLock<Vec<(SubscriptionId, MutationSubscriber)>>,
    next_subscription: AtomicU64,
    /// Module paths with a mutation handler running, per thread.
    committing: Mutex<Vec<(ThreadId, Vec<String>)>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Marks one running mutation; cleared on drop.
struct Committing<'a> {
    store: &'a MemoryStore,
    thread: ThreadId,
    path: Vec<String>,
}

impl Drop for Committing<'_> {
    fn drop(&mut self) {
        let mut committing = self.store.committing.lock().unwrap();
        if let Some(i) = committing
            .iter()
            .rposition(|(thread, path)| *thread == self.thread && *path == self.path)
        {
            committing.remove(i);
        }
    }
}

impl MemoryStore {
    /// Create a store with an empty root module.
    pub fn new(config: StoreConfig) -> Arc<Self> {
        let root = ModuleDescriptor {
            namespaced: false,
            ..ModuleDescriptor::default()
        };
        let store = Self::empty(config);
        apply(&mut store.tables.write().unwrap(), &[], "", &root);
        store
    }

    /// Create a store around `root`, merge the extra modules from
    /// `options` into it, then run the plugins in order.
    pub fn create(
        root: ModuleDescriptor,
        mut options: StoreOptions,
    ) -> Result<Arc<Self>, StoreError> {
        let plugins = std::mem::take(&mut options.plugins);
        let store = Self::install(root, options)?;
        let shared: SharedStore = store.clone();
        Self::run_plugins(&shared, &plugins)?;
        Ok(store)
    }

    /// [`create`](Self::create) without the plugins. Plugins left in
    /// `options` are ignored.
    pub(crate) fn install(
        root: ModuleDescriptor,
        options: StoreOptions,
    ) -> Result<Arc<Self>, StoreError> {
        let StoreOptions { config, modules, .. } = options;
        let mut root = root;
        root.modules.extend(modules);

        let store = Self::empty(config);
        {
            let mut tables = store.tables.write().unwrap();
            check(&tables, &[], "", &root, &mut HashSet::new())?;
            apply(&mut tables, &[], "", &root);
        }
        debug!("MemoryStore: created with {} root modules", root.modules.len());
        Ok(store)
    }

    /// Run `plugins` in order against `store`, stopping at the first failure.
    pub(crate) fn run_plugins(store: &SharedStore, plugins: &[Plugin]) -> Result<(), StoreError> {
        for (i, plugin) in plugins.iter().enumerate() {
            debug!("MemoryStore: running plugin {}", i);
            plugin(store).map_err(StoreError::Plugin)?;
        }
        Ok(())
    }

    fn empty(config: StoreConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| MemoryStore {
            this: this.clone(),
            config,
            tables: RwLock::new(Tables::default()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            committing: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribe to committed mutations.
    ///
    /// The handler runs synchronously after each successful commit with the
    /// mutation and the new root state.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&MutationRecord, &Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Qualified names of all installed mutations.
    pub fn mutation_names(&self) -> Vec<String> {
        self.tables.read().unwrap().mutations.keys().cloned().collect()
    }

    /// Qualified names of all installed actions.
    pub fn action_names(&self) -> Vec<String> {
        self.tables.read().unwrap().actions.keys().cloned().collect()
    }

    /// Qualified names of all installed getters.
    pub fn getter_names(&self) -> Vec<String> {
        self.tables.read().unwrap().getters.keys().cloned().collect()
    }

    fn unknown(&self, err: StoreError) -> Result<(), StoreError> {
        if self.config.strict {
            return Err(err);
        }
        warn!("MemoryStore: {}, ignoring", err);
        Ok(())
    }

    /// Mark a mutation of the module at `path` as running on this thread.
    /// Fails if this thread is already running a mutation of that module or
    /// of one of its descendants.
    fn begin_commit(&self, name: &str, path: &[String]) -> Result<Committing<'_>, StoreError> {
        let thread = thread::current().id();
        let mut committing = self.committing.lock().unwrap();
        let overlaps = committing
            .iter()
            .any(|(t, running)| *t == thread && running.starts_with(path));
        if overlaps {
            return Err(StoreError::ReentrantCommit(name.to_string()));
        }
        committing.push((thread, path.to_vec()));
        Ok(Committing {
            store: self,
            thread,
            path: path.to_vec(),
        })
    }

    fn notify(&self, record: &MutationRecord, root: &Value) {
        let subscribers: Vec<MutationSubscriber> = self
            .subscribers
            .read()
            .unwrap()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in subscribers {
            handler(record, root);
        }
    }
}

impl Store for MemoryStore {
    fn register_module(&self, path: &[String], module: ModuleDescriptor) -> Result<(), StoreError> {
        let Some((_, parent_path)) = path.split_last() else {
            return Err(StoreError::RootPath);
        };
        let key = namespace::join(path);

        let mut tables = self.tables.write().unwrap();
        if tables.modules.contains_key(&key) {
            return Err(StoreError::DuplicateModule(key));
        }
        let parent_namespace = match tables.modules.get(&namespace::join(parent_path)) {
            Some(parent) => parent.namespace.clone(),
            None => return Err(StoreError::ModuleNotFound(namespace::join(parent_path))),
        };

        check(&tables, path, &parent_namespace, &module, &mut HashSet::new())?;
        apply(&mut tables, path, &parent_namespace, &module);
        debug!("MemoryStore: registered module '{}'", key);
        Ok(())
    }

    fn unregister_module(&self, path: &[String]) -> Result<(), StoreError> {
        if path.is_empty() {
            return Err(StoreError::RootPath);
        }
        let key = namespace::join(path);

        let mut tables = self.tables.write().unwrap();
        if !tables.modules.contains_key(&key) {
            return Err(StoreError::ModuleNotFound(key));
        }
        let prefix = format!("{}/", key);
        let doomed: Vec<String> = tables
            .modules
            .keys()
            .filter(|k| **k == key || k.starts_with(&prefix))
            .cloned()
            .collect();
        for module_key in &doomed {
            if let Some(installed) = tables.modules.remove(module_key) {
                for (kind, name) in &installed.handlers {
                    tables.remove(*kind, name);
                }
            }
        }
        remove_state(&mut tables.state, path);
        debug!("MemoryStore: unregistered module '{}' ({} modules)", key, doomed.len());
        Ok(())
    }

    fn has_module(&self, path: &[String]) -> bool {
        self.tables
            .read()
            .unwrap()
            .modules
            .contains_key(&namespace::join(path))
    }

    fn state(&self) -> Value {
        self.tables.read().unwrap().state.clone()
    }

    fn getter(&self, name: &str) -> Result<GetterOutput, StoreError> {
        let (entry, state, root_state) = {
            let tables = self.tables.read().unwrap();
            let entry = tables
                .getters
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::UnknownGetter(name.to_string()))?;
            let state = state_at(&tables.state, &entry.path)
                .cloned()
                .unwrap_or(Value::Null);
            (entry, state, tables.state.clone())
        };
        let lookup: Arc<dyn GetterLookup> = Arc::new(ScopedGetters {
            store: self.this.clone(),
            namespace: entry.namespace.clone(),
        });
        (entry.handler)(state, lookup, root_state).map_err(StoreError::Handler)
    }

    fn commit(&self, name: &str, payload: Value, _options: CallOptions) -> Result<(), StoreError> {
        let found = self.tables.read().unwrap().mutations.get(name).cloned();
        let Some(entry) = found else {
            return self.unknown(StoreError::UnknownMutation(name.to_string()));
        };

        let running = self.begin_commit(name, &entry.path)?;
        let (mut local, children) = {
            let tables = self.tables.read().unwrap();
            let local = state_at(&tables.state, &entry.path)
                .cloned()
                .unwrap_or(Value::Null);
            let children: Vec<(String, Option<Value>)> = child_keys(&tables, &entry.path)
                .into_iter()
                .map(|key| {
                    let before = local.get(&key).cloned();
                    (key, before)
                })
                .collect();
            (local, children)
        };
        let record = MutationRecord {
            name: name.to_string(),
            payload: payload.clone(),
        };
        let outcome = (entry.handler)(&mut local, payload);
        drop(running);
        outcome.map_err(StoreError::Handler)?;

        let root = {
            let mut tables = self.tables.write().unwrap();
            if let Some(slot) = state_at_mut(&mut tables.state, &entry.path) {
                for (key, before) in &children {
                    let current = slot.get(key).cloned();
                    if current == *before && local.get(key).is_some() {
                        continue;
                    }
                    if let Some(object) = local.as_object_mut() {
                        match current {
                            Some(value) => {
                                object.insert(key.clone(), value);
                            }
                            None => {
                                object.remove(key);
                            }
                        }
                    }
                }
                *slot = local;
            }
            tables.state.clone()
        };
        if self.config.trace_mutations {
            debug!("MemoryStore: committed '{}'", name);
        }
        self.notify(&record, &root);
        Ok(())
    }

    fn dispatch(
        &self,
        name: &str,
        payload: Value,
        _options: CallOptions,
    ) -> BoxFuture<Result<Value, StoreError>> {
        let found = self.tables.read().unwrap().actions.get(name).cloned();
        let Some(entry) = found else {
            let result = self
                .unknown(StoreError::UnknownAction(name.to_string()))
                .map(|()| Value::Null);
            return Box::pin(std::future::ready(result));
        };
        let Some(store) = self.this.upgrade() else {
            return Box::pin(std::future::ready(Err(StoreError::Detached)));
        };

        let store: SharedStore = store;
        let context = ActionContext::new(store, entry.path.clone(), entry.namespace.clone());
        let pending = (entry.handler)(context, payload);
        Box::pin(async move { pending.await.map_err(StoreError::Handler) })
    }
}

/// Getter lookup scoped to one module's namespace.
struct ScopedGetters {
    store: Weak<MemoryStore>,
    namespace: String,
}

impl GetterLookup for ScopedGetters {
    fn get(&self, name: &str) -> Result<GetterOutput, StoreError> {
        let store = self.store.upgrade().ok_or(StoreError::Detached)?;
        store.getter(&format!("{}{}", self.namespace, name))
    }
}
