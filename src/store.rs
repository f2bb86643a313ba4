use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::descriptor::{GetterOutput, ModuleDescriptor};
use crate::error::StoreError;
use crate::namespace;

/// A boxed, `Send`-able future returned by action handlers and dispatch.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A reference-counted handle to a store.
pub type SharedStore = Arc<dyn Store>;

/// Options for a commit or dispatch.
///
/// `root: true` means the name is already fully qualified. Calls made by the
/// module proxies always pass it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub root: bool,
}

impl CallOptions {
    pub fn root() -> Self {
        Self { root: true }
    }

    pub fn local() -> Self {
        Self { root: false }
    }
}

/// The mutable-state store a module tree is bound to.
///
/// Paths are module paths from the root (exclusive). Qualified handler
/// names are namespace segments joined with `/` followed by the handler
/// name, e.g. `"cart/items/add"`.
pub trait Store: Send + Sync {
    /// Install a module (and its children) at `path`. The parent path must
    /// already exist.
    fn register_module(&self, path: &[String], module: ModuleDescriptor) -> Result<(), StoreError>;

    /// Remove the module at `path` along with its children and state.
    fn unregister_module(&self, path: &[String]) -> Result<(), StoreError>;

    /// Check whether a module is installed at `path`.
    fn has_module(&self, path: &[String]) -> bool;

    /// A snapshot of the whole state tree.
    fn state(&self) -> Value;

    /// Look up a getter by qualified name.
    fn getter(&self, name: &str) -> Result<GetterOutput, StoreError>;

    /// Run a mutation by qualified name.
    fn commit(&self, name: &str, payload: Value, options: CallOptions) -> Result<(), StoreError>;

    /// Run an action by qualified name. The returned future is already
    /// scheduled in the sense that the caller decides whether to await it.
    fn dispatch(
        &self,
        name: &str,
        payload: Value,
        options: CallOptions,
    ) -> BoxFuture<Result<Value, StoreError>>;
}

/// Compare two store handles by identity.
pub fn same_store(a: &SharedStore, b: &SharedStore) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Walk a state tree along `path`. Returns `None` if a segment is missing.
pub fn state_at<'a>(tree: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(tree, |node, segment| node.get(segment))
}

/// Mutable variant of [`state_at`].
pub fn state_at_mut<'a>(tree: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(tree, |node, segment| node.get_mut(segment))
}

/// The action context a store hands to an action handler.
///
/// Reads go through the store on every call, so an action that suspends
/// observes state committed in the meantime. `getter`, `commit` and
/// `dispatch` resolve names inside the module's namespace unless
/// [`CallOptions::root`] is passed.
#[derive(Clone)]
pub struct ActionContext {
    store: SharedStore,
    path: Vec<String>,
    namespace: String,
}

impl ActionContext {
    /// `path` locates the module's state; `namespace` is the handler prefix
    /// (empty, or ending in `/`).
    pub fn new(store: SharedStore, path: Vec<String>, namespace: String) -> Self {
        Self {
            store,
            path,
            namespace,
        }
    }

    /// The module's current state.
    pub fn state(&self) -> Value {
        let root = self.store.state();
        state_at(&root, &self.path).cloned().unwrap_or(Value::Null)
    }

    /// The whole state tree.
    pub fn root_state(&self) -> Value {
        self.store.state()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    fn qualify(&self, name: &str, options: CallOptions) -> String {
        if options.root {
            name.to_string()
        } else {
            format!("{}{}", self.namespace, name)
        }
    }

    /// Look up a getter in this module's namespace.
    pub fn getter(&self, name: &str) -> Result<GetterOutput, StoreError> {
        self.store.getter(&self.qualify(name, CallOptions::local()))
    }

    pub fn commit(
        &self,
        name: &str,
        payload: Value,
        options: CallOptions,
    ) -> Result<(), StoreError> {
        self.store
            .commit(&self.qualify(name, options), payload, CallOptions::root())
    }

    pub fn dispatch(
        &self,
        name: &str,
        payload: Value,
        options: CallOptions,
    ) -> BoxFuture<Result<Value, StoreError>> {
        self.store
            .dispatch(&self.qualify(name, options), payload, CallOptions::root())
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("path", &namespace::join(&self.path))
            .field("namespace", &self.namespace)
            .finish()
    }
}
