//! Attaching and detaching module trees.
//!
//! Binding is staged: the whole subtree's namespace paths are computed and
//! checked first, the store registration happens next, and the registry is
//! written last in one batch. A failure at any step leaves the registry as
//! it was.

use tracing::debug;

use crate::error::{ModuleError, Result};
use crate::id::ModuleId;
use crate::module::{ModuleHandle, ModuleInstance};
use crate::namespace;
use crate::registry::{Binding, BindingRegistry};
use crate::store::{SharedStore, same_store};

struct Staged {
    module: ModuleInstance,
    path: Vec<String>,
    is_nested: bool,
    parent: Option<ModuleHandle>,
}

fn stage(
    module: &ModuleInstance,
    store: &SharedStore,
    path: Vec<String>,
    parent: Option<ModuleHandle>,
    out: &mut Vec<Staged>,
) -> Result<()> {
    let registry = module.registry();
    if let Some(bound) = registry.store(module.id()) {
        let name = module.name().to_string();
        let namespace = namespace::qualify_namespace(registry, module);
        return Err(if same_store(&bound, store) {
            ModuleError::ModuleBoundToSameStore {
                module: name,
                namespace,
            }
        } else {
            ModuleError::ModuleBoundToDifferentStore {
                module: name,
                namespace,
            }
        });
    }

    out.push(Staged {
        module: module.clone(),
        path: path.clone(),
        is_nested: parent.is_some(),
        parent,
    });

    let handle = module.handle();
    for (_, child) in module.children() {
        let mut child_path = path.clone();
        child_path.push(child.name().to_string());
        stage(child, store, child_path, Some(handle.clone()), out)?;
    }
    Ok(())
}

/// Bind `module` and every descendant to `store`.
///
/// A root module takes the empty path and is assumed to be installed in the
/// store already. Any other module is installed at `[name]`.
pub(crate) fn bind(module: &ModuleInstance, store: &SharedStore) -> Result<()> {
    let path = if module.is_root() {
        Vec::new()
    } else {
        vec![module.name().to_string()]
    };

    let mut staged = Vec::new();
    stage(module, store, path.clone(), None, &mut staged)?;

    if !module.is_root() {
        store.register_module(&path, module.static_module())?;
        debug!(
            "Binder: registered '{}' with the store at '{}'",
            module.name(),
            namespace::join(&path)
        );
    }

    let count = staged.len();
    let mut bindings = Vec::with_capacity(count);
    for entry in staged {
        entry.module.set_placement(entry.is_nested, entry.parent);
        bindings.push(Binding {
            store: store.clone(),
            path: entry.path,
            module: entry.module,
        });
    }
    module.registry().insert_all(bindings);
    debug!("Binder: bound '{}' ({} modules)", module.name(), count);
    Ok(())
}

fn collect_ids(module: &ModuleInstance, out: &mut Vec<ModuleId>) {
    out.push(module.id());
    for (_, child) in module.children() {
        collect_ids(child, out);
    }
}

/// Unbind a top-level `module`: remove it from its store, then clear the
/// registry entries of the whole subtree. Children are never removed from
/// the store on their own.
pub(crate) fn unbind(module: &ModuleInstance) -> Result<()> {
    let (store, path) = module.binding("unregister")?;
    store.unregister_module(&path)?;
    debug!(
        "Binder: unregistered '{}' from the store at '{}'",
        module.name(),
        namespace::join(&path)
    );

    let mut ids = Vec::new();
    collect_ids(module, &mut ids);
    module.registry().remove_all(&ids);
    debug!("Binder: unbound '{}' ({} modules)", module.name(), ids.len());
    Ok(())
}

/// Forget every binding to `store` recorded in `registry`, for a store that
/// never reached its caller. Returns how many modules were released.
pub(crate) fn release_store(registry: &BindingRegistry, store: &SharedStore) -> usize {
    let released = registry.remove_store(store);
    for module in &released {
        module.set_placement(false, None);
    }
    debug!("Binder: released {} modules from a failed store", released.len());
    released.len()
}
