//! Namespace resolution.
//!
//! A namespace path is the list of module names from the tree root
//! (exclusive) to a module (inclusive). The root's path is empty.

use crate::module::ModuleInstance;
use crate::registry::BindingRegistry;

/// Join path segments with `/`.
pub fn join(path: &[String]) -> String {
    path.join("/")
}

/// The qualified name of `handler` in the module at `namespace`.
///
/// An empty namespace (the root) yields the bare handler name.
pub fn qualify(namespace: &str, handler: &str) -> String {
    if namespace.is_empty() {
        handler.to_string()
    } else {
        format!("{}/{}", namespace, handler)
    }
}

/// The `/`-joined namespace of `module`.
///
/// Uses the recorded path when the module is bound. Falls back to the bare
/// module name otherwise.
pub fn qualify_namespace(registry: &BindingRegistry, module: &ModuleInstance) -> String {
    match registry.namespace(module.id()) {
        Some(path) => join(&path),
        None => module.name().to_string(),
    }
}
