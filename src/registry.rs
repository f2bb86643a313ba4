use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::id::ModuleId;
use crate::module::ModuleInstance;
use crate::store::{SharedStore, same_store};

/// One module's binding: which store it lives in and where.
pub(crate) struct Binding {
    pub(crate) store: SharedStore,
    pub(crate) path: Vec<String>,
    pub(crate) module: ModuleInstance,
}

#[derive(Default)]
struct Entries {
    stores: HashMap<ModuleId, SharedStore>,
    namespaces: HashMap<ModuleId, Vec<String>>,
    modules: HashMap<ModuleId, ModuleInstance>,
}

/// Identity-keyed record of which modules are bound to which store.
///
/// An identity has an entry in all three maps or in none of them. Bindings
/// are written and cleared in batches under one lock so a subtree is never
/// observed half-bound.
///
/// Every [`ModuleBuilder`](crate::module::ModuleBuilder) holds one; tests
/// create their own to stay isolated.
pub struct BindingRegistry {
    entries: RwLock<Entries>,
}

impl BindingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Check whether `module` is currently bound.
    pub fn contains(&self, module: &ModuleInstance) -> bool {
        self.is_bound(module.id())
    }

    /// Number of bound modules.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_bound(&self, id: ModuleId) -> bool {
        self.entries.read().unwrap().stores.contains_key(&id)
    }

    pub(crate) fn store(&self, id: ModuleId) -> Option<SharedStore> {
        self.entries.read().unwrap().stores.get(&id).cloned()
    }

    pub(crate) fn namespace(&self, id: ModuleId) -> Option<Vec<String>> {
        self.entries.read().unwrap().namespaces.get(&id).cloned()
    }

    /// Every bound module, in no particular order.
    pub fn modules(&self) -> Vec<ModuleInstance> {
        self.entries.read().unwrap().modules.values().cloned().collect()
    }

    /// Record a batch of bindings.
    pub(crate) fn insert_all(&self, bindings: Vec<Binding>) {
        let mut entries = self.entries.write().unwrap();
        for binding in bindings {
            let id = binding.module.id();
            entries.stores.insert(id, binding.store);
            entries.namespaces.insert(id, binding.path);
            entries.modules.insert(id, binding.module);
        }
    }

    /// Clear every binding to `store` and return the released modules.
    pub(crate) fn remove_store(&self, store: &SharedStore) -> Vec<ModuleInstance> {
        let mut entries = self.entries.write().unwrap();
        let ids: Vec<ModuleId> = entries
            .stores
            .iter()
            .filter(|(_, bound)| same_store(bound, store))
            .map(|(id, _)| *id)
            .collect();
        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            entries.stores.remove(&id);
            entries.namespaces.remove(&id);
            if let Some(module) = entries.modules.remove(&id) {
                released.push(module);
            }
        }
        released
    }

    /// Clear the bindings of every listed identity.
    pub(crate) fn remove_all(&self, ids: &[ModuleId]) {
        let mut entries = self.entries.write().unwrap();
        for id in ids {
            entries.stores.remove(id);
            entries.namespaces.remove(id);
            entries.modules.remove(id);
        }
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("bound", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::definition::ModuleDefinition;
    use crate::memory::MemoryStore;
    use crate::module::ModuleBuilder;

    fn fixture() -> (Arc<BindingRegistry>, ModuleInstance, SharedStore) {
        let registry = Arc::new(BindingRegistry::new());
        let module = ModuleBuilder::new(registry.clone())
            .build(&ModuleDefinition::new("cart", json!({"items": []})));
        let store: SharedStore = MemoryStore::new(Default::default());
        (registry, module, store)
    }

    #[test]
    fn new_registry_is_empty() {
        let registry = BindingRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn insert_records_all_three_maps() {
        let (registry, module, store) = fixture();
        registry.insert_all(vec![Binding {
            store: store.clone(),
            path: vec!["cart".to_string()],
            module: module.clone(),
        }]);

        assert!(registry.contains(&module));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.namespace(module.id()), Some(vec!["cart".to_string()]));
        assert!(registry.store(module.id()).is_some());
        assert_eq!(registry.modules(), vec![module.clone()]);
    }

    #[test]
    fn remove_clears_all_three_maps() {
        let (registry, module, store) = fixture();
        registry.insert_all(vec![Binding {
            store,
            path: vec!["cart".to_string()],
            module: module.clone(),
        }]);
        registry.remove_all(&[module.id()]);

        assert!(!registry.contains(&module));
        assert!(registry.namespace(module.id()).is_none());
        assert!(registry.store(module.id()).is_none());
        assert!(registry.modules().is_empty());
    }

    #[test]
    fn remove_store_releases_only_its_bindings() {
        let (registry, module, store) = fixture();
        let other_module = ModuleBuilder::new(registry.clone())
            .build(&ModuleDefinition::new("user", json!({})));
        let other_store: SharedStore = MemoryStore::new(Default::default());
        registry.insert_all(vec![
            Binding {
                store: store.clone(),
                path: vec!["cart".to_string()],
                module: module.clone(),
            },
            Binding {
                store: other_store,
                path: vec!["user".to_string()],
                module: other_module.clone(),
            },
        ]);

        assert_eq!(registry.remove_store(&store), vec![module.clone()]);
        assert!(!registry.contains(&module));
        assert!(registry.contains(&other_module));
        assert!(registry.remove_store(&store).is_empty());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let (registry, module, _store) = fixture();
        registry.remove_all(&[module.id()]);
        assert!(registry.is_empty());
    }
}
