//! Store construction plugins.

use std::sync::Arc;

use tracing::debug;

use crate::module::ModuleInstance;
use crate::store::SharedStore;

/// A function run once against a freshly created store.
pub type Plugin = Arc<dyn Fn(&SharedStore) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Plugin`].
pub fn plugin<F>(f: F) -> Plugin
where
    F: Fn(&SharedStore) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A plugin that registers each of `modules` with the store, in order.
///
/// Stops at the first module that fails to register.
pub fn register_modules(modules: Vec<ModuleInstance>) -> Plugin {
    plugin(move |store| {
        for module in &modules {
            debug!("Plugin: registering '{}'", module.name());
            module.register(store)?;
        }
        Ok(())
    })
}
