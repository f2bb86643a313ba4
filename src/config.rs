//! Store configuration.
//!
//! [`StoreConfig`] is the serializable part (loadable from TOML);
//! [`StoreOptions`] adds the runtime-only pieces handed to store
//! construction: plugins and extra root-level modules.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::descriptor::ModuleDescriptor;
use crate::plugin::Plugin;

/// Behavior switches for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Unknown mutation or action names fail instead of logging a warning
    /// and doing nothing.
    pub strict: bool,

    /// Emit a debug event for every committed mutation.
    #[serde(rename = "trace-mutations")]
    pub trace_mutations: bool,
}

impl StoreConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load config from disk, or return default if file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Options for creating a store from a root module.
///
/// Plugins run in order once the root module is installed. Modules listed
/// here are merged into the root module's children, replacing any child of
/// the same name.
#[derive(Default)]
pub struct StoreOptions {
    pub config: StoreConfig,
    pub plugins: Vec<Plugin>,
    pub modules: BTreeMap<String, ModuleDescriptor>,
}

impl StoreOptions {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Append a plugin.
    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Add an extra static module at the root.
    pub fn module(mut self, name: impl Into<String>, module: ModuleDescriptor) -> Self {
        self.modules.insert(name.into(), module);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("config", &self.config)
            .field("plugins", &self.plugins.len())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
