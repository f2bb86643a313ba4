//! Flux modules: namespaced module trees bound to a state store.
//!
//! A module owns a state fragment, derived values (getters), synchronous
//! state changes (mutations), asynchronous handlers (actions) and child
//! modules. Modules are declared once as a [`ModuleDefinition`], built into
//! uniquely identified [`ModuleInstance`]s, and bound at runtime to one
//! [`Store`].
//!
//! # Namespaces
//!
//! Every bound module gets a namespace path from its position in the tree.
//! Handlers are addressed in the store by that path plus the handler name:
//! - Root: `increment`
//! - Top-level: `cart/add`
//! - Nested: `cart/items/add`
//!
//! # Example
//!
//! ```ignore
//! use flux_module::{ModuleBuilder, ModuleDefinition, MemoryStore, SharedStore};
//! use serde_json::json;
//!
//! let counter = ModuleDefinition::new("counter", json!({ "count": 0 }))
//!     .mutations(|| CounterMutations);
//!
//! let module = ModuleBuilder::default().build(&counter);
//! let store: SharedStore = MemoryStore::new(Default::default());
//! module.register(&store)?;
//!
//! module.commit("increment", json!(null))?;
//! assert_eq!(module.state()?["count"], 1);
//! ```

mod adapter;
mod binder;
pub mod config;
pub mod context;
pub mod definition;
pub mod descriptor;
pub mod error;
pub mod id;
pub mod memory;
pub mod module;
pub mod namespace;
pub mod part;
pub mod plugin;
pub mod proxy;
pub mod registry;
pub mod store;

// Re-export primary types at crate root.
pub use config::{StoreConfig, StoreOptions};
pub use context::{DispatchContext, GetterContext, MutationContext};
pub use definition::{Children, InitialState, ModuleDefinition};
pub use descriptor::{
    ActionHandler, DescriptorState, GetterHandler, GetterLookup, GetterOutput, MethodGetter,
    ModuleDescriptor, MutationHandler,
};
pub use error::{ModuleError, Result, StoreError, error_code};
pub use id::SubscriptionId;
pub use memory::{MemoryStore, MutationRecord, MutationSubscriber};
pub use module::{ModuleBuilder, ModuleHandle, ModuleInstance};
pub use part::{
    ActionTable, GetterTable, ModuleActions, ModuleGetters, ModuleMutations, MutationTable,
};
pub use plugin::{Plugin, register_modules};
pub use proxy::{ActionsProxy, GettersProxy, MutationsProxy};
pub use registry::BindingRegistry;
pub use store::{ActionContext, BoxFuture, CallOptions, SharedStore, Store};
