use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Callers match on these,
// never on the human-readable message string.

/// Stable error code constants, one per [`ModuleError`] kind.
pub mod error_code {
    pub const UNDEFINED_STORE: &str = "UNDEFINED_STORE_ERROR";
    pub const INVALID_STORE: &str = "INVALID_STORE_ERROR";
    pub const MODULE_BOUND_TO_SAME_STORE: &str = "MODULE_BOUND_TO_SAME_STORE_ERROR";
    pub const MODULE_BOUND_TO_DIFFERENT_STORE: &str = "MODULE_BOUND_TO_DIFFERENT_STORE_ERROR";
    pub const MODULE_NOT_BOUND_TO_STORE: &str = "MODULE_NOT_BOUND_TO_STORE_ERROR";
    pub const ROOT_MODULE_UNREGISTER: &str = "ROOT_MODULE_UNREGISTER_ERROR";
    pub const NESTED_MODULE_UNREGISTER: &str = "NESTED_MODULE_UNREGISTER_ERROR";
    pub const NO_MUTATIONS_DEFINED: &str = "NO_MUTATIONS_DEFINED_ERROR";
    pub const NO_ACTIONS_DEFINED: &str = "NO_ACTIONS_DEFINED_ERROR";
    pub const UNKNOWN_HANDLER: &str = "UNKNOWN_HANDLER_ERROR";
    pub const GETTER_SHAPE: &str = "GETTER_SHAPE_ERROR";
    pub const STORE: &str = "STORE_ERROR";
}

// ── ModuleError ─────────────────────────────────────────────────────

/// Errors raised by the module binding layer.
///
/// All of these are synchronous, user-facing failures surfaced at the point
/// of the offending call. None are retried.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Store instance provided to '{module}.register(store)' is undefined.")]
    UndefinedStore { module: String },

    #[error("Store instance provided to '{module}.register(store)' is not a valid store instance.")]
    InvalidStore { module: String },

    #[error(
        "Module '{namespace}' is already registered to the provided store. \
         There is no need to call '{module}.register()' again."
    )]
    ModuleBoundToSameStore { module: String, namespace: String },

    #[error(
        "Module '{namespace}' is registered to another store. Modules can only be \
         registered to one store at a time. You can unregister this module by calling \
         '{module}.unregister()' or create a new module instance with '{module}.clone()'."
    )]
    ModuleBoundToDifferentStore { module: String, namespace: String },

    #[error(
        "Module '{module}' is not registered to a store. Call '{module}.register(store)' \
         before accessing '{module}.{access}'."
    )]
    ModuleNotBoundToStore { module: String, access: String },

    #[error("Module '{module}' cannot be unregistered because it is the root module.")]
    RootModuleUnregister { module: String },

    #[error("{}", nested_unregister_message(.module, .parent, .parent_is_root))]
    NestedModuleUnregister {
        module: String,
        parent: String,
        parent_is_root: bool,
    },

    #[error("No mutations defined on module '{module}'.")]
    NoMutationsDefined { module: String },

    #[error("No actions defined on module '{module}'.")]
    NoActionsDefined { module: String },

    #[error("Module '{module}' has no {kind} named '{name}'.")]
    UnknownHandler {
        module: String,
        kind: &'static str,
        name: String,
    },

    #[error("Getter '{module}.{name}' is not a {expected} getter.")]
    GetterShape {
        module: String,
        name: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn nested_unregister_message(module: &str, parent: &str, parent_is_root: &bool) -> String {
    if *parent_is_root {
        format!(
            "Module '{module}' cannot be unregistered because it is nested under the root \
             and therefore not dynamic."
        )
    } else {
        format!(
            "Module '{module}' cannot be unregistered because it is a nested module. You can \
             unregister its parent module ('{parent}') by calling '{parent}.unregister()'."
        )
    }
}

impl ModuleError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ModuleError::UndefinedStore { .. } => error_code::UNDEFINED_STORE,
            ModuleError::InvalidStore { .. } => error_code::INVALID_STORE,
            ModuleError::ModuleBoundToSameStore { .. } => error_code::MODULE_BOUND_TO_SAME_STORE,
            ModuleError::ModuleBoundToDifferentStore { .. } => {
                error_code::MODULE_BOUND_TO_DIFFERENT_STORE
            }
            ModuleError::ModuleNotBoundToStore { .. } => error_code::MODULE_NOT_BOUND_TO_STORE,
            ModuleError::RootModuleUnregister { .. } => error_code::ROOT_MODULE_UNREGISTER,
            ModuleError::NestedModuleUnregister { .. } => error_code::NESTED_MODULE_UNREGISTER,
            ModuleError::NoMutationsDefined { .. } => error_code::NO_MUTATIONS_DEFINED,
            ModuleError::NoActionsDefined { .. } => error_code::NO_ACTIONS_DEFINED,
            ModuleError::UnknownHandler { .. } => error_code::UNKNOWN_HANDLER,
            ModuleError::GetterShape { .. } => error_code::GETTER_SHAPE,
            ModuleError::Store(_) => error_code::STORE,
        }
    }

    pub(crate) fn not_bound(module: &str, access: &str) -> Self {
        ModuleError::ModuleNotBoundToStore {
            module: module.to_string(),
            access: access.to_string(),
        }
    }
}

// ── StoreError ──────────────────────────────────────────────────────

/// Errors raised by a [`Store`](crate::store::Store) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown getter: {0}")]
    UnknownGetter(String),

    #[error("unknown mutation type: {0}")]
    UnknownMutation(String),

    #[error("unknown action type: {0}")]
    UnknownAction(String),

    #[error("module not registered at path '{0}'")]
    ModuleNotFound(String),

    #[error("module already registered at path '{0}'")]
    DuplicateModule(String),

    #[error("duplicate {kind} key: {name}")]
    DuplicateHandler { kind: &'static str, name: String },

    #[error("cannot register or unregister the root module by path")]
    RootPath,

    #[error("reentrant commit of '{0}' would be overwritten by a running mutation")]
    ReentrantCommit(String),

    #[error("store has been dropped")]
    Detached,

    #[error("plugin failed: {0:#}")]
    Plugin(#[source] anyhow::Error),

    #[error("handler failed: {0:#}")]
    Handler(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ModuleError>;
