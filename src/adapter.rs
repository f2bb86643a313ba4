//! Static handler adapters.
//!
//! Turns a module's bound parts into the flat handler tables of a
//! [`ModuleDescriptor`](crate::descriptor::ModuleDescriptor). Every adapted
//! handler builds a fresh context from the store-supplied arguments of the
//! call it serves, so handler bodies never see cached state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::{DispatchContext, GetterContext, MutationContext};
use crate::descriptor::{
    ActionHandler, GetterHandler, GetterLookup, GetterOutput, MethodGetter, MutationHandler,
};
use crate::module::ModuleHandle;
use crate::part::{BoundActions, BoundGetter, BoundGetters, BoundMutations};
use crate::store::{ActionContext, BoxFuture};

fn getter_handler<F>(f: F) -> GetterHandler
where
    F: Fn(Value, Arc<dyn GetterLookup>, Value) -> anyhow::Result<GetterOutput>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

fn mutation_handler<F>(f: F) -> MutationHandler
where
    F: Fn(&mut Value, Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn action_handler<F>(f: F) -> ActionHandler
where
    F: Fn(ActionContext, Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Computed getters come back evaluated; method getters come back bound to
/// the call's context and wait for their argument.
pub(crate) fn getters(
    bound: &BoundGetters,
    module: &ModuleHandle,
) -> BTreeMap<String, GetterHandler> {
    bound
        .iter()
        .map(|(name, getter)| {
            let module = module.clone();
            let handler = match getter.clone() {
                BoundGetter::Computed(f) => getter_handler(move |state, getters, root_state| {
                    let ctx = GetterContext::new(state, getters, root_state, module.clone());
                    Ok(GetterOutput::Value(f(&ctx)?))
                }),
                BoundGetter::Method(f) => getter_handler(move |state, getters, root_state| {
                    let ctx = GetterContext::new(state, getters, root_state, module.clone());
                    let f = f.clone();
                    let method: MethodGetter = Arc::new(move |args: Value| f(&ctx, args));
                    Ok(GetterOutput::Method(method))
                }),
            };
            (name.clone(), handler)
        })
        .collect()
}

pub(crate) fn mutations(
    bound: &BoundMutations,
    module: &ModuleHandle,
) -> BTreeMap<String, MutationHandler> {
    bound
        .iter()
        .map(|(name, f)| {
            let f = f.clone();
            let module = module.clone();
            let handler = mutation_handler(move |state, payload| {
                let mut ctx = MutationContext::new(state, module.clone());
                f(&mut ctx, payload)
            });
            (name.clone(), handler)
        })
        .collect()
}

pub(crate) fn actions(
    bound: &BoundActions,
    module: &ModuleHandle,
) -> BTreeMap<String, ActionHandler> {
    bound
        .iter()
        .map(|(name, f)| {
            let f = f.clone();
            let module = module.clone();
            let handler = action_handler(move |context, payload| {
                f(DispatchContext::new(context, module.clone()), payload)
            });
            (name.clone(), handler)
        })
        .collect()
}
