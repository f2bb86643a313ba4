//! End-to-end behavior of module trees bound to a store.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use flux_module::*;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct Counter {
    count: i64,
}

struct CounterMutations;

impl ModuleMutations for CounterMutations {
    fn mutations(table: &mut MutationTable<Self>) {
        table.on("increment", |_, ctx, _| ctx.update(|s: &mut Counter| s.count += 1));
    }
}

struct ItemMutations;

impl ModuleMutations for ItemMutations {
    fn mutations(table: &mut MutationTable<Self>) {
        table.on("add_item", Self::add_item);
    }
}

impl ItemMutations {
    fn add_item(&self, ctx: &mut MutationContext<'_>, payload: Value) -> anyhow::Result<()> {
        match ctx.state_mut()["items"].as_array_mut() {
            Some(items) => items.push(payload),
            None => anyhow::bail!("items is not a list"),
        }
        Ok(())
    }
}

fn items() -> ModuleDefinition {
    ModuleDefinition::new("items", json!({"items": []})).mutations(|| ItemMutations)
}

/// `R { count } / C { items }`
fn root_with_child() -> ModuleDefinition {
    let child = items();
    ModuleDefinition::new("R", json!({"count": 0}))
        .mutations(|| CounterMutations)
        .children(move || Children::new().mount("C", &child))
}

fn store() -> SharedStore {
    MemoryStore::new(StoreConfig::default())
}

fn builder() -> ModuleBuilder {
    ModuleBuilder::new(Arc::new(BindingRegistry::new()))
}

// ============================================================================
// Registration round trips
// ============================================================================

#[test]
fn register_then_unregister_leaves_registry_empty() {
    let builder = builder();
    let root = builder.build(&root_with_child());
    let store = store();

    root.register(&store).unwrap();
    assert_eq!(builder.registry().len(), 2);
    assert!(builder.registry().modules().contains(&root));

    root.unregister().unwrap();
    assert!(builder.registry().is_empty());
    assert!(!root.is_bound());
    assert!(!root.child("C").unwrap().is_bound());
    assert_eq!(store.state(), json!({}));
}

#[test]
fn commit_fails_until_registered() {
    let module = builder().build(&items());
    let err = module.commit("add_item", json!("x")).unwrap_err();
    assert_eq!(err.error_code(), error_code::MODULE_NOT_BOUND_TO_STORE);

    module.register(&store()).unwrap();
    module.commit("add_item", json!("x")).unwrap();
    assert_eq!(module.state().unwrap(), json!({"items": ["x"]}));
}

#[test]
fn register_twice_same_and_different_store() {
    let module = builder().build(&items());
    let first = store();
    let second = store();
    module.register(&first).unwrap();

    let same = module.register(&first).unwrap_err();
    assert_eq!(same.error_code(), error_code::MODULE_BOUND_TO_SAME_STORE);
    let different = module.register(&second).unwrap_err();
    assert_eq!(different.error_code(), error_code::MODULE_BOUND_TO_DIFFERENT_STORE);
    assert!(different.to_string().contains("'items.clone()'"));

    // Nothing changed.
    assert_eq!(module.namespace_key().unwrap(), "items");
    assert!(!second.has_module(&["items".to_string()]));
}

#[test]
fn store_with_non_object_state_is_invalid() {
    let mut root = ModuleDescriptor::default();
    root.state = DescriptorState::Literal(json!([1, 2, 3]));
    let odd: SharedStore = MemoryStore::create(root, StoreOptions::default()).unwrap();

    let module = builder().build(&items());
    let err = module.register(&odd).unwrap_err();
    assert_eq!(err.error_code(), error_code::INVALID_STORE);
}

// ============================================================================
// Identity and namespaces
// ============================================================================

#[test]
fn clones_have_distinct_identity() {
    let builder = builder();
    let original = builder.build(&items());
    let copy = original.clone_module(None);
    let copy_of_copy = copy.clone_module(Some("more_items"));

    assert_ne!(original, copy);
    assert_ne!(copy, copy_of_copy);
    assert_eq!(original.name(), "items");

    let store = store();
    copy.register(&store).unwrap();
    assert!(copy.is_bound());
    assert!(!original.is_bound());

    copy_of_copy.register(&store).unwrap();
    assert_eq!(copy_of_copy.namespace_key().unwrap(), "more_items");
}

#[test]
fn nested_namespaces_extend_parent() {
    let leaf = ModuleDefinition::new("leaf", json!({}));
    let branch = ModuleDefinition::new("branch", json!({}))
        .children(move || Children::new().mount("leaf", &leaf));
    let trunk = ModuleDefinition::new("trunk", json!({}))
        .children(move || Children::new().mount("left", &branch).mount("right", &branch));

    let trunk = builder().build(&trunk);
    let _store = trunk.to_store().unwrap();

    fn check(module: &ModuleInstance) {
        let key = module.namespace_key().unwrap();
        for (name, child) in module.children() {
            let expected = if key.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", key, name)
            };
            assert_eq!(child.namespace_key().unwrap(), expected);
            check(child);
        }
    }

    assert_eq!(trunk.namespace_key().unwrap(), "");
    check(&trunk);
    assert_eq!(
        trunk
            .child("right")
            .and_then(|b| b.child("leaf"))
            .unwrap()
            .namespace_key()
            .unwrap(),
        "right/leaf"
    );
}

// ============================================================================
// Root and child scenario
// ============================================================================

#[test]
fn root_and_child_commit_scenario() {
    let root = builder().build(&root_with_child());
    let store = store();
    root.register(&store).unwrap();
    let child = root.child("C").unwrap();

    root.commit("increment", Value::Null).unwrap();
    assert_eq!(root.state().unwrap()["count"], json!(1));

    child.commit("add_item", json!("x")).unwrap();
    assert_eq!(child.state().unwrap()["items"], json!(["x"]));
    assert_eq!(store.state()["R"]["C"]["items"], json!(["x"]));

    root.unregister().unwrap();
    let err = child.commit("add_item", json!("y")).unwrap_err();
    assert_eq!(err.error_code(), error_code::MODULE_NOT_BOUND_TO_STORE);
}

struct RelayMutations;

impl ModuleMutations for RelayMutations {
    fn mutations(table: &mut MutationTable<Self>) {
        table.on("bump_and_add", |_, ctx, payload| {
            let module = ctx
                .module()
                .ok_or_else(|| anyhow::anyhow!("module dropped"))?;
            if let Some(child) = module.child("C") {
                child.commit("add_item", payload)?;
            }
            ctx.update(|s: &mut Counter| s.count += 1)
        });
        table.on("bump_via_self", |_, ctx, _| {
            let module = ctx
                .module()
                .ok_or_else(|| anyhow::anyhow!("module dropped"))?;
            module.commit("bump_and_add", json!("again"))?;
            Ok(())
        });
    }
}

#[test]
fn mutation_commits_into_child_without_losing_it() {
    let child = items();
    let relay = ModuleDefinition::new("R", json!({"count": 0}))
        .mutations(|| RelayMutations)
        .children(move || Children::new().mount("C", &child));
    let root = builder().build(&relay);
    let store = store();
    root.register(&store).unwrap();

    root.commit("bump_and_add", json!("x")).unwrap();
    assert_eq!(store.state(), json!({"R": {"count": 1, "C": {"items": ["x"]}}}));

    let err = root.commit("bump_via_self", Value::Null).unwrap_err();
    assert!(err.to_string().contains("reentrant commit of 'R/bump_and_add'"));
    assert_eq!(store.state(), json!({"R": {"count": 1, "C": {"items": ["x"]}}}));
}

#[test]
fn shared_child_definition_mounts_independently() {
    let shared = items();
    let left_shared = shared.clone();
    let left = ModuleDefinition::new("left", json!({}))
        .children(move || Children::new().mount("list", &left_shared));
    let right = ModuleDefinition::new("right", json!({}))
        .children(move || Children::new().mount("list", &shared));

    let builder = builder();
    let left = builder.build(&left);
    let right = builder.build(&right);
    let store = store();
    left.register(&store).unwrap();
    right.register(&store).unwrap();

    let left_list = left.child("list").unwrap();
    let right_list = right.child("list").unwrap();
    assert_ne!(left_list, right_list);

    left_list.commit("add_item", json!("l")).unwrap();
    assert_eq!(left_list.state().unwrap(), json!({"items": ["l"]}));
    assert_eq!(right_list.state().unwrap(), json!({"items": []}));
}

#[test]
fn nested_unregister_goes_through_parent() {
    let root = builder().build(&root_with_child());
    let store = store();
    root.register(&store).unwrap();
    let child = root.child("C").unwrap();

    let err = child.unregister().unwrap_err();
    assert_eq!(err.error_code(), error_code::NESTED_MODULE_UNREGISTER);
    assert!(err.to_string().contains("'R.unregister()'"));
    assert!(child.is_bound());

    root.unregister().unwrap();
    assert!(!root.is_bound());
    assert!(!child.is_bound());
}

#[test]
fn child_of_root_is_not_dynamic() {
    let root = builder().build(&root_with_child());
    let store = root.to_store().unwrap();
    let child = root.child("C").unwrap();

    child.commit("add_item", json!(1)).unwrap();
    assert_eq!(store.state(), json!({"count": 0, "C": {"items": [1]}}));

    let err = child.unregister().unwrap_err();
    assert_eq!(err.error_code(), error_code::NESTED_MODULE_UNREGISTER);
    assert!(err.to_string().contains("nested under the root"));
    assert_eq!(
        root.unregister().unwrap_err().error_code(),
        error_code::ROOT_MODULE_UNREGISTER
    );
}

// ============================================================================
// Getters and actions end to end
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Todo {
    description: String,
    done: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TodoState {
    todos: Vec<Todo>,
}

struct TodoGetters;

impl ModuleGetters for TodoGetters {
    fn getters(table: &mut GetterTable<Self>) {
        table
            .computed("done_count", |_, ctx| {
                let state: TodoState = ctx.state_as()?;
                Ok(json!(state.todos.iter().filter(|t| t.done).count()))
            })
            .method("matching", |_, ctx, term| {
                let term = term.as_str().unwrap_or_default().to_string();
                let state: TodoState = ctx.state_as()?;
                let hits: Vec<Todo> = state
                    .todos
                    .into_iter()
                    .filter(|t| t.description.contains(&term))
                    .collect();
                Ok(serde_json::to_value(hits)?)
            });
    }
}

struct TodoMutations;

impl ModuleMutations for TodoMutations {
    fn mutations(table: &mut MutationTable<Self>) {
        table.on("add", |_, ctx, payload| {
            let todo: Todo = serde_json::from_value(payload)?;
            ctx.update(|s: &mut TodoState| s.todos.push(todo))
        });
        table.on("finish_all", |_, ctx, _| {
            ctx.update(|s: &mut TodoState| s.todos.iter_mut().for_each(|t| t.done = true))
        });
    }
}

struct TodoActions;

impl ModuleActions for TodoActions {
    fn actions(table: &mut ActionTable<Self>) {
        table.on("import", Self::import);
    }
}

impl TodoActions {
    async fn import(
        self: Arc<Self>,
        ctx: DispatchContext,
        payload: Value,
    ) -> anyhow::Result<Value> {
        let descriptions: Vec<String> = serde_json::from_value(payload)?;
        for description in descriptions {
            ctx.commit("add", json!({"description": description, "done": false}))?;
        }
        tokio::task::yield_now().await;
        ctx.commit("finish_all", Value::Null)?;
        ctx.getter("done_count")
    }
}

fn todos() -> ModuleDefinition {
    ModuleDefinition::new("todos", InitialState::from_fn(|| json!({"todos": []})))
        .getters(|| TodoGetters)
        .mutations(|| TodoMutations)
        .actions(|| TodoActions)
}

#[tokio::test]
async fn action_commits_and_reads_getters() {
    let module = builder().build(&todos());
    let store = store();
    module.register(&store).unwrap();

    let done = module
        .dispatch("import", json!(["write docs", "ship"]))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(done, json!(2));
    assert_eq!(module.getters().value("done_count").unwrap(), json!(2));

    let hits = module.call_getter("matching", json!("docs")).unwrap();
    assert_eq!(hits, json!([{"description": "write docs", "done": true}]));
}

#[tokio::test]
async fn action_failure_propagates_to_caller() {
    let module = builder().build(&todos());
    module.register(&store()).unwrap();

    let err = module
        .dispatch("import", json!("not a list"))
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), error_code::STORE);
    assert_eq!(module.state().unwrap(), json!({"todos": []}));
}

// ============================================================================
// Store creation
// ============================================================================

#[test]
fn to_store_with_plugins_and_subscriptions() {
    let builder = builder();
    let root = builder.build(&root_with_child());
    let extra = builder.build(&todos());

    let options = StoreOptions::new(StoreConfig::from_toml_str("strict = true").unwrap())
        .plugin(register_modules(vec![extra.clone()]));
    let store = root.to_store_with(options).unwrap();

    assert!(root.is_root());
    assert_eq!(extra.namespace_key().unwrap(), "todos");
    assert!(store.config().strict);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_c = seen.clone();
    store.subscribe(move |record, _root| seen_c.lock().unwrap().push(record.name.clone()));

    root.commit("increment", Value::Null).unwrap();
    root.child("C").unwrap().commit("add_item", json!("a")).unwrap();
    extra
        .commit("add", json!({"description": "x", "done": false}))
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["increment", "C/add_item", "todos/add"]
    );
    assert_eq!(root.state().unwrap()["count"], json!(1));
    assert_eq!(
        store.commit("C/missing", Value::Null, CallOptions::root()).unwrap_err().to_string(),
        "unknown mutation type: C/missing"
    );
}

#[test]
fn undefined_store() {
    let module = builder().build(&items());
    let err = module.try_register(None).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Store instance provided to 'items.register(store)' is undefined."
    );
}
