//! End-to-end factory scenarios through the public API

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use trellis_factory::{
    pass_through, Binder, Factory, HandlerScope, HostRenderer, Install, MountId, SharedHandler,
    TemplateDescriptor, TeardownHook, ViewModelNode,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct NullHost {
    renders: Mutex<Vec<String>>,
}

impl NullHost {
    fn new() -> Self {
        Self {
            renders: Mutex::new(Vec::new()),
        }
    }
}

impl HostRenderer for NullHost {
    fn render(&self, _mount: &MountId, descriptor: &TemplateDescriptor) {
        self.renders.lock().unwrap().push(descriptor.name.clone());
    }

    fn on_teardown(&self, _mount: &MountId, _hook: TeardownHook) {}
}

/// A container handler: compiles its `children` field recursively through
/// the factory, sharing the pass's context.
fn container_handler() -> SharedHandler {
    Arc::new(|node: Value, scope: &HandlerScope<'_>| {
        let children = node
            .get("children")
            .map(|children| {
                scope
                    .factory
                    .create_view_models(children, Some(scope.context))
            })
            .unwrap_or_default();
        Some(ViewModelNode::new("container", node).with_children(children))
    })
}

#[test]
fn context_state_flows_across_siblings_and_into_children() {
    let factory = Factory::new();
    factory.register_view_models([
        ("container".to_string(), container_handler()),
        ("label".to_string(), pass_through()),
    ]);

    let metadata = json!([
        {"type": "context", "store": {"count": 2}},
        {"type": "container", "children": [
            {"type": "label", "rendered": "store.count > 1"},
            {"type": "label", "rendered": "store.count > 5"}
        ]}
    ]);

    let context = factory.new_context(metadata.clone());
    let vms = factory.create_view_models(&metadata, Some(&context));

    assert_eq!(vms.len(), 1);
    let children = &vms[0].mapped_children;
    assert_eq!(children.len(), 2);
    assert!(children[0].rendered.get());
    assert!(!children[1].rendered.get());

    // One context write re-decides both children.
    context.set("store", json!({"count": 10}));
    assert!(children[0].rendered.get());
    assert!(children[1].rendered.get());
}

#[test]
fn one_bad_node_does_not_take_down_the_pass() {
    init_tracing();
    let factory = Factory::new();
    factory.register_view_models([("label".to_string(), pass_through())]);

    // A non-object node and a node with a garbage rendered value both
    // degrade instead of failing the sequence.
    let metadata = json!([
        {"type": "label", "id": 1},
        "just a string",
        {"type": "label", "id": 2, "rendered": {"weird": true}}
    ]);
    let vms = factory.create_view_models(&metadata, None);

    // The string node has no type, so it lands on the default handler.
    assert_eq!(vms.len(), 3);
    assert_eq!(vms[0].data["id"], json!(1));
    assert!(vms[2].rendered.get(), "non-empty object is truthy");
}

#[test]
fn rebinding_a_mount_reuses_nothing_from_the_old_tree() {
    let disposed = Arc::new(Mutex::new(Vec::new()));
    let factory = Arc::new(Factory::new());
    let disposed_in_handler = disposed.clone();
    factory.register_view_models([(
        "widget".to_string(),
        Arc::new(move |node: Value, _scope: &HandlerScope<'_>| {
            let name = node["name"].as_str().unwrap_or("?").to_string();
            let disposed = disposed_in_handler.clone();
            Some(
                ViewModelNode::new("widget", node)
                    .with_dispose(move || disposed.lock().unwrap().push(name.clone())),
            )
        }) as SharedHandler,
    )]);

    let host = Arc::new(NullHost::new());
    let binder = Binder::new(factory, host.clone());
    let mount = MountId::new("panel");

    binder.bind(&mount, Some(json!([{"type": "widget", "name": "a"}])), None, Install::Deferred);
    binder.flush();
    assert!(disposed.lock().unwrap().is_empty());

    binder.bind(&mount, Some(json!([{"type": "widget", "name": "b"}])), None, Install::Deferred);
    binder.flush();
    assert_eq!(disposed.lock().unwrap().as_slice(), ["a"]);
    assert_eq!(host.renders.lock().unwrap().len(), 2);
}

#[test]
fn use_default_gates_fallback_but_not_registered_types() {
    let factory = Factory::new();
    factory.register_view_models([("known".to_string(), pass_through())]);
    factory.set_use_default(false);

    let vms = factory.create_view_models(
        &json!([{"type": "known"}, {"type": "mystery"}]),
        None,
    );
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].node_type, "known");
}

#[test]
fn builtin_date_identifiers_resolve_in_expressions() {
    let factory = Factory::new();
    factory.register_view_models([("gate".to_string(), pass_through())]);

    // `now` is a timestamp in millis; comparing against a past date holds.
    let vms = factory.create_view_models(
        &json!([{"type": "gate", "rendered": "now > date('2020-01-01')"}]),
        None,
    );
    assert!(vms[0].rendered.get());

    let vms = factory.create_view_models(
        &json!([{"type": "gate", "rendered": "add_days(now, 1) > now"}]),
        None,
    );
    assert!(vms[0].rendered.get());
}

#[test]
fn schema_tracks_registrations_as_they_land() {
    let factory = Factory::new();
    let before = trellis_factory::schema::generate(&factory);

    factory.register_view_models([("chart".to_string(), pass_through())]);
    factory.templates().register("chart_grid_template");
    let after = trellis_factory::schema::generate(&factory);

    assert_ne!(before, after);
    let dumped = after.to_string();
    assert!(dumped.contains("chart_template"));
    assert!(dumped.contains("chart_grid_template"));
}
