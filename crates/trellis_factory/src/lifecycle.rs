//! Mount lifecycle: install, re-install, dispose
//!
//! A [`Binder`] ties compiled templates to host mount points. Re-installing
//! over a live mount always disposes the previous viewmodel tree first, and
//! the new descriptor is recorded before the host renders it so re-entrant
//! renders observe the current payload. The first install on a mount also
//! registers a teardown hook with the host, so a discarded mount releases
//! its tree without a further call into the binder.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::compiler::{Factory, TemplateDescriptor, ViewModelNode};
use crate::context::Context;

/// Host-side identity of a mount point
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MountId(String);

impl MountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// When an install takes effect
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Install {
    /// Queue on the scheduler; takes effect on the next tick
    Deferred,
    /// Install immediately, with dependency tracking suppressed so a
    /// caller inside a reactive computation does not subscribe to every
    /// cell the compilation touches
    Sync,
}

/// What a host binding hands the binder: bare metadata, or metadata
/// paired with an explicit context to compile under
#[derive(Clone, Debug)]
pub enum BindingPayload {
    Metadata(Option<Value>),
    WithContext {
        metadata: Option<Value>,
        context: Context,
    },
}

impl From<Value> for BindingPayload {
    fn from(metadata: Value) -> Self {
        BindingPayload::Metadata(Some(metadata))
    }
}

/// Callback the host runs when it discards a mount point
pub type TeardownHook = Box<dyn FnOnce() + Send>;

/// Rendering side of the host application
pub trait HostRenderer: Send + Sync {
    /// Present a descriptor at a mount point
    fn render(&self, mount: &MountId, descriptor: &TemplateDescriptor);

    /// Register a hook to run when the host discards the mount
    fn on_teardown(&self, mount: &MountId, hook: TeardownHook);
}

/// Connects a [`Factory`] to a [`HostRenderer`]
#[derive(Clone)]
pub struct Binder {
    factory: Arc<Factory>,
    host: Arc<dyn HostRenderer>,
    installed: Arc<Mutex<FxHashMap<MountId, TemplateDescriptor>>>,
}

impl Binder {
    pub fn new(factory: Arc<Factory>, host: Arc<dyn HostRenderer>) -> Self {
        Self {
            factory,
            host,
            installed: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Install a host binding payload at `mount`
    pub fn update(&self, mount: &MountId, payload: BindingPayload, mode: Install) {
        match payload {
            BindingPayload::Metadata(metadata) => self.bind(mount, metadata, None, mode),
            BindingPayload::WithContext { metadata, context } => {
                self.bind(mount, metadata, Some(context), mode)
            }
        }
    }

    /// Compile `metadata` and install the result at `mount`
    pub fn bind(
        &self,
        mount: &MountId,
        metadata: Option<Value>,
        context: Option<Context>,
        mode: Install,
    ) {
        match mode {
            Install::Deferred => {
                let binder = self.clone();
                let mount = mount.clone();
                self.factory.scheduler().defer(move || {
                    binder.install_now(&mount, metadata.as_ref(), context.as_ref());
                });
            }
            Install::Sync => {
                let graph = self.factory.graph().clone();
                graph.lock().unwrap().suppress_start();
                self.install_now(mount, metadata.as_ref(), context.as_ref());
                graph.lock().unwrap().suppress_end();
            }
        }
    }

    /// The factory this binder compiles with
    pub fn factory(&self) -> &Arc<Factory> {
        &self.factory
    }

    /// Run queued deferred installs
    pub fn flush(&self) {
        self.factory.scheduler().tick();
    }

    /// Descriptor currently installed at `mount`, if any
    pub fn installed(&self, mount: &MountId) -> Option<TemplateDescriptor> {
        self.installed.lock().unwrap().get(mount).cloned()
    }

    fn install_now(&self, mount: &MountId, metadata: Option<&Value>, context: Option<&Context>) {
        let previous = self.installed.lock().unwrap().remove(mount);
        let first_install = previous.is_none();
        if let Some(previous) = previous {
            tracing::debug!(mount = %mount, "disposing previous template");
            dispose_template(&previous);
        }

        let descriptor = self.factory.create_template(metadata, context);

        // Record before rendering: anything the render triggers must see
        // the payload it is rendering, not the one it replaced.
        self.installed
            .lock()
            .unwrap()
            .insert(mount.clone(), descriptor.clone());

        if first_install {
            let installed = self.installed.clone();
            let key = mount.clone();
            self.host.on_teardown(
                mount,
                Box::new(move || {
                    if let Some(current) = installed.lock().unwrap().remove(&key) {
                        dispose_template(&current);
                    }
                }),
            );
        }

        self.host.render(mount, &descriptor);
    }
}

/// Dispose every viewmodel in a descriptor
pub fn dispose_template(descriptor: &TemplateDescriptor) {
    for node in &descriptor.view_models {
        dispose_node(node);
    }
}

/// Run a node's release hook, then its children's, depth-first
pub fn dispose_node(node: &ViewModelNode) {
    if let Some(hook) = &node.dispose {
        hook();
    }
    for child in &node.mapped_children {
        dispose_node(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HandlerScope, SharedHandler};
    use serde_json::json;

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingHost {
        log: Log,
        teardowns: Mutex<Vec<(MountId, TeardownHook)>>,
    }

    impl RecordingHost {
        fn new(log: Log) -> Self {
            Self {
                log,
                teardowns: Mutex::new(Vec::new()),
            }
        }

        fn run_teardowns(&self) {
            for (_, hook) in self.teardowns.lock().unwrap().drain(..) {
                hook();
            }
        }
    }

    impl HostRenderer for RecordingHost {
        fn render(&self, mount: &MountId, descriptor: &TemplateDescriptor) {
            self.log.lock().unwrap().push(format!(
                "render:{}:{}:{}",
                mount,
                descriptor.name,
                descriptor.view_models.len()
            ));
        }

        fn on_teardown(&self, mount: &MountId, hook: TeardownHook) {
            self.teardowns.lock().unwrap().push((mount.clone(), hook));
        }
    }

    fn logging_handler(log: Log) -> SharedHandler {
        Arc::new(move |node: serde_json::Value, _scope: &HandlerScope<'_>| {
            let id = node["id"].as_i64().unwrap_or(0);
            let log = log.clone();
            Some(
                ViewModelNode::new("card", node)
                    .with_dispose(move || log.lock().unwrap().push(format!("dispose:{id}"))),
            )
        })
    }

    fn setup() -> (Binder, Arc<RecordingHost>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(Factory::new());
        factory.register_view_models([("card".to_string(), logging_handler(log.clone()))]);
        let host = Arc::new(RecordingHost::new(log.clone()));
        let binder = Binder::new(factory, host.clone());
        (binder, host, log)
    }

    #[test]
    fn test_sync_install_is_immediate() {
        let (binder, _host, log) = setup();
        let mount = MountId::new("root");
        binder.bind(&mount, Some(json!([{"type": "card", "id": 1}])), None, Install::Sync);

        assert_eq!(log.lock().unwrap().as_slice(), ["render:root:metadata_items_template:1"]);
        assert_eq!(binder.installed(&mount).unwrap().view_models.len(), 1);
    }

    #[test]
    fn test_deferred_install_waits_for_flush() {
        let (binder, _host, log) = setup();
        let mount = MountId::new("root");
        binder.bind(&mount, Some(json!([{"type": "card", "id": 1}])), None, Install::Deferred);

        assert!(log.lock().unwrap().is_empty());
        assert!(binder.installed(&mount).is_none());

        binder.flush();
        assert_eq!(log.lock().unwrap().as_slice(), ["render:root:metadata_items_template:1"]);
    }

    #[test]
    fn test_reinstall_disposes_before_render() {
        let (binder, _host, log) = setup();
        let mount = MountId::new("root");
        binder.bind(&mount, Some(json!([{"type": "card", "id": 1}])), None, Install::Sync);
        binder.bind(&mount, Some(json!([{"type": "card", "id": 2}])), None, Install::Sync);

        assert_eq!(
            log.lock().unwrap().as_slice(),
            ["render:root:metadata_items_template:1", "dispose:1", "render:root:metadata_items_template:1"]
        );
    }

    #[test]
    fn test_missing_metadata_installs_loading() {
        let (binder, _host, log) = setup();
        let mount = MountId::new("root");
        binder.bind(&mount, None, None, Install::Sync);

        assert!(binder.installed(&mount).unwrap().is_loading());
        assert_eq!(log.lock().unwrap().as_slice(), ["render:root:metadata_loading_template:0"]);
    }

    #[test]
    fn test_update_payload_with_context() {
        let (binder, _host, _log) = setup();
        let mount = MountId::new("root");

        let context = binder.factory().new_context(Value::Null);
        context.set("visible", json!(false));

        binder.update(
            &mount,
            BindingPayload::WithContext {
                metadata: Some(json!([{"type": "card", "id": 1, "rendered": "visible"}])),
                context: context.clone(),
            },
            Install::Sync,
        );

        let installed = binder.installed(&mount).unwrap();
        assert!(!installed.view_models[0].rendered.get());
        context.set("visible", json!(true));
        assert!(installed.view_models[0].rendered.get());
    }

    #[test]
    fn test_teardown_disposes_current_tree() {
        let (binder, host, log) = setup();
        let mount = MountId::new("root");
        binder.bind(&mount, Some(json!([{"type": "card", "id": 7}])), None, Install::Sync);

        host.run_teardowns();
        assert!(binder.installed(&mount).is_none());
        assert!(log.lock().unwrap().contains(&"dispose:7".to_string()));
    }

    #[test]
    fn test_teardown_registered_once_per_mount() {
        let (binder, host, _log) = setup();
        let mount = MountId::new("root");
        binder.bind(&mount, Some(json!([{"type": "card", "id": 1}])), None, Install::Sync);
        binder.bind(&mount, Some(json!([{"type": "card", "id": 2}])), None, Install::Sync);

        assert_eq!(host.teardowns.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dispose_runs_parent_then_children() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mark = |log: &Log, label: &str| {
            let log = log.clone();
            let label = label.to_string();
            move || log.lock().unwrap().push(label.clone())
        };

        let child = ViewModelNode::new("child", json!({})).with_dispose(mark(&log, "child"));
        let parent = ViewModelNode::new("parent", json!({}))
            .with_children(vec![child])
            .with_dispose(mark(&log, "parent"));

        dispose_node(&parent);
        assert_eq!(log.lock().unwrap().as_slice(), ["parent", "child"]);
    }
}
