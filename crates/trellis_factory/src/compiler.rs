//! Metadata → viewmodel compilation
//!
//! [`Factory`] owns the shared reactive graph, the scheduler, the evaluator,
//! and the registries, and turns declarative metadata trees into live
//! [`ViewModelNode`] trees. Compilation is total: a malformed node degrades
//! to "skipped" or "default", never to an error surfaced to the caller, so
//! one bad node cannot keep its siblings from rendering.
//!
//! Each compiled node carries a [`Rendered`] flag. A `rendered` boolean in
//! the metadata becomes a constant; an expression string becomes a derived
//! cell that re-evaluates whenever a reactive dependency it read last time
//! changes. Identifiers resolve through the shared [`Context`], then the
//! built-in set, then the registered identifier table, and finally to `""`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use trellis_core::reactive::{shared_graph, Derived, SharedGraph, Signal};
use trellis_core::scheduler::{Scheduler, SharedScheduler};
use trellis_expr::{truthy, DefaultEvaluator, Evaluate, Resolved};

use crate::context::Context;
use crate::registry::{HandlerScope, IdentifierRegistry, SharedHandler, TypeRegistry};
use crate::schema::{OptionsRegistry, TemplateRegistry};
use crate::{TEMPLATE_DEFAULT, TEMPLATE_ITEMS, TEMPLATE_LOADING};

/// Release hook invoked when a viewmodel node is disposed
pub type DisposeHook = Arc<dyn Fn() + Send + Sync>;

/// Reactive visibility flag attached to every compiled node
#[derive(Clone)]
pub struct Rendered {
    inner: RenderedInner,
}

#[derive(Clone)]
enum RenderedInner {
    Const(bool),
    Cell {
        graph: SharedGraph,
        cell: Derived<bool>,
    },
}

impl Rendered {
    pub fn constant(visible: bool) -> Self {
        Self {
            inner: RenderedInner::Const(visible),
        }
    }

    fn cell(graph: SharedGraph, cell: Derived<bool>) -> Self {
        Self {
            inner: RenderedInner::Cell { graph, cell },
        }
    }

    /// Current visibility, recomputing a derived flag if it went stale
    pub fn get(&self) -> bool {
        match &self.inner {
            RenderedInner::Const(visible) => *visible,
            RenderedInner::Cell { graph, cell } => {
                graph.lock().unwrap().get_derived(*cell).unwrap_or(true)
            }
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.inner, RenderedInner::Const(_))
    }
}

impl std::fmt::Debug for Rendered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            RenderedInner::Const(visible) => write!(f, "Rendered::Const({visible})"),
            RenderedInner::Cell { .. } => write!(f, "Rendered::Cell(..)"),
        }
    }
}

/// One compiled metadata node
#[derive(Clone)]
pub struct ViewModelNode {
    /// Type tag; the handler's own tag wins over the source node's
    pub node_type: String,
    /// Template this node binds to, when the handler assigned one
    pub template: Option<String>,
    /// The node's (cloned) source fields plus whatever the handler merged in
    pub data: Value,
    /// Reactive visibility flag
    pub rendered: Rendered,
    /// Compiled children, interpretation owned by the handler
    pub mapped_children: Vec<ViewModelNode>,
    /// Optional release hook, run on disposal
    pub dispose: Option<DisposeHook>,
}

impl ViewModelNode {
    pub fn new(node_type: impl Into<String>, data: Value) -> Self {
        Self {
            node_type: node_type.into(),
            template: None,
            data,
            rendered: Rendered::constant(true),
            mapped_children: Vec::new(),
            dispose: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_children(mut self, children: Vec<ViewModelNode>) -> Self {
        self.mapped_children = children;
        self
    }

    pub fn with_dispose(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.dispose = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for ViewModelNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewModelNode")
            .field("node_type", &self.node_type)
            .field("template", &self.template)
            .field("children", &self.mapped_children.len())
            .field("has_dispose", &self.dispose.is_some())
            .finish()
    }
}

/// Render descriptor pairing a template name with compiled viewmodels
#[derive(Clone, Debug)]
pub struct TemplateDescriptor {
    pub name: String,
    pub view_models: Vec<ViewModelNode>,
}

impl TemplateDescriptor {
    /// Placeholder descriptor shown while metadata is still pending
    pub fn loading() -> Self {
        Self {
            name: TEMPLATE_LOADING.to_string(),
            view_models: Vec::new(),
        }
    }

    pub fn items(view_models: Vec<ViewModelNode>) -> Self {
        Self {
            name: TEMPLATE_ITEMS.to_string(),
            view_models,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.name == TEMPLATE_LOADING
    }
}

/// A pass-through handler: the node's fields become the viewmodel data
/// unchanged. Useful for nodes whose template needs no extra shaping.
pub fn pass_through() -> SharedHandler {
    Arc::new(|node: Value, _scope: &HandlerScope<'_>| {
        Some(ViewModelNode::new("", node))
    })
}

/// The metadata factory: compiles metadata trees into viewmodel trees
pub struct Factory {
    graph: SharedGraph,
    scheduler: SharedScheduler,
    evaluator: Arc<dyn Evaluate>,
    types: Arc<TypeRegistry>,
    identifiers: Arc<IdentifierRegistry>,
    templates: TemplateRegistry,
    template_options: OptionsRegistry,
    type_options: OptionsRegistry,
    use_default: Arc<AtomicBool>,
    /// Process-wide observable metadata payload
    metadata_cell: Signal<Value>,
}

impl Factory {
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(DefaultEvaluator::new()))
    }

    /// Build a factory around a custom expression evaluator
    pub fn with_evaluator(evaluator: Arc<dyn Evaluate>) -> Self {
        let graph = shared_graph();
        let metadata_cell = graph.lock().unwrap().create_signal(Value::Null);
        let use_default = Arc::new(AtomicBool::new(true));
        let types = Arc::new(TypeRegistry::new());
        install_builtin_handlers(&types, use_default.clone());

        Self {
            graph,
            scheduler: Arc::new(Scheduler::new()),
            evaluator,
            types,
            identifiers: Arc::new(IdentifierRegistry::new()),
            templates: TemplateRegistry::new(),
            template_options: OptionsRegistry::new(),
            type_options: OptionsRegistry::new(),
            use_default,
            metadata_cell,
        }
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn template_options(&self) -> &OptionsRegistry {
        &self.template_options
    }

    pub fn type_options(&self) -> &OptionsRegistry {
        &self.type_options
    }

    /// Whether unmapped node types fall back to the generic template
    pub fn use_default(&self) -> bool {
        self.use_default.load(Ordering::Relaxed)
    }

    pub fn set_use_default(&self, on: bool) {
        self.use_default.store(on, Ordering::Relaxed);
    }

    /// Merge new type → handler entries (additive, later wins)
    pub fn register_view_models<I>(&self, mapping: I)
    where
        I: IntoIterator<Item = (String, SharedHandler)>,
    {
        self.types.register(mapping);
    }

    /// Merge new identifier bindings for the resolver chain
    pub fn register_identifiers<I>(&self, mapping: I)
    where
        I: IntoIterator<Item = (String, Resolved)>,
    {
        self.identifiers.register(mapping);
    }

    /// Registered type tags in insertion order
    pub fn registered_types(&self) -> Vec<String> {
        self.types.types()
    }

    /// Fresh context for a compilation pass
    pub fn new_context(&self, metadata: Value) -> Context {
        Context::new(self.graph.clone(), metadata)
    }

    /// Context that additionally resolves names through `parent`
    pub fn derived_context(&self, metadata: Value, parent: &Context) -> Context {
        Context::with_parent(self.graph.clone(), metadata, parent.clone())
    }

    /// Compile a single metadata node
    ///
    /// With no context given, a fresh one is created for this node alone;
    /// nodes meant to share context go through
    /// [`create_view_models`](Self::create_view_models).
    pub fn create_view_model(&self, node: &Value, context: Option<&Context>) -> Option<ViewModelNode> {
        match context {
            Some(context) => self.compile_node(node, context),
            None => {
                let context = self.new_context(node.clone());
                self.compile_node(node, &context)
            }
        }
    }

    /// Compile a metadata sequence (or a bare node) into viewmodels
    ///
    /// One context is shared across the whole call: the given one when
    /// present, else a fresh context seeded with the metadata. Nodes that
    /// compile to nothing are filtered out; surviving order is preserved.
    pub fn create_view_models(&self, metadata: &Value, context: Option<&Context>) -> Vec<ViewModelNode> {
        let context = match context {
            Some(context) => context.clone(),
            None => self.new_context(metadata.clone()),
        };
        let nodes: &[Value] = match metadata {
            Value::Array(items) => items,
            single => std::slice::from_ref(single),
        };
        nodes
            .iter()
            .filter_map(|node| self.compile_node(node, &context))
            .collect()
    }

    /// Compile metadata into a render descriptor
    ///
    /// Absent or falsy metadata yields the loading descriptor so a mount
    /// point can show a placeholder while metadata is pending.
    pub fn create_template(&self, metadata: Option<&Value>, context: Option<&Context>) -> TemplateDescriptor {
        // Falsy metadata ("" and 0 included) means "not loaded yet".
        let metadata = match metadata {
            Some(metadata) if truthy(metadata) => metadata,
            _ => {
                tracing::debug!("no metadata yet; emitting loading template");
                return TemplateDescriptor::loading();
            }
        };
        TemplateDescriptor::items(self.create_view_models(metadata, context))
    }

    /// Current value of the process-wide metadata payload
    pub fn global_metadata(&self) -> Value {
        let graph = self.graph.lock().unwrap();
        graph.get_untracked(self.metadata_cell).unwrap_or(Value::Null)
    }

    pub fn set_global_metadata(&self, metadata: Value) {
        self.graph.lock().unwrap().set(self.metadata_cell, metadata);
    }

    /// Handle to the observable metadata cell, for reactive consumers
    pub fn metadata_cell(&self) -> Signal<Value> {
        self.metadata_cell
    }

    fn compile_node(&self, node: &Value, context: &Context) -> Option<ViewModelNode> {
        // Deep-clone up front: handlers get their own copy, the caller's
        // tree is never aliased.
        let node = node.clone();
        let tag = node_type_of(&node).to_string();

        if tag == "ignore" {
            tracing::debug!(node = %node, "ignored node");
            return None;
        }

        let handler = match self.types.get(&tag) {
            Some(handler) => handler,
            None => {
                if !tag.is_empty() {
                    tracing::warn!(
                        r#type = %tag,
                        "no handler registered for type; falling back to default"
                    );
                }
                self.types.get("")?
            }
        };

        let scope = HandlerScope {
            factory: self,
            context,
        };
        let mut view_model = handler.build(node.clone(), &scope)?;

        if view_model.node_type.is_empty() {
            view_model.node_type = tag;
        }
        match node.get("rendered") {
            None => {}
            Some(Value::Bool(visible)) => {
                view_model.rendered = Rendered::constant(*visible);
            }
            Some(Value::String(expr)) => {
                view_model.rendered = self.rendered_cell(expr.clone(), context);
            }
            Some(other) => {
                view_model.rendered = Rendered::constant(truthy(other));
            }
        }
        Some(view_model)
    }

    /// Derived visibility cell for an expression-valued `rendered` field
    fn rendered_cell(&self, expr: String, context: &Context) -> Rendered {
        let context = context.clone();
        let evaluator = self.evaluator.clone();
        let identifiers = self.identifiers.clone();

        let cell = self.graph.lock().unwrap().create_derived(move |g| {
            let resolve = |id: &str| -> Resolved {
                if let Some(value) = context.get_value_in(g, id) {
                    return Resolved::Value(value);
                }
                if let Some(binding) = crate::builtins::resolve(id) {
                    return binding;
                }
                if let Some(binding) = identifiers.resolve(id) {
                    return binding;
                }
                // Unresolved identifiers degrade to an empty string so the
                // expression goes falsy instead of failing.
                Resolved::Value(Value::String(String::new()))
            };
            truthy(&evaluator.evaluate(&expr, &resolve))
        });
        Rendered::cell(self.graph.clone(), cell)
    }
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

/// Type tag of a metadata node; non-objects and missing tags map to `""`
pub fn node_type_of(node: &Value) -> &str {
    node.get("type").and_then(Value::as_str).unwrap_or("")
}

fn install_builtin_handlers(types: &TypeRegistry, use_default: Arc<AtomicBool>) {
    let default_handler: SharedHandler = Arc::new(move |node: Value, _scope: &HandlerScope<'_>| {
        if !use_default.load(Ordering::Relaxed) {
            return None;
        }
        Some(ViewModelNode::new("", node).with_template(TEMPLATE_DEFAULT))
    });

    let context_handler: SharedHandler = Arc::new(|node: Value, scope: &HandlerScope<'_>| {
        let Value::Object(fields) = node else {
            tracing::warn!("context node is not an object; nothing to merge");
            return None;
        };
        for (name, value) in fields {
            if name != "type" {
                scope.context.set(&name, value);
            }
        }
        None
    });

    types.register([
        (String::new(), default_handler),
        ("context".to_string(), context_handler),
    ]);
}
