//! trellis_factory — declarative metadata → reactive viewmodel trees
//!
//! Applications describe UI as JSON metadata: an ordered sequence of typed
//! nodes. The factory compiles that metadata into viewmodel trees by
//! dispatching each node to a registered handler, threading one shared
//! [`Context`] through the whole pass so sibling nodes can exchange state.
//! Visibility is reactive: a `rendered` expression on a node becomes a
//! derived cell that re-evaluates when its dependencies change.
//!
//! Most programs use the process-wide factory through the free functions:
//!
//! ```
//! use serde_json::json;
//! use trellis_factory as factory;
//!
//! factory::register_view_models([("label".to_string(), factory::pass_through())]);
//!
//! let descriptor = factory::create_template(
//!     Some(&json!([
//!         {"type": "context", "user": {"admin": true}},
//!         {"type": "label", "text": "hi", "rendered": "user.admin"}
//!     ])),
//!     None,
//! );
//! assert_eq!(descriptor.view_models.len(), 1);
//! assert!(descriptor.view_models[0].rendered.get());
//! ```
//!
//! Compilation never fails: unknown types fall back to the default template
//! (while [`set_use_default`] allows), malformed nodes are skipped with a
//! log line, and unresolved expression identifiers evaluate to `""`.

pub mod builtins;
pub mod compiler;
pub mod context;
pub mod lifecycle;
pub mod registry;
pub mod schema;

use std::sync::{Arc, LazyLock};

use serde_json::Value;
use trellis_expr::Resolved;

pub use compiler::{
    node_type_of, pass_through, DisposeHook, Factory, Rendered, TemplateDescriptor, ViewModelNode,
};
pub use context::Context;
pub use lifecycle::{
    dispose_node, dispose_template, Binder, BindingPayload, HostRenderer, Install, MountId,
    TeardownHook,
};
pub use registry::{HandlerScope, IdentifierRegistry, NodeHandler, SharedHandler, TypeRegistry};
pub use schema::{OptionsRegistry, TemplateRegistry};

/// Template bound to nodes whose type has no registered handler
pub const TEMPLATE_DEFAULT: &str = "metadata_default_template";
/// Template wrapping a compiled viewmodel sequence
pub const TEMPLATE_ITEMS: &str = "metadata_items_template";
/// Placeholder template shown while metadata is pending
pub const TEMPLATE_LOADING: &str = "metadata_loading_template";

static FACTORY: LazyLock<Arc<Factory>> = LazyLock::new(|| Arc::new(Factory::new()));

/// The process-wide factory instance
pub fn factory() -> Arc<Factory> {
    FACTORY.clone()
}

/// Compile metadata into a render descriptor on the shared factory
pub fn create_template(metadata: Option<&Value>, context: Option<&Context>) -> TemplateDescriptor {
    FACTORY.create_template(metadata, context)
}

/// Compile a metadata sequence on the shared factory
pub fn create_view_models(metadata: &Value, context: Option<&Context>) -> Vec<ViewModelNode> {
    FACTORY.create_view_models(metadata, context)
}

/// Compile a single node on the shared factory
pub fn create_view_model(node: &Value, context: Option<&Context>) -> Option<ViewModelNode> {
    FACTORY.create_view_model(node, context)
}

/// Merge type → handler registrations into the shared factory
pub fn register_view_models<I>(mapping: I)
where
    I: IntoIterator<Item = (String, SharedHandler)>,
{
    FACTORY.register_view_models(mapping);
}

/// Merge identifier bindings into the shared factory's resolver chain
pub fn register_identifiers<I>(mapping: I)
where
    I: IntoIterator<Item = (String, Resolved)>,
{
    FACTORY.register_identifiers(mapping);
}

/// Type tags registered on the shared factory, in registration order
pub fn registered_types() -> Vec<String> {
    FACTORY.registered_types()
}

/// Toggle default-template fallback for unregistered types
pub fn set_use_default(on: bool) {
    FACTORY.set_use_default(on);
}

/// Current shared metadata payload
pub fn global_metadata() -> Value {
    FACTORY.global_metadata()
}

/// Replace the shared metadata payload, notifying reactive readers
pub fn set_global_metadata(metadata: Value) {
    FACTORY.set_global_metadata(metadata);
}

/// Validation document for the shared factory's current registrations
pub fn generate_schema() -> Value {
    schema::generate(&FACTORY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // The shared factory is real global state; this test keeps to type
    // names no other test uses.
    #[test]
    fn test_global_facade_round_trip() {
        register_view_models([("facade_probe".to_string(), pass_through())]);
        assert!(registered_types().contains(&"facade_probe".to_string()));

        let descriptor = create_template(Some(&json!({"type": "facade_probe"})), None);
        assert_eq!(descriptor.name, TEMPLATE_ITEMS);
        assert_eq!(descriptor.view_models[0].node_type, "facade_probe");

        let schema = generate_schema();
        assert_eq!(schema["$schema"], "http://json-schema.org/draft-07/schema#");
    }
}
