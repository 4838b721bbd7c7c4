//! Node-type and identifier registries
//!
//! Dispatch by type tag is a lookup table from tag to a single-method
//! handler capability. Registration is additive: later registrations
//! overwrite same-key entries, nothing is ever removed, and key order is
//! insertion order (the schema generator depends on that determinism).
//!
//! The built-in entries (`""` default handler, `context`) are installed by
//! the factory at construction; see `compiler.rs`.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use serde_json::Value;
use trellis_expr::Resolved;

use crate::compiler::{Factory, ViewModelNode};
use crate::context::Context;

/// What a handler sees while building: the owning factory (for nested
/// compiles of `children`-shaped fields) and the shared context
pub struct HandlerScope<'a> {
    pub factory: &'a Factory,
    pub context: &'a Context,
}

/// Capability for turning one metadata node into a viewmodel node
///
/// Returning `None` removes the node from the compiled output; a
/// context-role handler mutates `scope.context` instead of producing one.
pub trait NodeHandler: Send + Sync {
    fn build(&self, node: Value, scope: &HandlerScope<'_>) -> Option<ViewModelNode>;
}

impl<F> NodeHandler for F
where
    F: for<'a> Fn(Value, &HandlerScope<'a>) -> Option<ViewModelNode> + Send + Sync,
{
    fn build(&self, node: Value, scope: &HandlerScope<'_>) -> Option<ViewModelNode> {
        self(node, scope)
    }
}

pub type SharedHandler = Arc<dyn NodeHandler>;

/// Tag → handler table
pub struct TypeRegistry {
    handlers: Mutex<IndexMap<String, SharedHandler>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(IndexMap::new()),
        }
    }

    /// Merge new entries; later registrations overwrite same-key ones
    pub fn register<I>(&self, mapping: I)
    where
        I: IntoIterator<Item = (String, SharedHandler)>,
    {
        let mut handlers = self.handlers.lock().unwrap();
        for (tag, handler) in mapping {
            handlers.insert(tag, handler);
        }
    }

    pub fn get(&self, tag: &str) -> Option<SharedHandler> {
        self.handlers.lock().unwrap().get(tag).cloned()
    }

    /// Registered tags in insertion order
    pub fn types(&self) -> Vec<String> {
        self.handlers.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Name → value-or-callable table consulted last in the resolver chain
pub struct IdentifierRegistry {
    entries: Mutex<IndexMap<String, Resolved>>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Merge new bindings; later registrations overwrite same-key ones
    pub fn register<I>(&self, mapping: I)
    where
        I: IntoIterator<Item = (String, Resolved)>,
    {
        let mut entries = self.entries.lock().unwrap();
        for (name, binding) in mapping {
            entries.insert(name, binding);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for IdentifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
