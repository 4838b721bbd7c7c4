//! Shared compilation context
//!
//! A [`Context`] is the reactive property bag threaded through one
//! compilation pass. Every node compiled in the same top-level call shares
//! the same context by reference; `context`-type metadata nodes extend it
//! with reactive properties that sibling and descendant visibility
//! expressions can read.
//!
//! Mutation is merge-only: setting an existing name writes through the
//! existing cell (last writer wins), names are never removed, so a reader
//! never observes a property disappearing mid-traversal. Array properties
//! become reactive ordered sequences, everything else a scalar cell.
//!
//! A context built with [`Context::with_parent`] additionally resolves
//! names it does not carry through the parent's property set.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde_json::Value;
use trellis_core::reactive::{ReactiveGraph, SharedGraph, Signal};

enum PropertyCell {
    /// Scalar reactive cell
    Cell(Signal<Value>),
    /// Reactive ordered sequence
    List(Signal<Vec<Value>>),
}

struct ContextInner {
    graph: SharedGraph,
    /// The metadata this context was seeded with; its presence marks the
    /// context as a continuation target for nested compile calls
    metadata: Value,
    props: Mutex<FxHashMap<String, PropertyCell>>,
    parent: Option<Context>,
}

/// Reactively extensible property bag shared across one compilation pass
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(graph: SharedGraph, metadata: Value) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                graph,
                metadata,
                props: Mutex::new(FxHashMap::default()),
                parent: None,
            }),
        }
    }

    /// Create a context that falls back to `parent` for names it does not
    /// carry itself
    pub fn with_parent(graph: SharedGraph, metadata: Value, parent: Context) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                graph,
                metadata,
                props: Mutex::new(FxHashMap::default()),
                parent: Some(parent),
            }),
        }
    }

    /// The metadata this context was seeded with
    pub fn metadata(&self) -> &Value {
        &self.inner.metadata
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.inner.graph
    }

    /// True when both contexts are the same shared instance
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Set a property, creating its reactive cell on first write
    ///
    /// Must be called from outside a reactive computation (it takes the
    /// graph lock). If the value's shape changes between array and scalar,
    /// the cell is replaced in place; the name stays present either way.
    pub fn set(&self, name: &str, value: Value) {
        let mut graph = self.inner.graph.lock().unwrap();
        let mut props = self.inner.props.lock().unwrap();

        // Signal handles are Copy; take the existing cell out so the map
        // can be written below.
        let existing: Option<PropertyCell> = props.get(name).map(|cell| match cell {
            PropertyCell::Cell(cell) => PropertyCell::Cell(*cell),
            PropertyCell::List(cell) => PropertyCell::List(*cell),
        });

        match (existing, value) {
            (Some(PropertyCell::Cell(cell)), value) if !value.is_array() => {
                graph.set(cell, value);
            }
            (Some(PropertyCell::List(cell)), Value::Array(items)) => {
                graph.set(cell, items);
            }
            (_, Value::Array(items)) => {
                let cell = graph.create_signal(items);
                props.insert(name.to_string(), PropertyCell::List(cell));
            }
            (_, value) => {
                let cell = graph.create_signal(value);
                props.insert(name.to_string(), PropertyCell::Cell(cell));
            }
        }
    }

    /// Tracked read against the graph a reactive computation is running on
    ///
    /// Returns `Some` when the name is carried by this context or an
    /// ancestor; reading registers the backing cell as a dependency of the
    /// running computation.
    pub fn get_value_in(&self, g: &ReactiveGraph, name: &str) -> Option<Value> {
        {
            let props = self.inner.props.lock().unwrap();
            if let Some(cell) = props.get(name) {
                return Some(match cell {
                    PropertyCell::Cell(cell) => g.get(*cell).unwrap_or(Value::Null),
                    PropertyCell::List(cell) => Value::Array(g.get(*cell).unwrap_or_default()),
                });
            }
        }
        self.inner
            .parent
            .as_ref()
            .and_then(|parent| parent.get_value_in(g, name))
    }

    /// Untracked read for callers outside any reactive computation
    pub fn get_value(&self, name: &str) -> Option<Value> {
        let graph = self.inner.graph.lock().unwrap();
        graph.untracked(|g| self.get_value_in(g, name))
    }

    /// Names carried by this context itself (parents excluded)
    pub fn keys(&self) -> Vec<String> {
        self.inner.props.lock().unwrap().keys().cloned().collect()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.keys())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}
