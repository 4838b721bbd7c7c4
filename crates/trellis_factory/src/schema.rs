//! Metadata validation schema generation
//!
//! Derives a JSON-Schema-shaped document from the live registries: every
//! registered template name and node type becomes a legal alternative, and
//! names with a registered options schema get a dedicated alternative that
//! pins the name and describes the nested `options` object. The document is
//! rebuilt from the registries on every call, never cached.

use std::sync::Mutex;

use indexmap::{IndexMap, IndexSet};
use serde_json::{json, Map, Value};

use crate::compiler::Factory;

/// Known template names, in registration order
pub struct TemplateRegistry {
    names: Mutex<IndexSet<String>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            names: Mutex::new(IndexSet::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>) {
        self.names.lock().unwrap().insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().unwrap().contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().iter().cloned().collect()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-name `options` sub-schemas (property name → property schema)
pub struct OptionsRegistry {
    entries: Mutex<IndexMap<String, Map<String, Value>>>,
}

impl OptionsRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Register the option properties legal under `name`
    ///
    /// Non-object schemas are rejected with a warning; a schema has to
    /// describe properties to be worth an alternative of its own.
    pub fn register(&self, name: impl Into<String>, properties: Value) {
        let name = name.into();
        match properties {
            Value::Object(map) => {
                self.entries.lock().unwrap().insert(name, map);
            }
            other => {
                tracing::warn!(name = %name, schema = %other, "options schema must be an object; dropped");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Map<String, Value>> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for OptionsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the validation document for the factory's current registrations
pub fn generate(factory: &Factory) -> Value {
    // Template axis: explicit template names first, then the implied
    // `<type>_template` name for every registered node type.
    let mut template_names: IndexSet<String> = factory.templates().names().into_iter().collect();
    let mut type_names: IndexSet<String> = IndexSet::new();
    for tag in factory.registered_types() {
        if tag.is_empty() {
            continue;
        }
        template_names.insert(format!("{tag}_template"));
        type_names.insert(tag);
    }

    let node = json!({
        "type": "object",
        "anyOf": [
            { "oneOf": axis_alternatives("template", &template_names, factory.template_options()) },
            { "oneOf": axis_alternatives("type", &type_names, factory.type_options()) },
        ],
    });

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "definitions": { "node": node },
        "oneOf": [
            { "$ref": "#/definitions/node" },
            { "type": "array", "items": { "$ref": "#/definitions/node" } },
        ],
    })
}

/// Alternatives for one axis (`template` or `type`)
///
/// Names with registered options become a pinned-name alternative carrying
/// the nested options schema; the rest are pooled into one enum alternative.
fn axis_alternatives(key: &str, names: &IndexSet<String>, options: &OptionsRegistry) -> Vec<Value> {
    let mut alternatives = Vec::new();
    let mut plain: Vec<&str> = Vec::new();

    for name in names {
        match options.get(name) {
            Some(properties) => alternatives.push(json!({
                "properties": {
                    key: { "enum": [name] },
                    "options": {
                        "type": "object",
                        "properties": properties,
                    },
                },
                "required": [key],
            })),
            None => plain.push(name),
        }
    }

    // An empty enum can never match; only pool the names that exist.
    if !plain.is_empty() {
        alternatives.push(json!({
            "properties": { key: { "enum": plain } },
            "required": [key],
        }));
    }
    alternatives
}
