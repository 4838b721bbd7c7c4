//! Trellis Expression Evaluator
//!
//! Visibility expressions (`rendered: "store.a > 0"`) are evaluated against
//! an identifier resolver supplied by the caller. The evaluator itself is
//! pluggable: the compiler only depends on the [`Evaluate`] contract and the
//! resolver callback, so a host can swap in a richer language without
//! touching the compilation core.
//!
//! The bundled [`DefaultEvaluator`] implements a small grammar (literals,
//! dotted paths, calls, arithmetic, comparisons, `&&`/`||`) with JS-like
//! coercion. It must be safe to call repeatedly and synchronously from
//! inside a derived-cell recomputation, and it never fails: malformed input
//! evaluates to `Null`.
//!
//! # Example
//!
//! ```rust
//! use serde_json::{json, Value};
//! use trellis_expr::{DefaultEvaluator, Evaluate, Resolved};
//!
//! let evaluator = DefaultEvaluator::new();
//! let resolve = |id: &str| -> Resolved {
//!     match id {
//!         "count" => Resolved::Value(json!(3)),
//!         _ => Resolved::Value(Value::String(String::new())),
//!     }
//! };
//! assert_eq!(evaluator.evaluate("count > 0", &resolve), json!(true));
//! ```

use std::sync::Arc;

use serde_json::Value;

pub mod eval;
pub mod parser;

pub use eval::{as_number, truthy, DefaultEvaluator};
pub use parser::{BinaryOp, Expr, ParseError, UnaryOp};

/// A callable identifier binding
pub type EvalFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// What an identifier resolves to: a plain value or a callable
#[derive(Clone)]
pub enum Resolved {
    Value(Value),
    Func(EvalFn),
}

impl Resolved {
    /// Convenience constructor for value bindings
    pub fn value(v: impl Into<Value>) -> Self {
        Resolved::Value(v.into())
    }

    /// Convenience constructor for callable bindings
    pub fn func(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Resolved::Func(Arc::new(f))
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolved::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Resolved::Func(_) => f.debug_tuple("Func").field(&"<fn>").finish(),
        }
    }
}

/// Identifier resolution callback handed to [`Evaluate::evaluate`]
pub type Resolver<'a> = dyn Fn(&str) -> Resolved + 'a;

/// Contract between the viewmodel compiler and an expression evaluator
///
/// Implementations must be side-effect free and callable any number of
/// times for the same expression.
pub trait Evaluate: Send + Sync {
    fn evaluate(&self, expr: &str, resolve: &Resolver<'_>) -> Value;
}
