//! Default expression evaluation
//!
//! Evaluates parsed expression trees against an identifier resolver with
//! loose, JS-like coercion: operands are coerced to numbers where a numeric
//! operator demands it, `+` concatenates when either side is a string, and
//! `&&` / `||` short-circuit returning the deciding operand.
//!
//! Evaluation never fails. Malformed expressions, calls on non-callables,
//! and paths into missing fields all degrade to `Null` (falsy), logged at
//! debug level.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::parser::{self, BinaryOp, Expr, UnaryOp};
use crate::{Evaluate, Resolved, Resolver};

/// Evaluator for the built-in visibility-expression grammar
///
/// Parsed ASTs are cached per expression string; `rendered` cells re-evaluate
/// the same expression on every dependency change, so the parse runs once.
pub struct DefaultEvaluator {
    cache: Mutex<FxHashMap<String, Option<Arc<Expr>>>>,
}

impl DefaultEvaluator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    fn parsed(&self, expr: &str) -> Option<Arc<Expr>> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(entry) = cache.get(expr) {
            return entry.clone();
        }
        let entry = match parser::parse(expr) {
            Ok(ast) => Some(Arc::new(ast)),
            Err(err) => {
                tracing::debug!(expr, %err, "expression does not parse; evaluating to null");
                None
            }
        };
        cache.insert(expr.to_string(), entry.clone());
        entry
    }
}

impl Default for DefaultEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluate for DefaultEvaluator {
    fn evaluate(&self, expr: &str, resolve: &Resolver<'_>) -> Value {
        match self.parsed(expr) {
            Some(ast) => eval(&ast, resolve),
            None => Value::Null,
        }
    }
}

fn eval(expr: &Expr, resolve: &Resolver<'_>) -> Value {
    match expr {
        Expr::Null => Value::Null,
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Expr::Str(s) => Value::String(s.clone()),
        Expr::Path(path) => eval_path(path, resolve),
        Expr::Call(name, args) => eval_call(name, args, resolve),
        Expr::Unary(op, operand) => {
            let operand = eval(operand, resolve);
            match op {
                UnaryOp::Not => Value::Bool(!truthy(&operand)),
                UnaryOp::Neg => match as_number(&operand) {
                    Some(n) => serde_json::Number::from_f64(-n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                    None => Value::Null,
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, resolve),
    }
}

fn eval_path(path: &[String], resolve: &Resolver<'_>) -> Value {
    let mut value = match resolve(&path[0]) {
        Resolved::Value(v) => v,
        Resolved::Func(_) => {
            tracing::debug!(identifier = %path[0], "identifier is callable, not a value");
            return Value::Null;
        }
    };
    for segment in &path[1..] {
        value = match value.get(segment) {
            Some(v) => v.clone(),
            None => return Value::Null,
        };
    }
    value
}

fn eval_call(name: &str, args: &[Expr], resolve: &Resolver<'_>) -> Value {
    match resolve(name) {
        Resolved::Func(f) => {
            let args: Vec<Value> = args.iter().map(|a| eval(a, resolve)).collect();
            f(&args)
        }
        Resolved::Value(_) => {
            tracing::debug!(identifier = name, "call target is not callable");
            Value::Null
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, resolve: &Resolver<'_>) -> Value {
    // Short-circuit forms return the deciding operand, not a bool.
    match op {
        BinaryOp::And => {
            let lhs = eval(lhs, resolve);
            if !truthy(&lhs) {
                return lhs;
            }
            return eval(rhs, resolve);
        }
        BinaryOp::Or => {
            let lhs = eval(lhs, resolve);
            if truthy(&lhs) {
                return lhs;
            }
            return eval(rhs, resolve);
        }
        _ => {}
    }

    let lhs = eval(lhs, resolve);
    let rhs = eval(rhs, resolve);
    match op {
        BinaryOp::Add => {
            if lhs.is_string() || rhs.is_string() {
                Value::String(format!("{}{}", as_string(&lhs), as_string(&rhs)))
            } else {
                numeric(&lhs, &rhs, |a, b| a + b)
            }
        }
        BinaryOp::Sub => numeric(&lhs, &rhs, |a, b| a - b),
        BinaryOp::Mul => numeric(&lhs, &rhs, |a, b| a * b),
        BinaryOp::Div => numeric(&lhs, &rhs, |a, b| a / b),
        BinaryOp::Lt => compare(&lhs, &rhs, |ord| ord.is_lt()),
        BinaryOp::Le => compare(&lhs, &rhs, |ord| ord.is_le()),
        BinaryOp::Gt => compare(&lhs, &rhs, |ord| ord.is_gt()),
        BinaryOp::Ge => compare(&lhs, &rhs, |ord| ord.is_ge()),
        BinaryOp::Eq => Value::Bool(loose_eq(&lhs, &rhs)),
        BinaryOp::Ne => Value::Bool(!loose_eq(&lhs, &rhs)),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn numeric(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) => serde_json::Number::from_f64(f(a, b))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn compare(lhs: &Value, rhs: &Value, f: impl Fn(std::cmp::Ordering) -> bool) -> Value {
    let ord = match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    match ord {
        Some(ord) => Value::Bool(f(ord)),
        None => Value::Bool(false),
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    if let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) {
        return a == b;
    }
    match (lhs, rhs) {
        (Value::String(_), _) | (_, Value::String(_)) => as_string(lhs) == as_string(rhs),
        _ => false,
    }
}

/// Coerce a value to a number where possible
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// JS-like truthiness: `null`, `false`, `0`, `NaN`, and `""` are falsy;
/// everything else (arrays and objects included) is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver_with(bindings: serde_json::Value) -> impl Fn(&str) -> Resolved {
        move |id: &str| match bindings.get(id) {
            Some(v) => Resolved::Value(v.clone()),
            None => Resolved::Value(Value::String(String::new())),
        }
    }

    fn eval_str(expr: &str, bindings: serde_json::Value) -> Value {
        let evaluator = DefaultEvaluator::new();
        let resolve = resolver_with(bindings);
        evaluator.evaluate(expr, &resolve)
    }

    #[test]
    fn test_literal_expressions() {
        assert_eq!(eval_str("true", json!({})), json!(true));
        assert_eq!(eval_str("1 + 2 * 3", json!({})), json!(7.0));
        assert_eq!(eval_str("'a' + 'b'", json!({})), json!("ab"));
    }

    #[test]
    fn test_path_resolution() {
        let bindings = json!({"store": {"user": {"role": "admin"}}});
        assert_eq!(
            eval_str("store.user.role", bindings.clone()),
            json!("admin")
        );
        assert_eq!(
            eval_str("store.user.role == 'admin'", bindings.clone()),
            json!(true)
        );
        assert_eq!(eval_str("store.missing.deeper", bindings), Value::Null);
    }

    #[test]
    fn test_numeric_comparison_through_context() {
        let bindings = json!({"store": {"a": 1}});
        assert_eq!(eval_str("store.a > 0", bindings.clone()), json!(true));
        assert_eq!(eval_str("store.a > 5", bindings), json!(false));
    }

    #[test]
    fn test_unresolved_identifier_is_falsy() {
        // The resolver maps unknown identifiers to "", which is falsy.
        assert_eq!(eval_str("missing", json!({})), json!(""));
        assert_eq!(eval_str("missing && true", json!({})), json!(""));
        assert_eq!(eval_str("!missing", json!({})), json!(true));
    }

    #[test]
    fn test_short_circuit_returns_operand() {
        let bindings = json!({"name": "ada", "empty": ""});
        assert_eq!(eval_str("name || 'anonymous'", bindings.clone()), json!("ada"));
        assert_eq!(eval_str("empty || 'anonymous'", bindings), json!("anonymous"));
    }

    #[test]
    fn test_loose_equality() {
        assert_eq!(eval_str("'1' == 1", json!({})), json!(true));
        assert_eq!(eval_str("true == 1", json!({})), json!(true));
        assert_eq!(eval_str("'a' != 'b'", json!({})), json!(true));
    }

    #[test]
    fn test_calls() {
        let evaluator = DefaultEvaluator::new();
        let resolve = |id: &str| -> Resolved {
            match id {
                "double" => Resolved::Func(Arc::new(|args: &[Value]| {
                    let n = args.first().and_then(as_number).unwrap_or(0.0);
                    json!(n * 2.0)
                })),
                "x" => Resolved::Value(json!(21)),
                _ => Resolved::Value(Value::String(String::new())),
            }
        };
        assert_eq!(evaluator.evaluate("double(x)", &resolve), json!(42.0));
        // Calling a plain value degrades to null, not a panic.
        assert_eq!(evaluator.evaluate("x(1)", &resolve), Value::Null);
    }

    #[test]
    fn test_malformed_expression_degrades_to_null() {
        assert_eq!(eval_str("a &&", json!({})), Value::Null);
        assert_eq!(eval_str("((", json!({})), Value::Null);
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
    }
}
