//! Built-in resolver identifiers
//!
//! Visibility expressions resolve identifiers through the context first;
//! names the context does not carry fall through to this built-in set
//! before the externally registered identifier table is consulted:
//!
//! - `store` - snapshot of the process-wide key-value store
//! - `now` - current UTC timestamp in milliseconds
//! - `today` - current UTC date as `YYYY-MM-DD`
//! - `date(s)` - parse an ISO date or datetime string to a timestamp (ms)
//! - `add_days(ts, n)` - shift a timestamp by whole days
//!
//! The key-value store is process-wide mutable state with no teardown,
//! meant to be populated during setup; `store_clear` exists for tests.

use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use trellis_expr::{as_number, Resolved};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Process-wide JSON key-value store backing the `store` identifier
static STORE: LazyLock<Mutex<FxHashMap<String, Value>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

/// Set a value in the process-wide store
pub fn store_set(key: &str, value: Value) {
    STORE.lock().unwrap().insert(key.to_string(), value);
}

/// Read a value from the process-wide store
pub fn store_get(key: &str) -> Option<Value> {
    STORE.lock().unwrap().get(key).cloned()
}

/// Remove every entry from the process-wide store
pub fn store_clear() {
    STORE.lock().unwrap().clear();
}

/// Snapshot the whole store as a JSON object
pub fn store_snapshot() -> Value {
    let store = STORE.lock().unwrap();
    let mut object = serde_json::Map::with_capacity(store.len());
    for (key, value) in store.iter() {
        object.insert(key.clone(), value.clone());
    }
    Value::Object(object)
}

/// Resolve a built-in identifier, if `id` names one
pub fn resolve(id: &str) -> Option<Resolved> {
    match id {
        "store" => Some(Resolved::Value(store_snapshot())),
        "now" => Some(Resolved::Value(json!(Utc::now().timestamp_millis()))),
        "today" => Some(Resolved::Value(Value::String(
            Utc::now().format("%Y-%m-%d").to_string(),
        ))),
        "date" => Some(Resolved::func(|args| {
            let Some(text) = args.first().and_then(Value::as_str) else {
                return Value::Null;
            };
            parse_date_millis(text).map(|ms| json!(ms)).unwrap_or(Value::Null)
        })),
        "add_days" => Some(Resolved::func(|args| {
            let ts = args.first().and_then(as_number);
            let days = args.get(1).and_then(as_number);
            match (ts, days) {
                (Some(ts), Some(days)) => json!(ts + days * MILLIS_PER_DAY),
                _ => Value::Null,
            }
        })),
        _ => None,
    }
}

fn parse_date_millis(text: &str) -> Option<i64> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight).timestamp_millis())
}
