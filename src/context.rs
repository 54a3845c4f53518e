// src/context.rs
// =============================================================================
// A tiny thread-safe key/value store for passing data between callbacks.
//
// One Context is shared by the whole engine (it also carries the max crawl
// depth). Lighter per-task Contexts travel with a Request so a parse function
// can hand values (like a parent id) to the parse function of its children.
//
// Concurrency:
// - One RwLock per Context, no per-key locking
// - Readers run in parallel, writers are exclusive
// - A write is visible to every reader as soon as put() returns
// =============================================================================

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A value stored in a Context or carried by an Item.
///
/// Serialized untagged, so `Value::Int(3)` becomes `3` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// A structured, domain-specific record
    Record(serde_json::Value),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Record(v)
    }
}

#[derive(Debug, Default)]
pub struct Context {
    max_depth: usize,
    values: RwLock<HashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the engine-wide Context. 0 means unlimited depth.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Context {
            max_depth,
            values: RwLock::default(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Stores a value under `key`, replacing any previous one.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().insert(key.into(), value.into());
    }

    /// Returns the string stored under `key`.
    ///
    /// Absent keys and non-string values both come back as an empty
    /// string; use [`Context::get_any`] when the difference matters.
    pub fn get(&self, key: &str) -> String {
        self.read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Returns a copy of whatever is stored under `key`.
    pub fn get_any(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Applies `f` to every entry and collects the results.
    ///
    /// The read lock is held for the whole traversal, so `f` must not call
    /// [`Context::put`] on this same Context or it will deadlock.
    pub fn for_each<F, R>(&self, mut f: F) -> Vec<R>
    where
        F: FnMut(&str, &Value) -> R,
    {
        let values = self.read();
        let mut out = Vec::with_capacity(values.len());
        for (k, v) in values.iter() {
            out.push(f(k, v));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock can't leave the map half-written
    // (every critical section is a single HashMap call), so poisoning is
    // safe to ignore.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> FromIterator<(K, V)> for Context
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let ctx = Context::new();
        for (k, v) in iter {
            ctx.put(k, v);
        }
        ctx
    }
}

// -----------------------------------------------------------------------------
// NOTES:
//
// 1. Why std::sync::RwLock and not tokio's?
//    - get()/put() never hold the lock across an .await
//    - Parse functions are plain (non-async) functions, so they need a
//      blocking API anyway
//
// 2. Why does get_any() clone?
//    - Handing out a reference would keep the read lock alive in the caller
//    - Values are small; records are the only potentially large variant
// -----------------------------------------------------------------------------
