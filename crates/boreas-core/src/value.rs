//! Runtime values flowing through tuples

use crate::error::{CastError, PathError};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;

/// An ordered sequence of values.
pub type Array = Vec<Value>;

/// An insertion-ordered mapping from string keys to values.
pub type Map = IndexMap<String, Value>;

/// A runtime value. Cloning is a deep copy: every variant owns its data.
///
/// Equality is canonical per variant (`Int(1)` and `Float(1.0)` are not
/// equal); map equality ignores insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    Array(Array),
    Map(Map),
    Blob(Vec<u8>),
}

/// Type tag of a [`Value`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Blob,
    Timestamp,
    Array,
    Map,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Blob => "blob",
            ValueType::Timestamp => "timestamp",
            ValueType::Array => "array",
            ValueType::Map => "map",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::Blob(_) => ValueType::Blob,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Array(_) => ValueType::Array,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn as_bool(&self) -> Result<bool, CastError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(CastError::new(other.value_type(), ValueType::Bool)),
        }
    }

    /// Int or Float (truncated). Everything else is a cast error.
    pub fn as_int(&self) -> Result<i64, CastError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(n) => Ok(*n as i64),
            other => Err(CastError::new(other.value_type(), ValueType::Int)),
        }
    }

    /// Float or Int (widened). Everything else is a cast error.
    pub fn as_float(&self) -> Result<f64, CastError> {
        match self {
            Value::Float(n) => Ok(*n),
            Value::Int(n) => Ok(*n as f64),
            other => Err(CastError::new(other.value_type(), ValueType::Float)),
        }
    }

    pub fn as_str(&self) -> Result<&str, CastError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(CastError::new(other.value_type(), ValueType::Str)),
        }
    }

    pub fn as_blob(&self) -> Result<&[u8], CastError> {
        match self {
            Value::Blob(b) => Ok(b),
            other => Err(CastError::new(other.value_type(), ValueType::Blob)),
        }
    }

    pub fn as_timestamp(&self) -> Result<DateTime<Utc>, CastError> {
        match self {
            Value::Timestamp(ts) => Ok(*ts),
            other => Err(CastError::new(other.value_type(), ValueType::Timestamp)),
        }
    }

    pub fn as_array(&self) -> Result<&Array, CastError> {
        match self {
            Value::Array(a) => Ok(a),
            other => Err(CastError::new(other.value_type(), ValueType::Array)),
        }
    }

    pub fn as_map(&self) -> Result<&Map, CastError> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(CastError::new(other.value_type(), ValueType::Map)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        match self {
            Value::Array(a) => a.get(idx),
            _ => None,
        }
    }

    /// Canonical hash: `a == b` implies `a.canonical_hash() ==
    /// b.canonical_hash()` for every pair of values.
    pub fn canonical_hash(&self) -> u64 {
        let mut state = FxHasher::default();
        self.feed(&mut state);
        state.finish()
    }

    fn feed<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Bool(b) => {
                state.write_u8(1);
                state.write_u8(*b as u8);
            }
            Value::Int(n) => {
                state.write_u8(2);
                state.write_i64(*n);
            }
            Value::Float(n) => {
                state.write_u8(3);
                // 0.0 and -0.0 compare equal, so they must hash alike
                let n = if *n == 0.0 { 0.0 } else { *n };
                state.write_u64(n.to_bits());
            }
            Value::Str(s) => {
                state.write_u8(4);
                state.write(s.as_bytes());
                state.write_u8(0xff);
            }
            Value::Blob(b) => {
                state.write_u8(5);
                state.write(b);
                state.write_u8(0xff);
            }
            Value::Timestamp(ts) => {
                state.write_u8(6);
                state.write_i64(ts.timestamp());
                state.write_u32(ts.timestamp_subsec_nanos());
            }
            Value::Array(a) => feed_array(a, state),
            Value::Map(m) => feed_map(m, state),
        }
    }
}

fn feed_array<H: Hasher>(values: &[Value], state: &mut H) {
    state.write_u8(7);
    state.write_usize(values.len());
    for v in values {
        v.feed(state);
    }
}

fn feed_map<H: Hasher>(map: &Map, state: &mut H) {
    state.write_u8(8);
    state.write_usize(map.len());
    // map equality ignores insertion order, so the hash must too
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
    for (k, v) in entries {
        state.write(k.as_bytes());
        state.write_u8(0xff);
        v.feed(state);
    }
}

/// Canonical hash of a value sequence, identical to hashing
/// `Value::Array` over the same values.
pub fn hash_array(values: &[Value]) -> u64 {
    let mut state = FxHasher::default();
    feed_array(values, &mut state);
    state.finish()
}

/// Canonical hash of a map, identical to hashing `Value::Map` over the
/// same entries.
pub fn hash_map(map: &Map) -> u64 {
    let mut state = FxHasher::default();
    feed_map(map, &mut state);
    state.finish()
}

/// Assigns `value` at the dotted `path` inside `map`, creating
/// intermediate maps on the way down.
pub fn set_path(map: &mut Map, path: &str, value: Value) -> Result<(), PathError> {
    let segments: Vec<&str> = path.split('.').collect();
    if path.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(PathError::Empty);
    }

    let mut cur = map;
    for seg in &segments[..segments.len() - 1] {
        let entry = cur
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Map(Map::new()));
        match entry {
            Value::Map(m) => cur = m,
            _ => return Err(PathError::NotAMap((*seg).to_string())),
        }
    }
    cur.insert(segments[segments.len() - 1].to_string(), value);
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the textual form is defined by the JSON serialization
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "(unserializable {})", self.value_type()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        match o {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
