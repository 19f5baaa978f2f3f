//! Per-row expression evaluation contract

use anyhow::Result;
use boreas_core::{Map, Value};

/// Evaluates one expression against one input row. Implementations are
/// pure: the same row yields the same value.
pub trait Evaluator: Send + Sync {
    fn eval(&self, input: &Map) -> Result<Value>;
}

/// Always yields the same value.
pub struct Constant(pub Value);

impl Evaluator for Constant {
    fn eval(&self, _input: &Map) -> Result<Value> {
        Ok(self.0.clone())
    }
}

/// Reads a dotted path out of the input row. Missing keys and paths
/// through non-map values yield `Null`.
pub struct FieldAccess {
    path: Vec<String>,
}

impl FieldAccess {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.split('.').map(str::to_string).collect(),
        }
    }
}

impl Evaluator for FieldAccess {
    fn eval(&self, input: &Map) -> Result<Value> {
        let mut segments = self.path.iter();
        let first = match segments.next() {
            Some(s) => s,
            None => return Ok(Value::Null),
        };
        let mut cur = match input.get(first) {
            Some(v) => v,
            None => return Ok(Value::Null),
        };
        for seg in segments {
            match cur.get(seg) {
                Some(v) => cur = v,
                None => return Ok(Value::Null),
            }
        }
        Ok(cur.clone())
    }
}
