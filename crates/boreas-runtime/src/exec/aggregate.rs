//! Built-in aggregate functions over collected group inputs

use crate::exec::evaluator::Evaluator;
use anyhow::{bail, Result};
use boreas_core::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;

/// Computes one value from the inputs collected for a group. The input
/// slice holds one entry per row of the group, in window order.
pub trait AggregateFunc: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, values: &[Value]) -> Result<Value>;
}

/// Number of collected inputs, nulls included (`count(*)` semantics).
pub struct Count;

impl AggregateFunc for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn apply(&self, values: &[Value]) -> Result<Value> {
        Ok(Value::Int(values.len() as i64))
    }
}

/// Sum over the numeric inputs. Stays `Int` while every input is an
/// integer, widens to `Float` otherwise. Nulls are skipped; an all-null
/// or empty input yields `Null`.
pub struct Sum;

impl AggregateFunc for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn apply(&self, values: &[Value]) -> Result<Value> {
        let mut int_sum: i64 = 0;
        let mut float_sum: f64 = 0.0;
        let mut all_int = true;
        let mut seen = false;
        for v in values {
            match v {
                Value::Null => {}
                Value::Int(n) => {
                    seen = true;
                    int_sum += n;
                    float_sum += *n as f64;
                }
                Value::Float(n) => {
                    seen = true;
                    all_int = false;
                    float_sum += n;
                }
                other => bail!("sum: cannot add a {}", other.value_type()),
            }
        }
        if !seen {
            Ok(Value::Null)
        } else if all_int {
            Ok(Value::Int(int_sum))
        } else {
            Ok(Value::Float(float_sum))
        }
    }
}

/// Arithmetic mean of the numeric inputs; `Null` when there are none.
pub struct Avg;

impl AggregateFunc for Avg {
    fn name(&self) -> &str {
        "avg"
    }

    fn apply(&self, values: &[Value]) -> Result<Value> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for v in values {
            match v {
                Value::Null => {}
                Value::Int(n) => {
                    sum += *n as f64;
                    count += 1;
                }
                Value::Float(n) => {
                    sum += n;
                    count += 1;
                }
                other => bail!("avg: cannot average a {}", other.value_type()),
            }
        }
        if count == 0 {
            Ok(Value::Null)
        } else {
            Ok(Value::Float(sum / count as f64))
        }
    }
}

/// Smallest input under the ordering of [`compare`]; `Null` when there
/// are no non-null inputs.
pub struct Min;

impl AggregateFunc for Min {
    fn name(&self) -> &str {
        "min"
    }

    fn apply(&self, values: &[Value]) -> Result<Value> {
        fold_extreme(values, Ordering::Less)
    }
}

/// Largest input under the ordering of [`compare`]; `Null` when there
/// are no non-null inputs.
pub struct Max;

impl AggregateFunc for Max {
    fn name(&self) -> &str {
        "max"
    }

    fn apply(&self, values: &[Value]) -> Result<Value> {
        fold_extreme(values, Ordering::Greater)
    }
}

fn fold_extreme(values: &[Value], keep: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for v in values {
        if matches!(v, Value::Null) {
            continue;
        }
        best = match best {
            None => Some(v),
            Some(b) => {
                if compare(v, b)? == keep {
                    Some(v)
                } else {
                    Some(b)
                }
            }
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

/// Orders two comparable values: numbers against numbers (ints and
/// floats mix), strings against strings, timestamps against timestamps.
/// Anything else is an error.
fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Ok(x.cmp(y)),
        _ => {
            let (x, y) = (a.as_float(), b.as_float());
            match (x, y) {
                (Ok(x), Ok(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
                _ => bail!(
                    "cannot compare {} with {}",
                    a.value_type(),
                    b.value_type()
                ),
            }
        }
    }
}

/// Evaluator that applies an aggregate function to the array collected
/// under its input key. Grouping exposes each aggregate input as an
/// ordinary array value before projections run, which is exactly what
/// this reads.
pub struct AggregateCall {
    func: Arc<dyn AggregateFunc>,
    input_key: String,
}

impl AggregateCall {
    pub fn new(func: Arc<dyn AggregateFunc>, input_key: impl Into<String>) -> Self {
        Self {
            func,
            input_key: input_key.into(),
        }
    }
}

impl Evaluator for AggregateCall {
    fn eval(&self, input: &Map) -> Result<Value> {
        match input.get(&self.input_key) {
            Some(Value::Array(values)) => self.func.apply(values),
            Some(other) => bail!(
                "aggregate input '{}' is a {}, not an array",
                self.input_key,
                other.value_type()
            ),
            None => bail!("aggregate input '{}' is missing", self.input_key),
        }
    }
}
