//! Grouping/aggregation over a buffered window of input rows

use crate::context::Context;
use crate::error::FlowError;
use crate::exec::evaluator::Evaluator;
use crate::operator::{Processor, Writer};
use crate::tuple::Tuple;
use anyhow::Result;
use async_trait::async_trait;
use boreas_core::{hash_array, hash_map, set_path, Array, Map, Value};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Alias marking the post-aggregation filter projection.
pub const HAVING_ALIAS: &str = ":having:";

/// One projected output column of a grouping plan.
pub struct Projection {
    alias: String,
    evaluator: Arc<dyn Evaluator>,
    /// Aggregate parameter evaluators keyed by their input identifier.
    /// The identifier doubles as the key under which the collected
    /// inputs are exposed to `evaluator` as an array.
    aggr_inputs: IndexMap<String, Arc<dyn Evaluator>>,
}

impl Projection {
    /// Projection written to the output row under `alias`. The alias is
    /// a dotted path into the output map.
    pub fn new(alias: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            alias: alias.into(),
            evaluator,
            aggr_inputs: IndexMap::new(),
        }
    }

    /// The HAVING filter projection. Evaluated per group; `Null` counts
    /// as false, anything else must cast to bool.
    pub fn having(evaluator: Arc<dyn Evaluator>) -> Self {
        Self::new(HAVING_ALIAS, evaluator)
    }

    /// Registers an aggregate parameter evaluator. Identifiers shared
    /// across projections are evaluated once per input row.
    pub fn with_aggregate_input(
        mut self,
        key: impl Into<String>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        self.aggr_inputs.insert(key.into(), evaluator);
        self
    }

    fn is_having(&self) -> bool {
        self.alias == HAVING_ALIAS
    }
}

/// The compiled grouping stage of a query plan: GROUP BY expressions in
/// clause order plus the projections.
pub struct GroupingPlan {
    group_by: Vec<Arc<dyn Evaluator>>,
    projections: Vec<Projection>,
}

impl GroupingPlan {
    pub fn new(group_by: Vec<Arc<dyn Evaluator>>, projections: Vec<Projection>) -> Self {
        Self {
            group_by,
            projections,
        }
    }
}

/// A window row with its cached group key and hash. The cache is filled
/// on first evaluation and reused for every re-evaluation the row
/// survives.
struct InputRow {
    input: Map,
    cache: Option<Array>,
    hash: u64,
}

/// The rows sharing one GROUP BY key: the key values themselves, the
/// collected aggregate inputs, and one representative row's columns.
struct GroupData {
    group: Array,
    agg_data: IndexMap<String, Vec<Value>>,
    non_agg_data: Map,
}

/// One output row with its content hash, ready for downstream diffing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub row: Map,
    pub hash: u64,
}

/// Executes a grouping plan over a count-based window of input rows.
/// Every admitted row triggers a full re-evaluation; the previous result
/// set is kept so a downstream relation-to-stream operator can diff.
pub struct GroupingExecutor {
    plan: GroupingPlan,
    window_size: usize,
    window: VecDeque<InputRow>,
    prev_results: Vec<ResultRow>,
    cur_results: Vec<ResultRow>,
}

impl GroupingExecutor {
    pub fn new(plan: GroupingPlan, window_size: usize) -> Self {
        Self {
            plan,
            window_size: window_size.max(1),
            window: VecDeque::new(),
            prev_results: Vec::new(),
            cur_results: Vec::new(),
        }
    }

    /// Admits a row (evicting the oldest once the window is full) and
    /// re-evaluates the plan. Returns the new current results.
    pub fn push(&mut self, row: Map) -> Result<&[ResultRow]> {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(InputRow {
            input: row,
            cache: None,
            hash: 0,
        });
        self.evaluate()?;
        Ok(&self.cur_results)
    }

    pub fn current_results(&self) -> &[ResultRow] {
        &self.cur_results
    }

    pub fn previous_results(&self) -> &[ResultRow] {
        &self.prev_results
    }

    /// Re-evaluates the plan over the buffered window, moving the old
    /// current results to the previous slot.
    ///
    /// On error the current results keep their pre-call value and the
    /// previous results end up backed by storage disjoint from them, so
    /// downstream diffing stays well-defined. The same disjointness
    /// holds after success.
    pub fn evaluate(&mut self) -> Result<()> {
        // reuse the allocation that held the results before last
        let mut output = mem::take(&mut self.prev_results);
        output.clear();

        match self.evaluate_into(&mut output) {
            Ok(()) => {
                self.prev_results = mem::replace(&mut self.cur_results, output);
                Ok(())
            }
            Err(err) => {
                output.clear();
                self.prev_results = output;
                Err(err)
            }
        }
    }

    fn evaluate_into(&mut self, output: &mut Vec<ResultRow>) -> Result<()> {
        // deduplicate aggregate parameter evaluators across projections
        // so a sub-expression shared by several aggregates is evaluated
        // once per input row
        let mut all_aggr: IndexMap<&str, &Arc<dyn Evaluator>> = IndexMap::new();
        for proj in &self.plan.projections {
            for (key, eval) in &proj.aggr_inputs {
                all_aggr.insert(key.as_str(), eval);
            }
        }

        let mut groups: FxHashMap<u64, Vec<GroupData>> = FxHashMap::default();
        // first-seen order of group hashes; the bucket map itself has no
        // usable iteration order
        let mut group_keys: Vec<u64> = Vec::new();

        for row in &mut self.window {
            eval_row(&self.plan, &all_aggr, row, &mut groups, &mut group_keys)?;
        }

        for key in &group_keys {
            if let Some(bucket) = groups.remove(key) {
                for group in bucket {
                    eval_group(&self.plan, &all_aggr, group, output)?;
                }
            }
        }

        if group_keys.is_empty() && self.plan.group_by.is_empty() {
            // no input rows and no GROUP BY clause: a single synthetic
            // group with empty aggregate inputs still yields one row
            // (count of nothing is 0); with a GROUP BY clause an empty
            // window yields nothing
            let mut agg_data = IndexMap::with_capacity(all_aggr.len());
            for key in all_aggr.keys() {
                agg_data.insert((*key).to_string(), Vec::new());
            }
            let synthetic = GroupData {
                group: Array::new(),
                agg_data,
                non_agg_data: Map::new(),
            };
            eval_group(&self.plan, &all_aggr, synthetic, output)?;
        }

        Ok(())
    }
}

/// Evaluates the GROUP BY key of one row (or reuses its cache), files
/// the row into its group, and collects its aggregate inputs.
fn eval_row(
    plan: &GroupingPlan,
    all_aggr: &IndexMap<&str, &Arc<dyn Evaluator>>,
    row: &mut InputRow,
    groups: &mut FxHashMap<u64, Vec<GroupData>>,
    group_keys: &mut Vec<u64>,
) -> Result<()> {
    if row.cache.is_none() {
        let mut values = Array::with_capacity(plan.group_by.len());
        for eval in &plan.group_by {
            values.push(eval.eval(&row.input)?);
        }
        row.hash = hash_array(&values);
        row.cache = Some(values);
    }
    let values = row.cache.as_ref().expect("group key cache just filled");

    let bucket = groups.entry(row.hash).or_default();
    if bucket.is_empty() {
        group_keys.push(row.hash);
    }
    // equal hashes do not imply equal keys; scan the bucket and compare
    // the key arrays to keep colliding groups apart
    let idx = match bucket.iter().position(|g| g.group == *values) {
        Some(idx) => idx,
        None => {
            bucket.push(make_group(all_aggr, values.clone(), &row.input));
            bucket.len() - 1
        }
    };
    let group = &mut bucket[idx];

    for (key, eval) in all_aggr {
        let value = eval.eval(&row.input)?;
        if let Some(collected) = group.agg_data.get_mut(*key) {
            collected.push(value);
        }
    }
    Ok(())
}

fn make_group(
    all_aggr: &IndexMap<&str, &Arc<dyn Evaluator>>,
    group: Array,
    input: &Map,
) -> GroupData {
    let mut agg_data = IndexMap::with_capacity(all_aggr.len());
    for key in all_aggr.keys() {
        agg_data.insert((*key).to_string(), Vec::with_capacity(1));
    }
    GroupData {
        group,
        agg_data,
        // a representative row; grouping assumes the non-aggregated
        // columns agree within a group
        non_agg_data: input.clone(),
    }
}

/// Applies HAVING and the projections to one finished group, appending
/// the surviving output row.
fn eval_group(
    plan: &GroupingPlan,
    all_aggr: &IndexMap<&str, &Arc<dyn Evaluator>>,
    mut group: GroupData,
    output: &mut Vec<ResultRow>,
) -> Result<()> {
    // expose the collected aggregate inputs to the projection
    // evaluators as ordinary array values
    for key in all_aggr.keys() {
        if let Some(collected) = group.agg_data.swap_remove(*key) {
            group.non_agg_data.insert((*key).to_string(), Value::Array(collected));
        }
    }

    for proj in &plan.projections {
        if proj.is_having() {
            let result = proj.evaluator.eval(&group.non_agg_data)?;
            let keep = match result {
                // a binary decision: Null is definitely not true
                Value::Null => false,
                other => other.as_bool()?,
            };
            if !keep {
                return Ok(());
            }
            break;
        }
    }

    let mut result = Map::with_capacity(plan.projections.len());
    for proj in &plan.projections {
        if proj.is_having() {
            continue;
        }
        let value = proj.evaluator.eval(&group.non_agg_data)?;
        set_path(&mut result, &proj.alias, value)?;
    }
    let hash = hash_map(&result);
    output.push(ResultRow { row: result, hash });
    Ok(())
}

/// Processor that runs a grouping plan over the tuples it receives. Each
/// input tuple is admitted to the window and the refreshed result rows
/// are emitted downstream as fresh tuples carrying the input's metadata.
pub struct GroupingProcessor {
    executor: Mutex<GroupingExecutor>,
}

impl GroupingProcessor {
    pub fn new(plan: GroupingPlan, window_size: usize) -> Self {
        Self {
            executor: Mutex::new(GroupingExecutor::new(plan, window_size)),
        }
    }
}

#[async_trait]
impl Processor for GroupingProcessor {
    async fn process(
        &self,
        ctx: &Context,
        tuple: Tuple,
        out: &dyn Writer,
    ) -> Result<(), FlowError> {
        let rows: Vec<Map> = {
            let mut exec = self.executor.lock().await;
            exec.push(tuple.data.clone())?;
            exec.current_results()
                .iter()
                .map(|r| r.row.clone())
                .collect()
        };
        for row in rows {
            let mut output = tuple.clone();
            output.data = row;
            out.write(ctx, output).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::aggregate::{AggregateCall, Count, Sum};
    use crate::exec::evaluator::{Constant, FieldAccess};
    use anyhow::anyhow;

    fn row(k: &str, v: i64) -> Map {
        let mut m = Map::new();
        m.insert("k".to_string(), Value::Str(k.to_string()));
        m.insert("v".to_string(), Value::Int(v));
        m
    }

    /// SELECT k, sum(v) GROUP BY k
    fn sum_by_k_plan() -> GroupingPlan {
        GroupingPlan::new(
            vec![Arc::new(FieldAccess::new("k"))],
            vec![
                Projection::new("k", Arc::new(FieldAccess::new("k"))),
                Projection::new("sum", Arc::new(AggregateCall::new(Arc::new(Sum), "agg:v")))
                    .with_aggregate_input("agg:v", Arc::new(FieldAccess::new("v"))),
            ],
        )
    }

    fn result_field<'a>(r: &'a ResultRow, key: &str) -> &'a Value {
        r.row.get(key).unwrap()
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let mut exec = GroupingExecutor::new(sum_by_k_plan(), 16);
        exec.push(row("a", 1)).unwrap();
        exec.push(row("b", 2)).unwrap();
        let results = exec.push(row("a", 3)).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(result_field(&results[0], "k"), &Value::Str("a".into()));
        assert_eq!(result_field(&results[0], "sum"), &Value::Int(4));
        assert_eq!(result_field(&results[1], "k"), &Value::Str("b".into()));
        assert_eq!(result_field(&results[1], "sum"), &Value::Int(2));
    }

    #[test]
    fn test_result_hash_matches_content() {
        let mut exec = GroupingExecutor::new(sum_by_k_plan(), 16);
        exec.push(row("a", 1)).unwrap();
        let r = &exec.current_results()[0];
        assert_eq!(r.hash, hash_map(&r.row));
    }

    #[test]
    fn test_repeat_evaluation_is_stable() {
        let mut exec = GroupingExecutor::new(sum_by_k_plan(), 16);
        exec.push(row("a", 1)).unwrap();
        exec.push(row("b", 2)).unwrap();

        exec.evaluate().unwrap();
        assert_eq!(exec.current_results(), exec.previous_results());
        // content-equal but distinct backing storage
        assert_ne!(
            exec.current_results().as_ptr(),
            exec.previous_results().as_ptr()
        );
    }

    #[test]
    fn test_rollback_keeps_current_results() {
        struct FailingEvaluator;
        impl Evaluator for FailingEvaluator {
            fn eval(&self, input: &Map) -> Result<Value> {
                if input.get("v") == Some(&Value::Int(13)) {
                    Err(anyhow!("unlucky"))
                } else {
                    FieldAccess::new("v").eval(input)
                }
            }
        }

        let plan = GroupingPlan::new(
            vec![Arc::new(FieldAccess::new("k"))],
            vec![
                Projection::new("k", Arc::new(FieldAccess::new("k"))),
                Projection::new("sum", Arc::new(AggregateCall::new(Arc::new(Sum), "agg:v")))
                    .with_aggregate_input("agg:v", Arc::new(FailingEvaluator)),
            ],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        exec.push(row("a", 1)).unwrap();
        let before = exec.current_results().to_vec();

        assert!(exec.push(row("a", 13)).is_err());
        assert_eq!(exec.current_results(), &before[..]);
        assert_ne!(
            exec.current_results().as_ptr(),
            exec.previous_results().as_ptr()
        );
    }

    #[test]
    fn test_hash_collisions_are_disambiguated() {
        let mut exec = GroupingExecutor::new(sum_by_k_plan(), 16);
        // two different keys forced into the same bucket by faking the
        // cached hashes
        exec.window.push_back(InputRow {
            input: row("a", 1),
            cache: Some(vec![Value::Str("a".into())]),
            hash: 42,
        });
        exec.window.push_back(InputRow {
            input: row("b", 2),
            cache: Some(vec![Value::Str("b".into())]),
            hash: 42,
        });
        exec.window.push_back(InputRow {
            input: row("a", 3),
            cache: Some(vec![Value::Str("a".into())]),
            hash: 42,
        });
        exec.evaluate().unwrap();

        let results = exec.current_results();
        assert_eq!(results.len(), 2);
        assert_eq!(result_field(&results[0], "sum"), &Value::Int(4));
        assert_eq!(result_field(&results[1], "sum"), &Value::Int(2));
    }

    #[test]
    fn test_having_filters_groups() {
        struct SumGreaterThan(i64);
        impl Evaluator for SumGreaterThan {
            fn eval(&self, input: &Map) -> Result<Value> {
                let sum = AggregateCall::new(Arc::new(Sum), "agg:v").eval(input)?;
                Ok(Value::Bool(sum.as_int()? > self.0))
            }
        }

        let plan = GroupingPlan::new(
            vec![Arc::new(FieldAccess::new("k"))],
            vec![
                Projection::new("k", Arc::new(FieldAccess::new("k"))),
                Projection::new("sum", Arc::new(AggregateCall::new(Arc::new(Sum), "agg:v")))
                    .with_aggregate_input("agg:v", Arc::new(FieldAccess::new("v"))),
                Projection::having(Arc::new(SumGreaterThan(3))),
            ],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        exec.push(row("a", 1)).unwrap();
        exec.push(row("b", 2)).unwrap();
        let results = exec.push(row("a", 3)).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(result_field(&results[0], "k"), &Value::Str("a".into()));
        assert_eq!(result_field(&results[0], "sum"), &Value::Int(4));
        assert!(!results[0].row.contains_key(HAVING_ALIAS));
    }

    #[test]
    fn test_having_null_suppresses_group() {
        let plan = GroupingPlan::new(
            vec![Arc::new(FieldAccess::new("k"))],
            vec![
                Projection::new("k", Arc::new(FieldAccess::new("k"))),
                Projection::having(Arc::new(Constant(Value::Null))),
            ],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        let results = exec.push(row("a", 1)).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_having_non_bool_is_an_error() {
        let plan = GroupingPlan::new(
            vec![Arc::new(FieldAccess::new("k"))],
            vec![Projection::having(Arc::new(Constant(Value::Str(
                "yes".into(),
            ))))],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        assert!(exec.push(row("a", 1)).is_err());
    }

    #[test]
    fn test_empty_window_without_group_by_yields_one_row() {
        // SELECT count(*)
        let plan = GroupingPlan::new(
            vec![],
            vec![Projection::new(
                "count",
                Arc::new(AggregateCall::new(Arc::new(Count), "agg:one")),
            )
            .with_aggregate_input("agg:one", Arc::new(Constant(Value::Int(1))))],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        exec.evaluate().unwrap();

        let results = exec.current_results();
        assert_eq!(results.len(), 1);
        assert_eq!(result_field(&results[0], "count"), &Value::Int(0));
    }

    #[test]
    fn test_empty_window_with_group_by_yields_nothing() {
        let plan = GroupingPlan::new(
            vec![Arc::new(FieldAccess::new("k"))],
            vec![Projection::new(
                "count",
                Arc::new(AggregateCall::new(Arc::new(Count), "agg:one")),
            )
            .with_aggregate_input("agg:one", Arc::new(Constant(Value::Int(1))))],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        exec.evaluate().unwrap();
        assert!(exec.current_results().is_empty());
    }

    #[test]
    fn test_window_eviction() {
        let mut exec = GroupingExecutor::new(sum_by_k_plan(), 2);
        exec.push(row("a", 1)).unwrap();
        exec.push(row("a", 2)).unwrap();
        // evicts the first row
        let results = exec.push(row("a", 4)).unwrap();
        assert_eq!(result_field(&results[0], "sum"), &Value::Int(6));
    }

    #[test]
    fn test_dotted_alias_builds_nested_output() {
        let plan = GroupingPlan::new(
            vec![Arc::new(FieldAccess::new("k"))],
            vec![Projection::new("stats.total", Arc::new(AggregateCall::new(
                Arc::new(Sum),
                "agg:v",
            )))
            .with_aggregate_input("agg:v", Arc::new(FieldAccess::new("v")))],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        let results = exec.push(row("a", 5)).unwrap();
        let stats = results[0].row.get("stats").unwrap();
        assert_eq!(stats.get("total"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_shared_aggregate_input_collected_once() {
        // count(v) + sum(v) share one parameter evaluator key
        let plan = GroupingPlan::new(
            vec![],
            vec![
                Projection::new("count", Arc::new(AggregateCall::new(Arc::new(Count), "agg:v")))
                    .with_aggregate_input("agg:v", Arc::new(FieldAccess::new("v"))),
                Projection::new("sum", Arc::new(AggregateCall::new(Arc::new(Sum), "agg:v")))
                    .with_aggregate_input("agg:v", Arc::new(FieldAccess::new("v"))),
            ],
        );
        let mut exec = GroupingExecutor::new(plan, 16);
        exec.push(row("a", 2)).unwrap();
        let results = exec.push(row("a", 3)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(result_field(&results[0], "count"), &Value::Int(2));
        assert_eq!(result_field(&results[0], "sum"), &Value::Int(5));
    }
}
