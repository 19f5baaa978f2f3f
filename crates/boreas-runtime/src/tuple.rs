//! Tuples flowing through a topology

use crate::context::Context;
use boreas_core::{Map, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a trace event stamped onto a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceKind {
    /// A node received the tuple.
    Input,
    /// An operator emitted the tuple.
    Output,
}

/// One entry in a tuple's trace log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: TraceKind,
    /// Name of the node or source that stamped the event.
    pub stage: String,
    pub at: DateTime<Utc>,
}

/// The unit of data flowing through the engine: a map payload plus
/// routing metadata and an optional trace log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub data: Map,
    /// Set by the pipe that forwarded this tuple; names the input under
    /// which the receiving node registered that pipe.
    pub input_name: String,
    /// Wall-clock time of the event itself.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time of admission to the engine.
    pub proc_timestamp: DateTime<Utc>,
    pub batch_id: i64,
    pub trace: Vec<TraceEvent>,
}

impl Tuple {
    pub fn new(data: Map) -> Self {
        let now = Utc::now();
        Self {
            data,
            input_name: String::new(),
            timestamp: now,
            proc_timestamp: now,
            batch_id: 0,
            trace: Vec::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_batch_id(mut self, batch_id: i64) -> Self {
        self.batch_id = batch_id;
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deep copy, safe for independent mutation downstream. `Value` owns
    /// all of its data, so `Clone` already copies the payload fully.
    pub fn copy(&self) -> Tuple {
        self.clone()
    }

    /// Stamps a trace event when tracing is enabled in the context.
    pub fn add_trace(&mut self, ctx: &Context, kind: TraceKind, stage: impl Into<String>) {
        if ctx.tuple_trace_enabled() {
            self.trace.push(TraceEvent {
                kind,
                stage: stage.into(),
                at: Utc::now(),
            });
        }
    }
}
