//! Boreas Runtime - static topology execution engine
//!
//! A topology is a graph of user-supplied sources, processors, and sinks
//! joined by bounded in-order pipes. This crate owns the lifecycle state
//! machine, fan-in/fan-out wiring, backpressure, panic containment, and
//! the grouping/aggregation operator that query plans place inside a
//! processor.

pub mod builder;
pub mod context;
pub mod error;
pub mod exec;
pub mod fanout;
pub mod node;
pub mod operator;
pub mod pipe;
pub mod sink;
pub mod topology;
pub mod tuple;

pub use builder::{BuildError, StaticTopologyBuilder};
pub use context::{Context, ContextConfig};
pub use error::{FlowError, SourceRewound, SourceStopped, TopologyError};
pub use operator::{Processor, Source, Writer};
pub use sink::Sink;
pub use topology::{StaticTopology, TopologyState};
pub use tuple::{TraceEvent, TraceKind, Tuple};
