//! Assembles a static topology from named operators

use crate::fanout::Fanout;
use crate::node::{Node, ProcessorWriter, TraceWriter};
use crate::operator::{Processor, Source, Writer};
use crate::pipe::{pipe, PipeReceiver};
use crate::sink::{Sink, SinkWriter};
use crate::topology::StaticTopology;
use crate::tuple::TraceKind;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_PIPE_CAPACITY: usize = 1024;

/// Errors detected while assembling a topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("duplicate node name '{0}'")]
    DuplicateName(String),

    #[error("node '{node}' declares unknown input '{input}'")]
    UnknownInput { node: String, input: String },

    #[error("node '{node}' cannot read from sink '{input}'")]
    InputFromSink { node: String, input: String },

    #[error("node '{node}' declares input '{input}' twice")]
    DuplicateInput { node: String, input: String },

    #[error("node '{0}' has no inputs")]
    NoInput(String),
}

/// Declares inputs for the processor or sink that was just added.
pub struct InputDeclarer<'a> {
    builder: &'a mut StaticTopologyBuilder,
    node: String,
}

impl InputDeclarer<'_> {
    /// Declares the named upstream node as an input. Tuples arriving
    /// over this connection carry the upstream name as their input name.
    pub fn input(self, upstream: impl Into<String>) -> Self {
        let upstream = upstream.into();
        self.builder.edges.push((upstream, self.node.clone()));
        self
    }
}

/// Builder collecting named sources, processors, and sinks plus the
/// connections between them. `build` validates the graph and wires the
/// pipes and fanouts.
pub struct StaticTopologyBuilder {
    sources: IndexMap<String, Arc<dyn Source>>,
    processors: IndexMap<String, Arc<dyn Processor>>,
    sinks: IndexMap<String, Arc<dyn Sink>>,
    /// (upstream, downstream) pairs in declaration order.
    edges: Vec<(String, String)>,
    duplicates: Vec<String>,
    pipe_capacity: usize,
}

impl Default for StaticTopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticTopologyBuilder {
    pub fn new() -> Self {
        Self {
            sources: IndexMap::new(),
            processors: IndexMap::new(),
            sinks: IndexMap::new(),
            edges: Vec::new(),
            duplicates: Vec::new(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    /// Buffer capacity of every pipe created by `build`.
    pub fn pipe_capacity(&mut self, capacity: usize) -> &mut Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    fn note_name(&mut self, name: &str) {
        if self.sources.contains_key(name)
            || self.processors.contains_key(name)
            || self.sinks.contains_key(name)
        {
            self.duplicates.push(name.to_string());
        }
    }

    pub fn add_source(&mut self, name: impl Into<String>, source: Arc<dyn Source>) -> &mut Self {
        let name = name.into();
        self.note_name(&name);
        self.sources.insert(name, source);
        self
    }

    pub fn add_processor(
        &mut self,
        name: impl Into<String>,
        processor: Arc<dyn Processor>,
    ) -> InputDeclarer<'_> {
        let name = name.into();
        self.note_name(&name);
        self.processors.insert(name.clone(), processor);
        InputDeclarer {
            builder: self,
            node: name,
        }
    }

    pub fn add_sink(&mut self, name: impl Into<String>, sink: Arc<dyn Sink>) -> InputDeclarer<'_> {
        let name = name.into();
        self.note_name(&name);
        self.sinks.insert(name.clone(), sink);
        InputDeclarer {
            builder: self,
            node: name,
        }
    }

    /// Validates the declared graph and wires it into a topology.
    pub fn build(self) -> Result<StaticTopology, BuildError> {
        if let Some(name) = self.duplicates.into_iter().next() {
            return Err(BuildError::DuplicateName(name));
        }

        let mut seen_edges: Vec<&(String, String)> = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            let (upstream, node) = edge;
            if self.sinks.contains_key(upstream) {
                return Err(BuildError::InputFromSink {
                    node: node.clone(),
                    input: upstream.clone(),
                });
            }
            if !self.sources.contains_key(upstream) && !self.processors.contains_key(upstream) {
                return Err(BuildError::UnknownInput {
                    node: node.clone(),
                    input: upstream.clone(),
                });
            }
            if seen_edges.contains(&edge) {
                return Err(BuildError::DuplicateInput {
                    node: node.clone(),
                    input: upstream.clone(),
                });
            }
            seen_edges.push(edge);
        }

        for name in self.processors.keys().chain(self.sinks.keys()) {
            if !self.edges.iter().any(|(_, down)| down == name) {
                return Err(BuildError::NoInput(name.clone()));
            }
        }

        // one pipe per connection; the receiver is keyed under the
        // upstream name on the consuming node, the sender joins the
        // upstream's fanout
        let mut fanouts: HashMap<String, Fanout> = HashMap::new();
        let mut receivers: HashMap<String, Vec<(String, PipeReceiver)>> = HashMap::new();
        for (upstream, node) in &self.edges {
            let (tx, rx) = pipe(upstream.clone(), self.pipe_capacity);
            fanouts
                .entry(upstream.clone())
                .or_default()
                .add_destination(node.clone(), Arc::new(tx));
            receivers
                .entry(node.clone())
                .or_default()
                .push((upstream.clone(), rx));
        }

        let mut nodes: HashMap<String, Node> = HashMap::new();
        for (name, processor) in &self.processors {
            let fanout = fanouts.remove(name).unwrap_or_default();
            let dst = ProcessorWriter::new(processor.clone(), name.clone(), Arc::new(fanout));
            let mut node = Node::new(Arc::new(dst));
            for (input, rx) in receivers.remove(name).unwrap_or_default() {
                node.add_input(input, rx);
            }
            nodes.insert(name.clone(), node);
        }
        for (name, sink) in &self.sinks {
            let dst = SinkWriter::new(name.clone(), sink.clone());
            let mut node = Node::new(Arc::new(dst));
            for (input, rx) in receivers.remove(name).unwrap_or_default() {
                node.add_input(input, rx);
            }
            nodes.insert(name.clone(), node);
        }

        let mut src_dsts: HashMap<String, Arc<dyn Writer>> = HashMap::new();
        for name in self.sources.keys() {
            let fanout = fanouts.remove(name).unwrap_or_default();
            let dst = TraceWriter::new(Arc::new(fanout), TraceKind::Output, name.clone());
            src_dsts.insert(name.clone(), Arc::new(dst));
        }

        Ok(StaticTopology::new(
            self.sources.into_iter().collect(),
            self.processors.into_iter().collect(),
            nodes,
            src_dsts,
        ))
    }
}
