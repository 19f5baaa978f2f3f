//! Sinks and built-in sink implementations

use crate::context::Context;
use crate::error::FlowError;
use crate::operator::Writer;
use crate::tuple::{TraceKind, Tuple};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Terminal consumer of tuples; has no downstream.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<(), FlowError>;

    async fn close(&self, _ctx: &Context) -> Result<(), FlowError> {
        Ok(())
    }
}

/// Presents a sink as a node destination, stamping the input trace the
/// node contract requires.
pub(crate) struct SinkWriter {
    name: String,
    sink: Arc<dyn Sink>,
}

impl SinkWriter {
    pub(crate) fn new(name: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        Self {
            name: name.into(),
            sink,
        }
    }
}

#[async_trait]
impl Writer for SinkWriter {
    async fn write(&self, ctx: &Context, mut tuple: Tuple) -> Result<(), FlowError> {
        tuple.add_trace(ctx, TraceKind::Input, &self.name);
        self.sink.write(ctx, tuple).await
    }

    async fn close(&self, ctx: &Context) -> Result<(), FlowError> {
        self.sink.close(ctx).await
    }
}

/// Prints each tuple payload as one JSON line on stdout.
#[derive(Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    async fn write(&self, _ctx: &Context, tuple: Tuple) -> Result<(), FlowError> {
        let line = serde_json::to_string(&tuple.data).map_err(FlowError::new)?;
        println!("{line}");
        Ok(())
    }
}

/// Buffers every received tuple in memory. Cloning shares the buffer, so
/// tests keep one handle and give the other to the topology.
#[derive(Clone, Default)]
pub struct CollectorSink {
    tuples: Arc<Mutex<Vec<Tuple>>>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tuples(&self) -> Vec<Tuple> {
        self.tuples.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.tuples.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for CollectorSink {
    async fn write(&self, _ctx: &Context, tuple: Tuple) -> Result<(), FlowError> {
        self.tuples.lock().unwrap().push(tuple);
        Ok(())
    }

    async fn close(&self, _ctx: &Context) -> Result<(), FlowError> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boreas_core::Map;

    #[tokio::test]
    async fn test_collector_sink() {
        let ctx = Context::default();
        let sink = CollectorSink::new();
        let handle = sink.clone();

        sink.write(&ctx, Tuple::new(Map::new()).with_field("x", 1i64))
            .await
            .unwrap();
        sink.close(&ctx).await.unwrap();

        assert_eq!(handle.len(), 1);
        assert!(handle.is_closed());
        assert_eq!(handle.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_sink_writer_stamps_input_trace() {
        let ctx = Context::with_tuple_trace();
        let sink = CollectorSink::new();
        let writer = SinkWriter::new("out", Arc::new(sink.clone()));

        writer.write(&ctx, Tuple::new(Map::new())).await.unwrap();

        let collected = sink.tuples();
        assert_eq!(collected[0].trace.len(), 1);
        assert_eq!(collected[0].trace[0].kind, TraceKind::Input);
        assert_eq!(collected[0].trace[0].stage, "out");
    }

    #[tokio::test]
    async fn test_console_sink_accepts_tuples() {
        let ctx = Context::default();
        let sink = ConsoleSink::new();
        let t = Tuple::new(Map::new()).with_field("msg", "hello");
        assert!(sink.write(&ctx, t).await.is_ok());
    }
}
