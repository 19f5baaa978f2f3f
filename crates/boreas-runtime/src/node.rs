//! Execution container for a processor or sink: fan-in, error handling,
//! panic containment, and input draining

use crate::context::Context;
use crate::error::FlowError;
use crate::operator::{Processor, Writer};
use crate::pipe::PipeReceiver;
use crate::topology::StaticTopology;
use crate::tuple::{TraceKind, Tuple};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Writer adapter that stamps a trace event before forwarding.
pub(crate) struct TraceWriter {
    w: Arc<dyn Writer>,
    kind: TraceKind,
    stage: String,
}

impl TraceWriter {
    pub(crate) fn new(w: Arc<dyn Writer>, kind: TraceKind, stage: impl Into<String>) -> Self {
        Self {
            w,
            kind,
            stage: stage.into(),
        }
    }
}

#[async_trait]
impl Writer for TraceWriter {
    async fn write(&self, ctx: &Context, mut tuple: Tuple) -> Result<(), FlowError> {
        tuple.add_trace(ctx, self.kind, &self.stage);
        self.w.write(ctx, tuple).await
    }

    async fn close(&self, ctx: &Context) -> Result<(), FlowError> {
        self.w.close(ctx).await
    }
}

/// Writer adapter that runs tuples through a processor. Output traces
/// are stamped by the inner trace writer the moment the processor emits.
pub(crate) struct ProcessorWriter {
    processor: Arc<dyn Processor>,
    name: String,
    dst: TraceWriter,
}

impl ProcessorWriter {
    pub(crate) fn new(
        processor: Arc<dyn Processor>,
        name: impl Into<String>,
        dst: Arc<dyn Writer>,
    ) -> Self {
        let name = name.into();
        Self {
            dst: TraceWriter::new(dst, TraceKind::Output, name.clone()),
            processor,
            name,
        }
    }
}

#[async_trait]
impl Writer for ProcessorWriter {
    async fn write(&self, ctx: &Context, mut tuple: Tuple) -> Result<(), FlowError> {
        tuple.add_trace(ctx, TraceKind::Input, &self.name);
        self.processor.process(ctx, tuple, &self.dst).await
    }

    async fn close(&self, ctx: &Context) -> Result<(), FlowError> {
        let terminated = AssertUnwindSafe(self.processor.terminate(ctx))
            .catch_unwind()
            .await;
        let closed = self.dst.close(ctx).await;
        match terminated {
            // an error from the processor outranks a close error
            Ok(Ok(())) => closed,
            Ok(Err(err)) => Err(err),
            Err(payload) => Err(FlowError::from_panic(payload)),
        }
    }
}

/// One consumer node of the topology: a set of inbound pipes feeding a
/// single destination writer (a wrapped processor or a sink).
pub(crate) struct Node {
    dst: Arc<dyn Writer>,
    inputs: HashMap<String, PipeReceiver>,
}

impl Node {
    pub(crate) fn new(dst: Arc<dyn Writer>) -> Self {
        Self {
            dst,
            inputs: HashMap::new(),
        }
    }

    pub(crate) fn add_input(&mut self, name: impl Into<String>, rx: PipeReceiver) {
        self.inputs.insert(name.into(), rx);
    }

    /// Runs one worker per inbound pipe and closes the destination once
    /// every worker has exited.
    pub(crate) async fn run(self, ctx: Context, topology: StaticTopology, name: String) {
        let Node { dst, inputs } = self;
        // One-shot latch: however many workers race into a fatal
        // condition, exactly one notification goes out for this node.
        let latch = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(inputs.len());
        for (_input, rx) in inputs {
            handles.push(tokio::spawn(consume_input(
                rx,
                dst.clone(),
                ctx.clone(),
                topology.clone(),
                name.clone(),
                latch.clone(),
            )));
        }
        for handle in handles {
            let _ = handle.await;
        }

        if let Err(err) = dst.close(&ctx).await {
            error!(node = %name, error = %err, "cannot close the node output");
        }
    }
}

async fn consume_input(
    mut rx: PipeReceiver,
    dst: Arc<dyn Writer>,
    ctx: Context,
    topology: StaticTopology,
    name: String,
    latch: Arc<AtomicBool>,
) {
    while let Some(tuple) = rx.recv().await {
        match AssertUnwindSafe(dst.write(&ctx, tuple)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_fatal() => {
                report_fatal(&ctx, &topology, &name, &latch, err);
                drain(&mut rx).await;
                return;
            }
            Ok(Err(err)) if err.is_temporary() => {
                // retry is reserved at this boundary; for now the tuple
                // is skipped
                debug!(node = %name, error = %err, "temporary write error, tuple skipped");
            }
            Ok(Err(err)) => {
                warn!(node = %name, error = %err, "cannot write a tuple, skipping it");
            }
            Err(payload) => {
                report_fatal(&ctx, &topology, &name, &latch, FlowError::from_panic(payload));
                drain(&mut rx).await;
                return;
            }
        }
    }
}

fn report_fatal(
    ctx: &Context,
    topology: &StaticTopology,
    name: &str,
    latch: &AtomicBool,
    err: FlowError,
) {
    if latch
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        error!(node = %name, error = %err, "node had a fatal error");
        topology.notify_fatal(ctx, name, &err);
    }
}

/// A pipe has a single reader and cannot be closed from that side.
/// Once this worker is dead, the only way to let the producer terminate
/// is to keep reading and discarding until the sender closes.
async fn drain(rx: &mut PipeReceiver) {
    while rx.recv().await.is_some() {}
}
