//! Operator contracts: sources, processors, and the writer seam between them

use crate::context::Context;
use crate::error::FlowError;
use crate::tuple::Tuple;
use async_trait::async_trait;

/// Destination for tuples. Writers are shared across the worker tasks of
/// a node, so implementations take `&self` and use interior mutability
/// where they buffer. `close` is called exactly once by the owner of the
/// writer; it does not have to be idempotent.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(&self, ctx: &Context, tuple: Tuple) -> Result<(), FlowError>;
    async fn close(&self, ctx: &Context) -> Result<(), FlowError>;
}

/// Produces tuples into a writer until exhausted, stopped, or fatally
/// failed.
#[async_trait]
pub trait Source: Send + Sync {
    /// Keeps writing tuples until there is nothing left to produce or
    /// [`Source::stop`] was requested. After a stop request this should
    /// return promptly, either `Ok` or the [`crate::SourceStopped`]
    /// sentinel, not a fatal error. The writer is owned by the topology;
    /// the source must not close it.
    async fn generate_stream(&self, ctx: &Context, writer: &dyn Writer) -> Result<(), FlowError>;

    /// Requests the source to stop. Must be safe under a concurrent
    /// `generate_stream`.
    async fn stop(&self, ctx: &Context) -> Result<(), FlowError>;
}

/// Consumes one tuple and emits zero or more tuples into a writer.
///
/// Statefulness is a capability: stateful processors override `init` and
/// `terminate`, everything else inherits the no-op defaults. The
/// topology calls `init` on every processor before tuples flow and
/// `terminate` exactly once when the owning node shuts down.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn init(&self, _ctx: &Context) -> Result<(), FlowError> {
        Ok(())
    }

    async fn process(
        &self,
        ctx: &Context,
        tuple: Tuple,
        out: &dyn Writer,
    ) -> Result<(), FlowError>;

    async fn terminate(&self, _ctx: &Context) -> Result<(), FlowError> {
        Ok(())
    }
}
