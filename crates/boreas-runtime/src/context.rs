//! Execution context handed to every operator call

/// Engine-wide configuration knobs.
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// When true, nodes and operators stamp trace events onto tuples.
    pub tuple_trace_enabled: bool,
}

/// Ambient configuration shared by every operator in a topology. Log
/// output goes through the global `tracing` dispatcher, so the context
/// only carries flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    config: ContextConfig,
}

impl Context {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Context with tuple tracing turned on.
    pub fn with_tuple_trace() -> Self {
        Self::new(ContextConfig {
            tuple_trace_enabled: true,
        })
    }

    pub fn tuple_trace_enabled(&self) -> bool {
        self.config.tuple_trace_enabled
    }
}
