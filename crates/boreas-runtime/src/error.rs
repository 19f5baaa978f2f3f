//! Error classification crossing operator boundaries

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Sentinel returned by a source whose `stop` was requested. Not fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("source has been stopped")]
pub struct SourceStopped;

/// Sentinel returned by a rewindable source that was asked to rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("source has been rewound")]
pub struct SourceRewound;

/// An error crossing an operator boundary. Carries two orthogonal
/// attributes on top of the underlying error: *fatal* (the node cannot
/// continue) and *temporary* (the operation may be retried).
#[derive(Debug)]
pub struct FlowError {
    inner: anyhow::Error,
    fatal: bool,
    temporary: bool,
}

impl FlowError {
    /// An ordinary error: not fatal, not temporary.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            fatal: false,
            temporary: false,
        }
    }

    /// Wraps an error as fatal for the reporting node.
    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::new(err).into_fatal()
    }

    /// Wraps an error as temporary (retryable).
    pub fn temporary(err: impl Into<anyhow::Error>) -> Self {
        let mut e = Self::new(err);
        e.temporary = true;
        e
    }

    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Converts a panic payload into a fatal error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::fatal(anyhow::anyhow!("panic: {msg}"))
    }

    /// Adds context to the message, preserving the classification.
    pub fn context(mut self, msg: impl fmt::Display + Send + Sync + 'static) -> Self {
        self.inner = self.inner.context(msg);
        self
    }

    /// True when the underlying error is the stop sentinel.
    pub fn is_stop_signal(&self) -> bool {
        self.inner.is::<SourceStopped>()
    }

    /// True when the underlying error is `E`.
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.is::<E>()
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl StdError for FlowError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.inner)
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}

impl From<SourceStopped> for FlowError {
    fn from(err: SourceStopped) -> Self {
        Self::new(anyhow::Error::new(err))
    }
}

impl From<SourceRewound> for FlowError {
    fn from(err: SourceRewound) -> Self {
        Self::new(anyhow::Error::new(err))
    }
}

/// Collects errors from an operation applied to several destinations and
/// folds them into one. The composite is fatal if any constituent is.
#[derive(Debug, Default)]
pub struct BulkErrors {
    errors: Vec<FlowError>,
}

impl BulkErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: FlowError) {
        self.errors.push(err);
    }

    pub fn into_result(mut self) -> Result<(), FlowError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => {
                let fatal = self.errors.iter().any(FlowError::is_fatal);
                let msg = self
                    .errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                let err = FlowError::new(anyhow::anyhow!(msg));
                Err(if fatal { err.into_fatal() } else { err })
            }
        }
    }
}

/// Errors from topology lifecycle operations.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("the topology has already started")]
    AlreadyStarted,

    #[error("failed to initialize processor '{name}'")]
    Init {
        name: String,
        #[source]
        source: FlowError,
    },

    #[error(
        "{count} source(s) could not be stopped but the topology has stopped: failed sources = {}",
        .names.join(", ")
    )]
    SourcesNotStopped { count: usize, names: Vec<String> },
}
