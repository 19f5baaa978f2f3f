//! Typed errors for the value data model

use crate::value::ValueType;
use thiserror::Error;

/// Returned when a [`crate::Value`] accessor is called on a variant the
/// conversion is not defined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot cast {from} to {to}")]
pub struct CastError {
    pub from: ValueType,
    pub to: ValueType,
}

impl CastError {
    pub fn new(from: ValueType, to: ValueType) -> Self {
        Self { from, to }
    }
}

/// Returned when a dotted path cannot be written into a map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path or path segment")]
    Empty,
    #[error("path segment '{0}' holds a value that is not a map")]
    NotAMap(String),
}
