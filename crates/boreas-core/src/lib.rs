//! Boreas Core - data model for the Boreas streaming dataflow engine
//!
//! This crate provides the tuple payload value type and its canonical
//! equality/hashing rules, shared by every layer of the engine.

pub mod error;
pub mod value;

pub use error::{CastError, PathError};
pub use value::{hash_array, hash_map, set_path, Array, Map, Value, ValueType};
