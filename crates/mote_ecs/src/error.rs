//! # ECS Error Types
//!
//! Contract violations surface as typed errors. Expected absence (a missing
//! component, a dead entity, an archetype that already exists) is never an
//! error and is reported through `Option`, `bool` or the existing id instead.

use thiserror::Error;

use crate::ecs::{Entity, RunFlags};

/// Errors that can occur while manipulating a [`World`](crate::World).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The number of values does not match the archetype's column count.
    #[error("invalid argument count: archetype has {expected} columns, got {got} values")]
    InvalidArgumentCount {
        /// Columns declared by the archetype.
        expected: usize,
        /// Values supplied by the caller.
        got: usize,
    },

    /// The entity has not been placed in any archetype (or was removed).
    #[error("entity {0} is not placed in any archetype")]
    UninitializedEntity(Entity),

    /// An entity or archetype index lies outside the table it addresses.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Length of the addressed table.
        len: usize,
    },

    /// A column could not grow.
    #[error("out of memory while growing a column to {bytes} bytes")]
    OutOfMemory {
        /// Size of the allocation that failed.
        bytes: usize,
    },

    /// A value does not have the type declared for its column.
    #[error("type mismatch in column {column}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Column position in the archetype's declared order.
        column: usize,
        /// Declared component type.
        expected: &'static str,
        /// Supplied component type, or [`EcsError::ERASED_TYPE`] when the
        /// value arrived as a `Box<dyn Any>` and its name is unknown.
        found: &'static str,
    },

    /// A component type appears twice in one archetype or query.
    #[error("component {0} appears more than once")]
    DuplicateComponent(&'static str),

    /// Two static archetypes declare the same component set.
    #[error("static archetypes {first} and {second} declare the same component set")]
    DuplicateArchetype {
        /// The earlier declaration.
        first: &'static str,
        /// The later declaration.
        second: &'static str,
    },

    /// A static operation named an archetype the World was not built with.
    #[error("archetype {0} was not declared when the world was built")]
    UndeclaredArchetype(&'static str),

    /// A System was run against a World it was not built from.
    #[error("system was built for a different world")]
    WorldMismatch,

    /// The entry point does not support some of the requested flags.
    #[error("flags {0:?} are not supported by this entry point")]
    UnsupportedFlags(RunFlags),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EcsError {
    /// `found` of a [`EcsError::TypeMismatch`] raised for a boxed value.
    pub const ERASED_TYPE: &str = "<erased>";
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;
