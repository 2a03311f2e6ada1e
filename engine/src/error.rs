//! Error kinds for the store.
//!
//! Parameter-validation failures are returned as [`Error`] values and abort
//! the call. Violations of internal storage invariants are programmer errors
//! and panic instead; they are never recovered.

use crate::entity::Entity;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A handle, name or argument did not refer to anything valid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An id was used as a component without having been registered.
    #[error("entity {0:?} is not a registered component")]
    NotRegistered(Entity),

    /// A component name was re-registered with a different size.
    #[error("component {name} already registered with size {existing}, got {requested}")]
    AlreadyRegistered {
        name: String,
        existing: usize,
        requested: usize,
    },

    /// A handle fell outside the world's configured `[min, max]` range.
    #[error("handle {entity} outside configured range [{min}, {max}]")]
    OutOfRange { entity: u64, min: u64, max: u64 },

    /// Structural mutation of the main stage while a step is in progress.
    #[error("main-stage mutation while a step is in progress; use a stage")]
    InvalidWhileIterating,

    /// A value's size disagreed with the registered component size.
    #[error("size mismatch for component {component:?}: registered {registered}, got {provided}")]
    TypeMismatch {
        component: Entity,
        registered: usize,
        provided: usize,
    },

    /// A signature expression could not be parsed.
    #[error("invalid signature expression at '{0}'")]
    InvalidExpression(String),

    /// An operation whose staged semantics are deliberately unspecified.
    #[error("{0} is not supported on a stage")]
    UnsupportedOnStage(&'static str),
}
