//! Error types raised by the engine surfaces.

use thiserror::Error;
use ydelta_lib0::ReadError;

/// Anything a malformed or inapplicable update can trigger.
///
/// Updates are decoded in full before any store mutation, so when one
/// of these is returned from an apply path the document state is
/// unchanged.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update codec: {0}")]
    Codec(#[from] ReadError),
    #[error("unknown content ref {0}")]
    UnknownContentRef(u8),
    #[error("unknown type ref {0}")]
    UnknownTypeRef(u64),
    #[error("negative clock value")]
    InvalidClock,
    #[error("zero-length struct")]
    EmptyStruct,
    #[error("item parent cannot be resolved")]
    InvalidParent,
    #[error("invalid json payload")]
    InvalidJson,
    #[error("index out of range")]
    OutOfRange,
    #[error(transparent)]
    Content(#[from] ContentError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("content cannot be spliced")]
    AtomicSplice,
}

/// Returned by observer callbacks. Dispatch logs failures and keeps
/// calling the remaining subscribers.
#[derive(Debug, Error)]
#[error("observer callback failed: {0}")]
pub struct ObserverError(pub String);
