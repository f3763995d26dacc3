use thiserror::Error;

use crate::core::CoreError;
use crate::engine::sources::{PollError, PublishError};
use crate::store::StoreError;
use crate::store::kv::KvError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// What we know about side effects when an error is returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Effect {
    /// Definitely no side effects occurred.
    None,
    /// Side effects definitely occurred (locally or remotely).
    Some,
    /// We don't know if side effects occurred.
    Unknown,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Some => "some",
            Effect::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Storage(#[from] KvError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Poll(e) => e.transience(),
            Error::Publish(e) => e.transience(),
            // Quota exhaustion clears when the host frees space.
            Error::Storage(_) => Transience::Retryable,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Core(e) => e.effect(),
            Error::Store(e) => e.effect(),
            Error::Poll(e) => e.effect(),
            Error::Publish(e) => e.effect(),
            Error::Storage(_) => Effect::None,
        }
    }
}

impl From<crate::core::error::IdentityError> for Error {
    fn from(err: crate::core::error::IdentityError) -> Self {
        Error::Core(err.into())
    }
}

impl From<crate::core::error::GuardError> for Error {
    fn from(err: crate::core::error::GuardError) -> Self {
        Error::Core(err.into())
    }
}

impl From<crate::core::error::PermissionError> for Error {
    fn from(err: crate::core::error::PermissionError) -> Self {
        Error::Core(err.into())
    }
}

impl From<crate::core::error::EventError> for Error {
    fn from(err: crate::core::error::EventError) -> Self {
        Error::Core(err.into())
    }
}
