//! Environment manager error types.

use thiserror::Error;

use crate::cipher::CipherError;

/// Errors returned by the environment manager.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment not found: {0}")]
    NotFound(String),

    #[error("environment {id} is locked by {holder}")]
    Locked { id: String, holder: String },

    #[error("environment {id} is already locked by {holder}")]
    AlreadyLocked { id: String, holder: String },

    #[error("environment {0} is not locked")]
    NotLocked(String),

    #[error("environment {id} is locked by {holder}, not by the requester")]
    LockHeldByOther { id: String, holder: String },

    #[error("invalid environment: {0}")]
    Invalid(String),

    #[error("environment {0} was modified concurrently, retry the operation")]
    ConcurrentModification(String),

    #[error("secret error: {0}")]
    Cipher(#[from] CipherError),

    #[error("state store error: {0}")]
    State(#[from] deckhand_state::StateError),
}

pub type EnvResult<T> = Result<T, EnvError>;
