use deckhand_rollout::ExecuteError;
use deckhand_state::StateError;

#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("deployment {0} not found")]
    NotFound(String),

    #[error("no successful deployment found")]
    NoSuccessfulDeployment,

    #[error("invalid rollback: {0}")]
    Invalid(String),

    /// The rollback deployment itself did not succeed. Its record has
    /// still been written.
    #[error("rollback deployment failed: {0}")]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    State(#[from] StateError),
}

pub type RollbackResult<T> = Result<T, RollbackError>;
