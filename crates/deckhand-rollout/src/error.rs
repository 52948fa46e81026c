//! Executor error types.

use thiserror::Error;

use crate::result::DeploymentResult;

/// Why a deployment did not end in `success`.
///
/// Failures carry the full [`DeploymentResult`] so callers can persist the
/// step log even when they propagate the error.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The request itself was unusable; nothing was executed.
    #[error("invalid deployment config: {0}")]
    InvalidConfig(String),

    #[error("deployment failed at step '{step}': {error}")]
    Failed {
        step: String,
        error: String,
        result: Box<DeploymentResult>,
    },

    #[error("deployment rolled back: {reason}")]
    RolledBack {
        reason: String,
        result: Box<DeploymentResult>,
    },
}

impl ExecuteError {
    /// The partial result, if anything was executed.
    pub fn result(&self) -> Option<&DeploymentResult> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::Failed { result, .. } | Self::RolledBack { result, .. } => Some(result),
        }
    }

    pub fn into_result(self) -> Option<DeploymentResult> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::Failed { result, .. } | Self::RolledBack { result, .. } => Some(*result),
        }
    }
}
