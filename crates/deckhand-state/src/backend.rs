//! Storage traits implemented by every backend.

use crate::error::StateResult;
use crate::types::{sort_newest_first, DeploymentRecord, Environment};

/// Persistence for [`Environment`] documents.
pub trait EnvironmentStore: Send + Sync {
    /// Load one environment by id.
    fn get_environment(&self, id: &str) -> StateResult<Option<Environment>>;

    /// Load every stored environment.
    fn list_environments(&self) -> StateResult<Vec<Environment>>;

    /// Compare-and-swap write.
    ///
    /// Succeeds only when the stored revision (zero if absent) equals
    /// `expected_revision`; otherwise returns [`StateError::Conflict`] and
    /// leaves the stored document untouched. Callers bump `env.revision`
    /// before writing.
    ///
    /// [`StateError::Conflict`]: crate::StateError::Conflict
    fn put_environment_if(&self, env: &Environment, expected_revision: u64) -> StateResult<()>;

    /// Compare-and-swap delete. Returns false if nothing was stored.
    fn delete_environment_if(&self, id: &str, expected_revision: u64) -> StateResult<bool>;
}

/// Append-mostly history of deployment records, keyed by record id.
pub trait DeploymentHistory: Send + Sync {
    /// Store a new record.
    fn append(&self, record: &DeploymentRecord) -> StateResult<()>;

    /// Overwrite an existing record. Fails with `NotFound` if it does not exist.
    fn update(&self, record: &DeploymentRecord) -> StateResult<()>;

    /// Load one record by id.
    fn get(&self, id: &str) -> StateResult<Option<DeploymentRecord>>;

    /// Load every record, in no particular order.
    fn list_all(&self) -> StateResult<Vec<DeploymentRecord>>;

    /// Records for one project/environment pair, newest first.
    fn list_for(&self, project_id: &str, environment: &str) -> StateResult<Vec<DeploymentRecord>> {
        let mut records: Vec<_> = self
            .list_all()?
            .into_iter()
            .filter(|r| r.belongs_to(project_id, environment))
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Records for one project across all environments, newest first.
    fn list_for_project(&self, project_id: &str) -> StateResult<Vec<DeploymentRecord>> {
        let mut records: Vec<_> = self
            .list_all()?
            .into_iter()
            .filter(|r| r.project_id == project_id)
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }
}

/// Reject ids that would escape a storage directory or collide with
/// composite keys.
pub(crate) fn validate_key(id: &str) -> StateResult<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if bad {
        return Err(crate::StateError::InvalidKey(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_rejects_path_segments() {
        assert!(validate_key("env-1").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("..").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a\\b").is_err());
    }
}
