//! StateStore: redb-backed persistence for environments and history.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing). Compare-and-swap writes run inside a single write
//! transaction, so they are atomic across threads sharing the store.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::backend::{validate_key, DeploymentHistory, EnvironmentStore};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn put_json<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

/// Revision of the environment stored under `key`, zero if absent.
fn stored_revision(
    table: &redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
) -> StateResult<u64> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let env: Environment =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(env.revision)
        }
        None => Ok(0),
    }
}

impl EnvironmentStore for StateStore {
    fn get_environment(&self, id: &str) -> StateResult<Option<Environment>> {
        validate_key(id)?;
        self.get_json(ENVIRONMENTS, id)
    }

    fn list_environments(&self) -> StateResult<Vec<Environment>> {
        self.list_json(ENVIRONMENTS)
    }

    fn put_environment_if(&self, env: &Environment, expected_revision: u64) -> StateResult<()> {
        validate_key(&env.id)?;
        let bytes = serde_json::to_vec(env).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found = {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let found = stored_revision(&table, &env.id)?;
            if found == expected_revision {
                table
                    .insert(env.id.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            found
        };
        if found != expected_revision {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::Conflict {
                key: env.id.clone(),
                expected: expected_revision,
                found,
            });
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %env.id, revision = env.revision, "environment stored");
        Ok(())
    }

    fn delete_environment_if(&self, id: &str, expected_revision: u64) -> StateResult<bool> {
        validate_key(id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (found, existed) = {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let found = stored_revision(&table, id)?;
            let existed = if found == expected_revision {
                table.remove(id).map_err(map_err!(Write))?.is_some()
            } else {
                false
            };
            (found, existed)
        };
        if found != expected_revision {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::Conflict {
                key: id.to_string(),
                expected: expected_revision,
                found,
            });
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "environment deleted");
        Ok(existed)
    }
}

impl DeploymentHistory for StateStore {
    fn append(&self, record: &DeploymentRecord) -> StateResult<()> {
        validate_key(&record.id)?;
        self.put_json(DEPLOYMENTS, &record.id, record)?;
        debug!(id = %record.id, "deployment record stored");
        Ok(())
    }

    fn update(&self, record: &DeploymentRecord) -> StateResult<()> {
        validate_key(&record.id)?;
        let bytes = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let existed = table.get(record.id.as_str()).map_err(map_err!(Read))?.is_some();
            if existed {
                table
                    .insert(record.id.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            existed
        };
        if !existed {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::NotFound(format!("deployment {}", record.id)));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get(&self, id: &str) -> StateResult<Option<DeploymentRecord>> {
        validate_key(id)?;
        self.get_json(DEPLOYMENTS, id)
    }

    fn list_all(&self) -> StateResult<Vec<DeploymentRecord>> {
        self.list_json(DEPLOYMENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn test_environment(id: &str) -> Environment {
        let mut env = Environment::new("proj-1", "web", EnvironmentType::Staging);
        env.id = id.to_string();
        env.revision = 1;
        env
    }

    fn test_record(id: &str, env: &str, minutes_ago: i64) -> DeploymentRecord {
        DeploymentRecord {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            environment: env.to_string(),
            version: format!("v-{id}"),
            image: format!("app:{id}"),
            strategy: StrategyKind::Rolling,
            status: DeploymentStatus::Success,
            deployed_by: "ci".to_string(),
            deployed_at: Utc::now() - Duration::minutes(minutes_ago),
            rollback_from: None,
            config: Default::default(),
            duration_ms: 1200,
            rollback_reason: None,
        }
    }

    // ── Environments ───────────────────────────────────────────────

    #[test]
    fn environment_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let env = test_environment("env-1");

        store.put_environment_if(&env, 0).unwrap();
        let retrieved = store.get_environment("env-1").unwrap();

        assert_eq!(retrieved, Some(env));
    }

    #[test]
    fn environment_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_environment("nope").unwrap().is_none());
    }

    #[test]
    fn environment_stale_revision_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let mut env = test_environment("env-1");
        store.put_environment_if(&env, 0).unwrap();

        // First writer wins.
        env.revision = 2;
        env.locked = true;
        store.put_environment_if(&env, 1).unwrap();

        // Second writer read revision 1 as well and must lose.
        let mut stale = test_environment("env-1");
        stale.revision = 2;
        let err = store.put_environment_if(&stale, 1).unwrap_err();
        assert!(matches!(err, StateError::Conflict { expected: 1, found: 2, .. }));

        let stored = store.get_environment("env-1").unwrap().unwrap();
        assert!(stored.locked);
    }

    #[test]
    fn environment_create_twice_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_environment_if(&test_environment("env-1"), 0).unwrap();
        assert!(store.put_environment_if(&test_environment("env-1"), 0).is_err());
    }

    #[test]
    fn environment_delete_checks_revision() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_environment_if(&test_environment("env-1"), 0).unwrap();

        assert!(store.delete_environment_if("env-1", 7).is_err());
        assert!(store.delete_environment_if("env-1", 1).unwrap());
        assert!(!store.delete_environment_if("env-1", 0).unwrap());
        assert!(store.list_environments().unwrap().is_empty());
    }

    #[test]
    fn environment_rejects_path_like_ids() {
        let store = StateStore::open_in_memory().unwrap();
        let env = test_environment("../etc");
        assert!(matches!(
            store.put_environment_if(&env, 0),
            Err(StateError::InvalidKey(_))
        ));
    }

    // ── Deployment history ─────────────────────────────────────────

    #[test]
    fn history_lists_newest_first_per_pair() {
        let store = StateStore::open_in_memory().unwrap();
        store.append(&test_record("a", "production", 30)).unwrap();
        store.append(&test_record("b", "production", 10)).unwrap();
        store.append(&test_record("c", "staging", 5)).unwrap();
        store.append(&test_record("d", "production", 20)).unwrap();

        let ids: Vec<_> = store
            .list_for("proj-1", "production")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["b", "d", "a"]);
        assert_eq!(store.list_for_project("proj-1").unwrap().len(), 4);
    }

    #[test]
    fn history_update_requires_existing_record() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = test_record("a", "production", 1);
        assert!(matches!(store.update(&record), Err(StateError::NotFound(_))));

        store.append(&record).unwrap();
        record.status = DeploymentStatus::RolledBack;
        record.rollback_reason = Some("error rate".to_string());
        store.update(&record).unwrap();

        let stored = store.get("a").unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::RolledBack);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_environment_if(&test_environment("env-1"), 0).unwrap();
            store.append(&test_record("a", "production", 1)).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_environment("env-1").unwrap().is_some());
        assert_eq!(store.get("a").unwrap().unwrap().version, "v-a");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_environments().unwrap().is_empty());
        assert!(store.list_all().unwrap().is_empty());
        assert!(store.list_for("p", "e").unwrap().is_empty());
        assert!(!store.delete_environment_if("nope", 0).unwrap());
    }
}
