//! FileStore: one pretty-printed JSON document per record.
//!
//! Layout:
//!
//! ```text
//! <env_root>/<environment_id>.json      (0600: contains encrypted secrets)
//! <history_root>/<deployment_id>.json   (0644)
//! ```
//!
//! Writes go to a temporary sibling file which is then renamed over the
//! target, so readers never observe a half-written document. Compare-and-swap
//! writes are serialized by a mutex shared by every clone of the store; that
//! makes them atomic within one process, not across processes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{validate_key, DeploymentHistory, EnvironmentStore};
use crate::error::{StateError, StateResult};
use crate::types::{DeploymentRecord, Environment};

const SECRET_FILE_MODE: u32 = 0o600;
const PUBLIC_FILE_MODE: u32 = 0o644;

/// File-per-record store for environments and deployment history.
#[derive(Clone)]
pub struct FileStore {
    env_root: PathBuf,
    history_root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open a store rooted at the two directories, creating them if needed.
    pub fn open(env_root: impl Into<PathBuf>, history_root: impl Into<PathBuf>) -> StateResult<Self> {
        let env_root = env_root.into();
        let history_root = history_root.into();
        for dir in [&env_root, &history_root] {
            fs::create_dir_all(dir)
                .map_err(|e| StateError::Open(format!("{}: {e}", dir.display())))?;
        }
        debug!(env_root = ?env_root, history_root = ?history_root, "file store opened");
        Ok(Self {
            env_root,
            history_root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn env_path(&self, id: &str) -> PathBuf {
        self.env_root.join(format!("{id}.json"))
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.history_root.join(format!("{id}.json"))
    }

    fn lock(&self) -> StateResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StateError::Transaction("file store write lock poisoned".to_string()))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StateResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::Read(format!("{}: {e}", path.display()))),
    };
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| StateError::Deserialize(format!("{}: {e}", path.display())))?;
    Ok(Some(value))
}

fn list_json<T: DeserializeOwned>(dir: &Path) -> StateResult<Vec<T>> {
    let entries =
        fs::read_dir(dir).map_err(|e| StateError::Read(format!("{}: {e}", dir.display())))?;
    let mut results = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StateError::Read(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path)? {
            Some(value) => results.push(value),
            // Removed between read_dir and read.
            None => warn!(path = ?path, "record vanished during listing"),
        }
    }
    Ok(results)
}

fn write_json<T: Serialize>(path: &Path, value: &T, mode: u32) -> StateResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StateError::Serialize(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    let write_err = |e: std::io::Error| StateError::Write(format!("{}: {e}", path.display()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(&tmp).map_err(write_err)?;
    file.write_all(&bytes).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);
    fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}

impl EnvironmentStore for FileStore {
    fn get_environment(&self, id: &str) -> StateResult<Option<Environment>> {
        validate_key(id)?;
        read_json(&self.env_path(id))
    }

    fn list_environments(&self) -> StateResult<Vec<Environment>> {
        list_json(&self.env_root)
    }

    fn put_environment_if(&self, env: &Environment, expected_revision: u64) -> StateResult<()> {
        validate_key(&env.id)?;
        let path = self.env_path(&env.id);
        let _guard = self.lock()?;

        let found = read_json::<Environment>(&path)?.map_or(0, |stored| stored.revision);
        if found != expected_revision {
            return Err(StateError::Conflict {
                key: env.id.clone(),
                expected: expected_revision,
                found,
            });
        }
        write_json(&path, env, SECRET_FILE_MODE)?;
        debug!(id = %env.id, revision = env.revision, "environment stored");
        Ok(())
    }

    fn delete_environment_if(&self, id: &str, expected_revision: u64) -> StateResult<bool> {
        validate_key(id)?;
        let path = self.env_path(id);
        let _guard = self.lock()?;

        let stored = read_json::<Environment>(&path)?;
        let found = stored.as_ref().map_or(0, |env| env.revision);
        if found != expected_revision {
            return Err(StateError::Conflict {
                key: id.to_string(),
                expected: expected_revision,
                found,
            });
        }
        if stored.is_none() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| StateError::Write(format!("{}: {e}", path.display())))?;
        debug!(%id, "environment deleted");
        Ok(true)
    }
}

impl DeploymentHistory for FileStore {
    fn append(&self, record: &DeploymentRecord) -> StateResult<()> {
        validate_key(&record.id)?;
        write_json(&self.record_path(&record.id), record, PUBLIC_FILE_MODE)?;
        debug!(id = %record.id, "deployment record stored");
        Ok(())
    }

    fn update(&self, record: &DeploymentRecord) -> StateResult<()> {
        validate_key(&record.id)?;
        let path = self.record_path(&record.id);
        let _guard = self.lock()?;
        if !path.exists() {
            return Err(StateError::NotFound(format!("deployment {}", record.id)));
        }
        write_json(&path, record, PUBLIC_FILE_MODE)
    }

    fn get(&self, id: &str) -> StateResult<Option<DeploymentRecord>> {
        validate_key(id)?;
        read_json(&self.record_path(id))
    }

    fn list_all(&self) -> StateResult<Vec<DeploymentRecord>> {
        list_json(&self.history_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::Utc;

    fn test_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("envs"), dir.path().join("history")).unwrap();
        (dir, store)
    }

    fn test_environment(id: &str) -> Environment {
        let mut env = Environment::new("proj-1", "web", EnvironmentType::Production);
        env.id = id.to_string();
        env.revision = 1;
        env.secrets.insert("API_KEY".to_string(), "b64-ciphertext".to_string());
        env
    }

    fn test_record(id: &str) -> DeploymentRecord {
        DeploymentRecord {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            environment: "production".to_string(),
            version: "v1".to_string(),
            image: "app:v1".to_string(),
            strategy: StrategyKind::Canary,
            status: DeploymentStatus::Success,
            deployed_by: "ci".to_string(),
            deployed_at: Utc::now(),
            rollback_from: None,
            config: Default::default(),
            duration_ms: 10,
            rollback_reason: None,
        }
    }

    #[test]
    fn environment_written_as_pretty_json_file() {
        let (dir, store) = test_store();
        store.put_environment_if(&test_environment("env-1"), 0).unwrap();

        let path = dir.path().join("envs").join("env-1.json");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"id\": \"env-1\""));
        assert!(!dir.path().join("envs").join("env-1.json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn environment_roundtrip_and_conflict() {
        let (_dir, store) = test_store();
        let mut env = test_environment("env-1");
        store.put_environment_if(&env, 0).unwrap();
        assert_eq!(store.get_environment("env-1").unwrap(), Some(env.clone()));

        env.revision = 2;
        store.put_environment_if(&env, 1).unwrap();
        assert!(matches!(
            store.put_environment_if(&env, 1),
            Err(StateError::Conflict { found: 2, .. })
        ));
    }

    #[test]
    fn concurrent_cas_has_single_winner() {
        let (_dir, store) = test_store();
        store.put_environment_if(&test_environment("env-1"), 0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut env = test_environment("env-1");
                    env.revision = 2;
                    env.locked = true;
                    env.locked_by = Some(format!("user-{i}"));
                    store.put_environment_if(&env, 1).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn history_append_get_update_list() {
        let (dir, store) = test_store();
        let mut record = test_record("dep-1");
        store.append(&record).unwrap();
        store.append(&test_record("dep-2")).unwrap();
        fs::write(dir.path().join("history").join("notes.txt"), "ignored").unwrap();

        record.status = DeploymentStatus::RolledBack;
        store.update(&record).unwrap();

        assert_eq!(store.get("dep-1").unwrap().unwrap().status, DeploymentStatus::RolledBack);
        assert_eq!(store.list_all().unwrap().len(), 2);
        assert!(matches!(
            store.update(&test_record("dep-9")),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn missing_files_read_as_none() {
        let (_dir, store) = test_store();
        assert!(store.get_environment("env-1").unwrap().is_none());
        assert!(store.get("dep-1").unwrap().is_none());
        assert!(!store.delete_environment_if("env-1", 0).unwrap());
    }
}
