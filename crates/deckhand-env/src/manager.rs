//! Environment manager: lifecycle, secrets, locking, clone and promote.
//!
//! Every write goes through the store's compare-and-swap, keyed on the
//! revision read at the start of the operation. A writer that lost the race
//! gets [`EnvError::ConcurrentModification`] (or, for lockers,
//! [`EnvError::AlreadyLocked`] naming the winner).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use deckhand_state::{Environment, EnvironmentStore, EnvironmentType, ResourceAllocation, StateError};

use crate::cipher::SecretCipher;
use crate::defaults::default_allocation;
use crate::error::{EnvError, EnvResult};

/// Variables that identify the environment itself and are never overwritten
/// by promotion.
pub const PROTECTED_VARIABLES: [&str; 3] = ["DATABASE_URL", "REDIS_URL", "API_URL"];

/// Owns environment entities on top of an [`EnvironmentStore`].
pub struct EnvironmentManager {
    store: Arc<dyn EnvironmentStore>,
    cipher: SecretCipher,
}

impl EnvironmentManager {
    pub fn new(store: Arc<dyn EnvironmentStore>, cipher: SecretCipher) -> Self {
        Self { store, cipher }
    }

    /// Create an environment.
    ///
    /// Assigns an id when none is set and fills the resource allocation from
    /// the type defaults when it is unset. `env.secrets` holds plaintext on
    /// input; it is encrypted before anything is written. The returned copy
    /// carries the plaintext secrets again.
    pub fn create_environment(&self, mut env: Environment) -> EnvResult<Environment> {
        if env.id.is_empty() {
            env.id = Uuid::new_v4().to_string();
        }
        if env.name.trim().is_empty() {
            return Err(EnvError::Invalid("name must not be empty".to_string()));
        }
        let resources = env
            .resources
            .get_or_insert_with(|| default_allocation(&env.env_type));
        validate_allocation(resources)?;

        let plaintext = std::mem::take(&mut env.secrets);
        env.secrets = self.seal(&plaintext)?;
        env.created_at = Utc::now();

        let mut stored = match self.commit(env, 0) {
            Err(EnvError::ConcurrentModification(id)) => {
                return Err(EnvError::Invalid(format!("environment {id} already exists")));
            }
            other => other?,
        };
        info!(
            id = %stored.id,
            project = %stored.project_id,
            env_type = %stored.env_type,
            "environment created"
        );
        stored.secrets = plaintext;
        Ok(stored)
    }

    /// Load an environment with its secrets decrypted in memory.
    pub fn get_environment(&self, id: &str) -> EnvResult<Environment> {
        let env = self.load(id)?;
        self.open(env)
    }

    /// All environments of a project, sorted by name, secrets decrypted.
    pub fn list_environments(&self, project_id: &str) -> EnvResult<Vec<Environment>> {
        let mut envs: Vec<_> = self
            .store
            .list_environments()?
            .into_iter()
            .filter(|env| env.project_id == project_id)
            .collect();
        envs.sort_by(|a, b| a.name.cmp(&b.name));
        envs.into_iter().map(|env| self.open(env)).collect()
    }

    /// Find an environment of a project by name.
    pub fn find_environment(&self, project_id: &str, name: &str) -> EnvResult<Option<Environment>> {
        let found = self
            .store
            .list_environments()?
            .into_iter()
            .find(|env| env.project_id == project_id && env.name == name);
        found.map(|env| self.open(env)).transpose()
    }

    /// Replace an environment's mutable fields.
    ///
    /// Refused while the environment is locked, whoever holds the lock.
    /// Identity, creation time and lock state are kept from the stored copy.
    pub fn update_environment(&self, env: Environment) -> EnvResult<Environment> {
        let existing = self.load(&env.id)?;
        ensure_unlocked(&existing)?;
        if env.name.trim().is_empty() {
            return Err(EnvError::Invalid("name must not be empty".to_string()));
        }

        let mut next = env;
        if next.resources.is_none() {
            next.resources = existing.resources.clone();
        }
        if let Some(resources) = &next.resources {
            validate_allocation(resources)?;
        }
        let plaintext = std::mem::take(&mut next.secrets);
        next.secrets = self.seal(&plaintext)?;
        next.project_id = existing.project_id.clone();
        next.created_at = existing.created_at;
        next.locked = existing.locked;
        next.locked_by = existing.locked_by.clone();
        next.locked_at = existing.locked_at;

        let mut stored = self.commit(next, existing.revision)?;
        debug!(id = %stored.id, revision = stored.revision, "environment updated");
        stored.secrets = plaintext;
        Ok(stored)
    }

    /// Delete an environment. Refused while it is locked.
    pub fn delete_environment(&self, id: &str) -> EnvResult<()> {
        let existing = self.load(id)?;
        ensure_unlocked(&existing)?;
        match self.store.delete_environment_if(id, existing.revision) {
            Ok(_) => {
                info!(%id, "environment deleted");
                Ok(())
            }
            Err(StateError::Conflict { .. }) => Err(EnvError::ConcurrentModification(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Encrypt and store one secret.
    pub fn set_secret(&self, id: &str, name: &str, value: &str) -> EnvResult<()> {
        if name.trim().is_empty() {
            return Err(EnvError::Invalid("secret name must not be empty".to_string()));
        }
        let mut env = self.load(id)?;
        ensure_unlocked(&env)?;
        let expected = env.revision;
        env.secrets.insert(name.to_string(), self.cipher.encrypt(value)?);
        self.commit(env, expected)?;
        debug!(%id, secret = %name, "secret stored");
        Ok(())
    }

    /// Remove one secret. Returns false if it did not exist.
    pub fn delete_secret(&self, id: &str, name: &str) -> EnvResult<bool> {
        let mut env = self.load(id)?;
        ensure_unlocked(&env)?;
        let expected = env.revision;
        if env.secrets.remove(name).is_none() {
            return Ok(false);
        }
        self.commit(env, expected)?;
        debug!(%id, secret = %name, "secret removed");
        Ok(true)
    }

    /// Take the advisory lock on an environment.
    pub fn lock_environment(&self, id: &str, user_id: &str) -> EnvResult<()> {
        let mut env = self.load(id)?;
        if env.locked {
            return Err(EnvError::AlreadyLocked {
                id: id.to_string(),
                holder: env.lock_holder().to_string(),
            });
        }
        let expected = env.revision;
        env.locked = true;
        env.locked_by = Some(user_id.to_string());
        env.locked_at = Some(Utc::now());

        match self.commit(env, expected) {
            Ok(_) => {
                info!(%id, user = %user_id, "environment locked");
                Ok(())
            }
            Err(EnvError::ConcurrentModification(_)) => {
                // Someone wrote in between; report the winner if it was a lock.
                let current = self.load(id)?;
                if current.locked {
                    warn!(%id, user = %user_id, holder = %current.lock_holder(), "lost lock race");
                    Err(EnvError::AlreadyLocked {
                        id: id.to_string(),
                        holder: current.lock_holder().to_string(),
                    })
                } else {
                    Err(EnvError::ConcurrentModification(id.to_string()))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Release the lock. Only the recorded holder may unlock.
    pub fn unlock_environment(&self, id: &str, user_id: &str) -> EnvResult<()> {
        let mut env = self.load(id)?;
        if !env.locked {
            return Err(EnvError::NotLocked(id.to_string()));
        }
        if env.locked_by.as_deref() != Some(user_id) {
            return Err(EnvError::LockHeldByOther {
                id: id.to_string(),
                holder: env.lock_holder().to_string(),
            });
        }
        let expected = env.revision;
        env.locked = false;
        env.locked_by = None;
        env.locked_at = None;
        self.commit(env, expected)?;
        info!(%id, user = %user_id, "environment unlocked");
        Ok(())
    }

    /// Create a new environment from an existing one.
    ///
    /// Variables are always copied. Secrets are copied only when the target
    /// is production or the source is not, so production secrets never leak
    /// into a lower environment. Non-production targets are capped at 1–2
    /// replicas.
    pub fn clone_environment(
        &self,
        source_id: &str,
        target_name: &str,
        target_type: EnvironmentType,
    ) -> EnvResult<Environment> {
        let source = self.load(source_id)?;
        let copy_secrets = target_type.is_production() || !source.env_type.is_production();

        let mut resources = source
            .resources
            .clone()
            .unwrap_or_else(|| default_allocation(&target_type));
        if !target_type.is_production() {
            resources.min_replicas = 1;
            resources.max_replicas = 2;
        }

        let mut clone = Environment::new(&source.project_id, target_name, target_type);
        clone.id = Uuid::new_v4().to_string();
        clone.variables = source.variables.clone();
        if copy_secrets {
            // Ciphertext is valid under the same key; no need to re-encrypt.
            clone.secrets = source.secrets.clone();
        }
        clone.resources = Some(resources);
        clone.access = source.access.clone();
        clone.metadata = source.metadata.clone();
        clone
            .metadata
            .insert("cloned_from".to_string(), serde_json::Value::from(source.id.clone()));

        let stored = self.commit(clone, 0)?;
        info!(
            source = %source.id,
            target = %stored.id,
            secrets_copied = copy_secrets,
            "environment cloned"
        );
        self.open(stored)
    }

    /// Merge source variables into target, skipping [`PROTECTED_VARIABLES`].
    pub fn promote_environment(&self, source_id: &str, target_id: &str) -> EnvResult<Environment> {
        let source = self.load(source_id)?;
        let mut target = self.load(target_id)?;
        ensure_unlocked(&target)?;

        let expected = target.revision;
        let mut promoted = 0usize;
        for (key, value) in &source.variables {
            if PROTECTED_VARIABLES.contains(&key.as_str()) {
                continue;
            }
            target.variables.insert(key.clone(), value.clone());
            promoted += 1;
        }

        let stored = self.commit(target, expected)?;
        info!(source = %source_id, target = %target_id, promoted, "environment promoted");
        self.open(stored)
    }

    fn load(&self, id: &str) -> EnvResult<Environment> {
        self.store
            .get_environment(id)?
            .ok_or_else(|| EnvError::NotFound(id.to_string()))
    }

    /// Bump the revision and write with compare-and-swap.
    fn commit(&self, mut env: Environment, expected: u64) -> EnvResult<Environment> {
        env.revision = expected + 1;
        env.updated_at = Utc::now();
        match self.store.put_environment_if(&env, expected) {
            Ok(()) => Ok(env),
            Err(StateError::Conflict { .. }) => Err(EnvError::ConcurrentModification(env.id)),
            Err(e) => Err(e.into()),
        }
    }

    fn seal(&self, secrets: &BTreeMap<String, String>) -> EnvResult<BTreeMap<String, String>> {
        secrets
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.cipher.encrypt(value)?)))
            .collect()
    }

    fn open(&self, mut env: Environment) -> EnvResult<Environment> {
        for value in env.secrets.values_mut() {
            *value = self.cipher.decrypt(value)?;
        }
        Ok(env)
    }
}

fn ensure_unlocked(env: &Environment) -> EnvResult<()> {
    if env.locked {
        return Err(EnvError::Locked {
            id: env.id.clone(),
            holder: env.lock_holder().to_string(),
        });
    }
    Ok(())
}

fn validate_allocation(resources: &ResourceAllocation) -> EnvResult<()> {
    if resources.min_replicas > resources.max_replicas {
        return Err(EnvError::Invalid(format!(
            "min_replicas ({}) exceeds max_replicas ({})",
            resources.min_replicas, resources.max_replicas
        )));
    }
    Ok(())
}
