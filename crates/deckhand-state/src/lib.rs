//! deckhand-state: persisted state for the deployment orchestrator.
//!
//! Holds the two durable entities of the system: [`Environment`] (variables,
//! encrypted secrets, resource allocation, lock state) and
//! [`DeploymentRecord`] (one audit entry per deployment or rollback).
//!
//! # Backends
//!
//! Both backends implement [`EnvironmentStore`] and [`DeploymentHistory`]:
//!
//! - [`FileStore`]: one pretty-printed JSON file per record:
//!   `<env_root>/<environment_id>.json` (owner-only permissions, the file
//!   holds encrypted secrets) and `<history_root>/<deployment_id>.json`.
//! - [`StateStore`]: a single [redb](https://docs.rs/redb) database with the
//!   same JSON documents stored in two tables. Supports in-memory mode for
//!   tests.
//!
//! # Optimistic concurrency
//!
//! Every environment carries a `revision`. Writers go through
//! [`EnvironmentStore::put_environment_if`], which only succeeds when the
//! stored revision still matches the one the writer read. Two concurrent
//! lockers cannot both observe "unlocked" and both win.

pub mod backend;
pub mod error;
pub mod file;
pub mod store;
pub mod tables;
pub mod types;

pub use backend::{DeploymentHistory, EnvironmentStore};
pub use error::{StateError, StateResult};
pub use file::FileStore;
pub use store::StateStore;
pub use types::*;
