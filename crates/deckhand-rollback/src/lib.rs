//! deckhand-rollback: deployment history and rollback for the orchestrator.
//!
//! # Architecture
//!
//! ```text
//! MonitorSupervisor
//!   └── per-deployment task
//!       └── RollbackManager::monitor_and_auto_rollback
//!           ├── DeploymentMonitor::get_metrics  (every poll interval)
//!           ├── RollbackTrigger::evaluate       → breach reason
//!           └── rollback_to_last_successful     → DeploymentExecutor (direct)
//! ```
//!
//! Rollbacks for one project/environment pair are serialized, so a manual
//! rollback and an automatic one never interleave.

pub mod error;
pub mod manager;
pub mod supervisor;
pub mod trends;
pub mod trigger;

pub use error::{RollbackError, RollbackResult};
pub use manager::{MonitorOutcome, RollbackManager};
pub use supervisor::MonitorSupervisor;
pub use trends::RollbackTrends;
pub use trigger::RollbackTrigger;
