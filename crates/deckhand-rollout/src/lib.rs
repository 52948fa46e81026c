//! Deckhand deployment executor: how a new version reaches an environment.
//!
//! This crate runs one of six strategies against a target and records an
//! ordered step log for every discrete action. The infrastructure itself is
//! reached only through four capability traits, injected at construction.
//!
//! # Components
//!
//! - **`capability`**: `ContainerRunner`, `HealthChecker`, `LoadBalancer`, `DeploymentMonitor`
//! - **`strategy`**: `DeploymentConfig` and the closed `Strategy` enum with its sub-configs
//! - **`result`**: `DeploymentResult` / `DeploymentStep` audit trail
//! - **`executor`**: the strategy implementations
//! - **`traffic`**: in-memory weighted traffic table usable as a `LoadBalancer`

pub mod capability;
pub mod error;
pub mod executor;
pub mod result;
pub mod strategy;
pub mod traffic;

pub use capability::{
    BoxFuture, ContainerRunner, DeploymentMonitor, DeploymentMetrics, HealthChecker, LoadBalancer,
    WorkloadSpec, breaches,
};
pub use error::ExecuteError;
pub use executor::{DeploymentExecutor, ExecutorTimings};
pub use result::{DeploymentResult, DeploymentStep, StepStatus};
pub use strategy::{CanaryConfig, DeploymentConfig, ProgressiveConfig, RolloutConfig, Strategy};
pub use traffic::TrafficTable;
