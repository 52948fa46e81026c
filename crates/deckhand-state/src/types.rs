//! Domain types for the Deckhand state backends.
//!
//! These types are shared by every crate in the workspace. All of them
//! serialize to snake_case JSON, which is also the on-disk format of the
//! file backend.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an environment.
pub type EnvironmentId = String;

/// Unique identifier for a deployment record.
pub type DeploymentId = String;

// ── Environment ───────────────────────────────────────────────────

/// The kind of environment. Unrecognized labels are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvironmentType {
    Production,
    Staging,
    Development,
    Preview,
    Testing,
    Demo,
    Custom(String),
}

impl EnvironmentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
            Self::Preview => "preview",
            Self::Testing => "testing",
            Self::Demo => "demo",
            Self::Custom(label) => label,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl From<String> for EnvironmentType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "production" => Self::Production,
            "staging" => Self::Staging,
            "development" => Self::Development,
            "preview" => Self::Preview,
            "testing" => Self::Testing,
            "demo" => Self::Demo,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for EnvironmentType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<EnvironmentType> for String {
    fn from(t: EnvironmentType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU, memory, replica and storage bounds for an environment.
///
/// CPU is expressed in Kubernetes millicores (`"500m"`), memory and storage
/// in binary units (`"512Mi"`, `"10Gi"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub cpu_min: String,
    pub cpu_max: String,
    pub memory_min: String,
    pub memory_max: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub storage_size: String,
    pub autoscale: bool,
}

/// A deployable target owned by a project.
///
/// Values in `secrets` are ciphertext whenever the environment is at rest.
/// The environment manager hands out copies with plaintext values; those
/// copies are never written back in that form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub project_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub resources: Option<ResourceAllocation>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    /// user id → role.
    #[serde(default)]
    pub access: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every successful write; zero means "never stored".
    #[serde(default)]
    pub revision: u64,
}

impl Environment {
    /// A fresh, unsaved environment with no id and empty maps.
    pub fn new(project_id: &str, name: &str, env_type: EnvironmentType) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            env_type,
            variables: BTreeMap::new(),
            secrets: BTreeMap::new(),
            domains: Vec::new(),
            resources: None,
            locked: false,
            locked_by: None,
            locked_at: None,
            access: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Holder of the lock, or `"unknown"` for a lock without a recorded holder.
    pub fn lock_holder(&self) -> &str {
        self.locked_by.as_deref().unwrap_or("unknown")
    }
}

// ── Deployments ───────────────────────────────────────────────────

/// Final status of a deployment or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    Failed,
    RolledBack,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        })
    }
}

/// Tag naming the strategy a deployment used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    Rolling,
    BlueGreen,
    Canary,
    Recreate,
    Progressive,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        Self::Direct,
        Self::Rolling,
        Self::BlueGreen,
        Self::Canary,
        Self::Recreate,
        Self::Progressive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Rolling => "rolling",
            Self::BlueGreen => "blue_green",
            Self::Canary => "canary",
            Self::Recreate => "recreate",
            Self::Progressive => "progressive",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a strategy tag does not name one of the six strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStrategy(pub String);

impl fmt::Display for UnknownStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown deployment strategy: {:?}", self.0)
    }
}

impl std::error::Error for UnknownStrategy {}

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" => Ok(Self::Direct),
            "rolling" => Ok(Self::Rolling),
            "blue_green" | "bluegreen" => Ok(Self::BlueGreen),
            "canary" => Ok(Self::Canary),
            "recreate" => Ok(Self::Recreate),
            "progressive" => Ok(Self::Progressive),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Durable audit entry for one deployment or rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub project_id: String,
    pub environment: String,
    pub version: String,
    pub image: String,
    pub strategy: StrategyKind,
    pub status: DeploymentStatus,
    pub deployed_by: String,
    pub deployed_at: DateTime<Utc>,
    /// Id of the deployment this one superseded. Set only on rollbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from: Option<DeploymentId>,
    /// Snapshot of the deployment config that produced this record.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
}

impl DeploymentRecord {
    /// Whether this record was produced by a rollback.
    pub fn is_rollback(&self) -> bool {
        self.rollback_from.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Whether this record counts towards rollback statistics.
    pub fn counts_as_rollback(&self) -> bool {
        self.status == DeploymentStatus::RolledBack || self.is_rollback()
    }

    /// Whether this record belongs to the given project/environment pair.
    pub fn belongs_to(&self, project_id: &str, environment: &str) -> bool {
        self.project_id == project_id && self.environment == environment
    }
}

/// Sort records newest first. Ties keep their relative order.
pub fn sort_newest_first(records: &mut [DeploymentRecord]) {
    records.sort_by(|a, b| b.deployed_at.cmp(&a.deployed_at));
}
