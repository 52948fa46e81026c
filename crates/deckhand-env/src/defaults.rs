//! Resource allocation defaults per environment type.

use deckhand_state::{EnvironmentType, ResourceAllocation};

fn allocation(
    cpu: (&str, &str),
    memory: (&str, &str),
    replicas: (u32, u32),
    storage: &str,
    autoscale: bool,
) -> ResourceAllocation {
    ResourceAllocation {
        cpu_min: cpu.0.to_string(),
        cpu_max: cpu.1.to_string(),
        memory_min: memory.0.to_string(),
        memory_max: memory.1.to_string(),
        min_replicas: replicas.0,
        max_replicas: replicas.1,
        storage_size: storage.to_string(),
        autoscale,
    }
}

/// Default resource bounds for an environment of the given type.
pub fn default_allocation(env_type: &EnvironmentType) -> ResourceAllocation {
    match env_type {
        EnvironmentType::Production => {
            allocation(("500m", "2000m"), ("512Mi", "2Gi"), (2, 10), "10Gi", true)
        }
        EnvironmentType::Staging => {
            allocation(("250m", "1000m"), ("256Mi", "1Gi"), (1, 3), "5Gi", true)
        }
        EnvironmentType::Development | EnvironmentType::Preview => {
            allocation(("100m", "500m"), ("128Mi", "512Mi"), (1, 1), "1Gi", false)
        }
        _ => allocation(("250m", "1000m"), ("256Mi", "1Gi"), (1, 5), "5Gi", false),
    }
}
