//! In-memory weighted traffic table.
//!
//! Tracks which share of traffic each version receives. Setting one
//! version's weight rescales every other version proportionally so the
//! table always sums to 100 once it holds any traffic.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::capability::{BoxFuture, LoadBalancer};

#[derive(Debug, Default)]
pub struct TrafficTable {
    weights: RwLock<BTreeMap<String, u32>>,
}

impl TrafficTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table where `version` already receives all traffic.
    pub fn serving(version: &str) -> Self {
        let table = Self::new();
        table.set(version, 100);
        table
    }

    /// Route `percent` of traffic to `version`, rescaling the rest.
    pub fn set(&self, version: &str, percent: u32) {
        let percent = percent.min(100);
        let mut weights = self.weights.write().unwrap_or_else(|e| e.into_inner());
        weights.remove(version);

        let others: u32 = weights.values().sum();
        if others > 0 {
            let remaining = 100 - percent;
            let mut assigned = 0;
            for weight in weights.values_mut() {
                let scaled = (u64::from(*weight) * u64::from(remaining) / u64::from(others)) as u32;
                *weight = scaled;
                assigned += scaled;
            }
            // Integer rounding leftovers go to the heaviest remaining version.
            if let Some(heaviest) = weights.values_mut().max() {
                *heaviest += remaining - assigned;
            }
        }

        if percent > 0 {
            weights.insert(version.to_string(), percent);
        }
        weights.retain(|_, w| *w > 0);
        debug!(version, percent, distribution = ?*weights, "traffic weight set");
    }

    /// Move all of `from`'s traffic, and everything else, to `to`.
    pub fn switch(&self, from: &str, to: &str) {
        let mut weights = self.weights.write().unwrap_or_else(|e| e.into_inner());
        weights.clear();
        weights.insert(to.to_string(), 100);
        debug!(from, to, "traffic switched");
    }

    pub fn distribution(&self) -> BTreeMap<String, u32> {
        self.weights.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The version receiving the most traffic, skipping `exclude`.
    pub fn dominant(&self, exclude: &str) -> Option<String> {
        dominant_version(&self.distribution(), exclude)
    }
}

/// The version with the highest weight in `distribution`, skipping `exclude`.
/// Ties resolve to the lexicographically first version.
pub fn dominant_version(distribution: &BTreeMap<String, u32>, exclude: &str) -> Option<String> {
    distribution
        .iter()
        .filter(|(version, weight)| version.as_str() != exclude && **weight > 0)
        .fold(None::<(&String, u32)>, |best, (version, weight)| match best {
            Some((_, w)) if w >= *weight => best,
            _ => Some((version, *weight)),
        })
        .map(|(version, _)| version.clone())
}

impl LoadBalancer for TrafficTable {
    fn set_traffic_weight<'a>(
        &'a self,
        version: &'a str,
        percent: u32,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.set(version, percent);
            Ok(())
        })
    }

    fn switch_traffic<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.switch(from, to);
            Ok(())
        })
    }

    fn get_traffic_distribution(&self) -> BoxFuture<'_, anyhow::Result<BTreeMap<String, u32>>> {
        Box::pin(async move { Ok(self.distribution()) })
    }
}
