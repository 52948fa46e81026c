//! deckhand-probe: HTTP implementations of the executor's observation seams.
//!
//! Both capabilities speak plain HTTP/1.1 over a fresh TCP connection per
//! request, driven by hyper's low-level client connection.
//!
//! ```text
//! HttpHealthChecker  ── GET <health url>            → 2xx = healthy
//! HttpMetricsMonitor ── GET <template with version> → JSON DeploymentMetrics
//! ```

pub mod checker;
pub mod client;
pub mod error;
pub mod monitor;

#[cfg(test)]
mod test_server;

pub use checker::{HttpHealthChecker, ProbeResult};
pub use client::{Endpoint, http_get};
pub use error::ProbeError;
pub use monitor::HttpMetricsMonitor;
