//! Prometheus metrics for the reservation engine.
//!
//! Metric names:
//! - `studyhall_allocations_total{outcome}`
//! - `studyhall_allocation_conflicts_total{kind}`
//! - `studyhall_identifiers_issued_total`
//! - `studyhall_sweeper_transitions_total{transition}`
//! - `studyhall_sweeper_errors_total{step}`
//! - `studyhall_sweeper_pass_duration_seconds`
//!
//! Without an installed recorder the macros are no-ops, so library code and
//! tests emit metrics unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use studyhall_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Successful and refused allocations
pub const ALLOCATIONS_TOTAL: &str = "studyhall_allocations_total";
/// Allocation conflicts by kind
pub const ALLOCATION_CONFLICTS_TOTAL: &str = "studyhall_allocation_conflicts_total";
/// Membership identifiers newly issued
pub const IDENTIFIERS_ISSUED_TOTAL: &str = "studyhall_identifiers_issued_total";
/// Status changes written by the sweeper
pub const SWEEPER_TRANSITIONS_TOTAL: &str = "studyhall_sweeper_transitions_total";
/// Sweeper failures by step
pub const SWEEPER_ERRORS_TOTAL: &str = "studyhall_sweeper_errors_total";
/// Wall time of one sweeper pass
pub const SWEEPER_PASS_DURATION_SECONDS: &str = "studyhall_sweeper_pass_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Address the exporter listens on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether [`Self::start`] installed the exporter
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Register metric descriptions, install the recorder and start the
    /// HTTP listener. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// An already installed recorder is logged and tolerated.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install() {
            Ok(()) => {
                register_metrics();
                self.started = true;
                tracing::info!(addr = %self.addr, "Metrics exporter listening");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        ALLOCATIONS_TOTAL,
        "Allocation requests by outcome (allocated, conflict, rejected)"
    );
    describe_counter!(
        ALLOCATION_CONFLICTS_TOTAL,
        "Allocation conflicts by kind"
    );
    describe_counter!(
        IDENTIFIERS_ISSUED_TOTAL,
        "Membership identifiers newly issued"
    );
    describe_counter!(
        SWEEPER_TRANSITIONS_TOTAL,
        "Status changes written by the lifecycle sweeper"
    );
    describe_counter!(
        SWEEPER_ERRORS_TOTAL,
        "Lifecycle sweeper failures by step"
    );
    describe_histogram!(
        SWEEPER_PASS_DURATION_SECONDS,
        "Wall time of one lifecycle sweeper pass"
    );
}
