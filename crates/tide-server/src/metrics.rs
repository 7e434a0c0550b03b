//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// Open update streams (gauge).
pub const STREAMS_ACTIVE: &str = "tide_streams_active";
/// Update streams opened (counter).
pub const STREAMS_OPENED_TOTAL: &str = "tide_streams_opened_total";
/// Payloads pushed to clients (counter, labels: kind).
pub const STREAM_PUSHES_TOTAL: &str = "tide_stream_pushes_total";
/// Failed pushes (counter).
pub const STREAM_PUSH_FAILURES_TOTAL: &str = "tide_stream_push_failures_total";
/// Events accepted by the relay (counter).
pub const RELAY_PUBLISHED_TOTAL: &str = "tide_relay_published_total";
/// Events dropped for a slow or departed subscriber (counter).
pub const RELAY_DROPS_TOTAL: &str = "tide_relay_drops_total";
/// Mutations applied (counter, labels: kind).
pub const MUTATIONS_TOTAL: &str = "tide_mutations_total";
/// Mutations that failed (counter, labels: kind, error).
pub const MUTATION_ERRORS_TOTAL: &str = "tide_mutation_errors_total";
/// Mutation latency (histogram, labels: kind).
pub const MUTATION_DURATION_SECONDS: &str = "tide_mutation_duration_seconds";
/// Idle sessions purged (counter).
pub const SESSIONS_EVICTED_TOTAL: &str = "tide_sessions_evicted_total";
