use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const METRIC_CONNECTIONS_TOTAL: &str = "turnos_hub_connections_total";
pub const METRIC_CONNECTIONS_ACTIVE: &str = "turnos_hub_connections_active";
pub const METRIC_STATES_TOTAL: &str = "turnos_hub_states_total";
pub const METRIC_MESSAGES_FORWARDED_TOTAL: &str = "turnos_hub_messages_forwarded_total";
pub const METRIC_IDLE_PRUNED_TOTAL: &str = "turnos_hub_idle_pruned_total";
pub const METRIC_REJECTED_TOTAL: &str = "turnos_hub_rejected_total";

pub struct Telemetry {
    metrics_handle: PrometheusHandle,
}

impl Telemetry {
    /// Installs the tracing subscriber (`RUST_LOG`, default `info`) and the
    /// Prometheus recorder. Call once per process.
    pub fn init() -> Result<Self> {
        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        Ok(Self { metrics_handle })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}
