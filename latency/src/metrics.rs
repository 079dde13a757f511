use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [`Engine`](super::Engine)
#[derive(Clone, Default)]
pub struct Metrics {
    /// Number of probes sent
    pub probes_sent: Counter,
    /// Number of acknowledgements sent
    pub acks_sent: Counter,
    /// Number of acknowledgements received for our probes
    pub acks_received: Counter,
    /// Number of protocol violations observed
    pub anomalies: Counter,
    /// Number of completed rounds
    pub rounds: Counter,
    /// Logical time last granted to us
    pub logical_time: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Metrics::default();
        context.register(
            "probes_sent",
            "Number of probes sent",
            metrics.probes_sent.clone(),
        );
        context.register(
            "acks_sent",
            "Number of acknowledgements sent",
            metrics.acks_sent.clone(),
        );
        context.register(
            "acks_received",
            "Number of acknowledgements received for our probes",
            metrics.acks_received.clone(),
        );
        context.register(
            "anomalies",
            "Number of protocol violations observed",
            metrics.anomalies.clone(),
        );
        context.register(
            "rounds",
            "Number of completed rounds",
            metrics.rounds.clone(),
        );
        context.register(
            "logical_time",
            "Logical time last granted to us",
            metrics.logical_time.clone(),
        );
        metrics
    }
}
