mod logging;
mod metrics;

pub use logging::{LogQuery, LogRecord, MemoryLogLayer, MemoryLogSink};
pub use metrics::{MetricType, MetricsRecorder, MetricsSnapshot};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "beacon_transport" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
    /// How many warn+ records to keep in memory. Zero disables retention.
    pub retained_logs: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
            retained_logs: 512,
        }
    }
}

/// Handles to the telemetry state created at startup.
#[derive(Clone)]
pub struct TelemetryGuard {
    log_sink: Option<Arc<MemoryLogSink>>,
    metrics: Arc<MetricsRecorder>,
}

impl TelemetryGuard {
    /// Metrics shared with the rest of the process.
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    /// Retained warn+ logs, if retention is enabled.
    pub fn logs(&self) -> Option<Arc<MemoryLogSink>> {
        self.log_sink.clone()
    }
}

fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let (memory_layer, log_sink) = if config.retained_logs > 0 {
        let sink = Arc::new(MemoryLogSink::new(config.retained_logs));
        (Some(MemoryLogLayer::new(sink.clone())), Some(sink))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(memory_layer)
        .init();

    TelemetryGuard {
        log_sink,
        metrics: Arc::new(MetricsRecorder::new()),
    }
}
