use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not
/// acceptable for production. Instead, callers can provide an implementation
/// that forwards these events to `tracing`, `log`, metrics, or custom sinks.
pub trait TierEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: TierEvent);
}

/// Structured events emitted by the hot tier.
#[derive(Debug, Clone)]
pub enum TierEvent {
    GcThreadStarted,
    GcThreadStopping,
    GcThreadPanicked,

    /// A sample quantized into a window older than the current chunk.
    SampleOutOfOrder { key: String, ts: u32, chunk_t0: u32 },
    /// A sample aimed at the current chunk after the store acknowledged it.
    SampleAfterSave { key: String, t0: u32 },
    /// The current chunk refused a sample (e.g. timestamp did not advance).
    SampleRejected { key: String, ts: u32, error: String },

    /// A chunk was handed to the write queue.
    ChunkQueued { key: String, t0: u32 },
    /// The store acknowledged a chunk as durable.
    ChunkSaved { key: String, t0: u32 },
    /// GC found an idle writable chunk and finalized it early.
    StaleChunkPersisted { key: String, t0: u32 },

    /// GC dropped an entire series from memory.
    SeriesDropped { key: String },
    GcSweepCompleted { series: usize, dropped: usize },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl TierEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: TierEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn TierEventListener> {
    Arc::new(NoopEventListener)
}

/// Counter and gauge instrumentation for the hot tier.
///
/// ## Key properties
/// - Library-safe: recording is effectively a no-op until a recorder is
///   installed.
/// - Serverless scraping: with the `prometheus` feature, callers can render
///   Prometheus exposition text in-process.
pub mod tier_metrics {
    // --- metric names ---
    //
    // Counters are exposed as `<name>_total` by the Prometheus exporter.

    pub const CHUNKS_CREATED: &str = "firn_chunks_created";
    pub const CHUNKS_CLEARED: &str = "firn_chunks_cleared";
    pub const TOTAL_POINTS: &str = "firn_total_points";
    pub const SERIES: &str = "firn_series";

    #[inline]
    pub fn record_chunk_created() {
        ::metrics::counter!(CHUNKS_CREATED).increment(1);
    }

    /// Records a ring slot reclaim; `points` is reported as a negative delta
    /// to the resident-point gauge.
    #[inline]
    pub fn record_chunk_cleared(points: u32) {
        ::metrics::counter!(CHUNKS_CLEARED).increment(1);
        if points > 0 {
            ::metrics::gauge!(TOTAL_POINTS).decrement(f64::from(points));
        }
    }

    #[inline]
    pub fn record_point_added() {
        ::metrics::gauge!(TOTAL_POINTS).increment(1.0);
    }

    #[inline]
    pub fn set_series(count: usize) {
        ::metrics::gauge!(SERIES).set(count as f64);
    }

    #[cfg(feature = "prometheus")]
    fn describe_all() {
        use ::metrics::{describe_counter, describe_gauge, Unit};

        describe_counter!(
            CHUNKS_CREATED,
            Unit::Count,
            "Total number of chunks allocated across all series."
        );
        describe_counter!(
            CHUNKS_CLEARED,
            Unit::Count,
            "Total number of ring slots reclaimed by overwrite."
        );
        describe_gauge!(
            TOTAL_POINTS,
            Unit::Count,
            "Points currently resident in memory across all series."
        );
        describe_gauge!(
            SERIES,
            Unit::Count,
            "Series currently resident in the hot tier."
        );
    }

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call
    /// [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: metrics_exporter_prometheus::PrometheusHandle,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process).
        ///
        /// No upkeep thread is spawned: the tier registers only counters and
        /// gauges, which need no periodic maintenance.
        pub fn install() -> Result<Self, MetricsInitError> {
            use metrics_exporter_prometheus::PrometheusBuilder;

            describe_all();
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;
            Ok(Self { handle })
        }

        /// Renders the current metrics in the Prometheus text exposition
        /// format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: metrics_exporter_prometheus::BuildError) -> Self {
            use metrics_exporter_prometheus::BuildError;
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_listener_swallows_events() {
        let listener = noop_event_listener();
        listener.on_event(TierEvent::GcThreadStarted);
        listener.on_event(TierEvent::SeriesDropped {
            key: "a.series".to_string(),
        });
    }

    #[test]
    fn test_metrics_are_noops_without_recorder() {
        // Must not panic when no global recorder is installed.
        tier_metrics::record_chunk_created();
        tier_metrics::record_chunk_cleared(5);
        tier_metrics::record_point_added();
        tier_metrics::set_series(3);
    }
}
