//! Per-process registry of series rings with a background GC sweeper.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rayon::prelude::*;

use crate::aggregator::AggSetting;
use crate::cluster::NodeRole;
use crate::error::TierError;
use crate::series::SeriesRing;
use crate::store::ChunkStore;
use crate::telemetry::{noop_event_listener, tier_metrics, TierEvent, TierEventListener};
use crate::types::now_secs;

/// Commands understood by the background GC thread.
enum GcCommand {
    Sweep { ack: Sender<Result<usize, TierError>> },
    Shutdown,
}

/// Configuration for the hot tier.
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Span of individual chunks in seconds.
    pub chunk_span: u32,
    /// Chunks retained per series. Must be at least 2.
    pub num_chunks: u32,
    /// TTL in seconds, forwarded to the store with every write request.
    pub ttl: u32,
    /// Rollup bands created for every series. Spans must be unique non-zero
    /// multiples of `chunk_span`.
    pub agg_settings: Vec<AggSetting>,
    /// A writable chunk idle for longer than this is finalized and sent to
    /// the store by the sweeper.
    pub chunk_max_stale: u32,
    /// A series whose saved chunk has been idle for longer than this is
    /// dropped from memory entirely.
    pub metric_max_stale: u32,
    /// Interval between GC sweeps.
    pub gc_interval: Duration,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn TierEventListener>,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            chunk_span: 600,
            num_chunks: 7,
            ttl: 60 * 60 * 24 * 7,
            agg_settings: Vec::new(),
            chunk_max_stale: 60 * 60,
            metric_max_stale: 6 * 60 * 60,
            gc_interval: Duration::from_secs(60),
            event_listener: noop_event_listener(),
        }
    }
}

type SeriesMap = Arc<RwLock<HashMap<String, Arc<SeriesRing>>>>;

/// The in-memory hot tier: every live series ring, keyed by metric id.
///
/// Rings are created on first write and dropped by the background sweeper
/// once idle and durably saved. The sweeper thread is joined on drop.
#[derive(Debug)]
pub struct HotTier {
    series: SeriesMap,
    store: Arc<dyn ChunkStore>,
    role: Arc<dyn NodeRole>,
    config: TierConfig,
    gc_cmd_tx: Sender<GcCommand>,
    gc_handle: Option<JoinHandle<()>>,
}

impl HotTier {
    /// Creates the tier and spawns its GC sweeper thread.
    ///
    /// # Errors
    /// Returns a configuration error if `chunk_span` is zero, `num_chunks`
    /// is below 2, or any rollup span is zero, duplicated, or not a
    /// multiple of `chunk_span`.
    pub fn new(
        store: Arc<dyn ChunkStore>,
        role: Arc<dyn NodeRole>,
        config: TierConfig,
    ) -> Result<Self, TierError> {
        validate(&config)?;

        let series: SeriesMap = Arc::new(RwLock::new(HashMap::new()));
        let (gc_cmd_tx, gc_cmd_rx) = mpsc::channel::<GcCommand>();

        let gc_handle = spawn_sweeper(
            Arc::clone(&series),
            config.chunk_max_stale,
            config.metric_max_stale,
            config.gc_interval,
            Arc::clone(&config.event_listener),
            gc_cmd_rx,
        );

        Ok(HotTier {
            series,
            store,
            role,
            config,
            gc_cmd_tx,
            gc_handle: Some(gc_handle),
        })
    }

    /// Returns the ring for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &str) -> Result<Arc<SeriesRing>, TierError> {
        if let Some(ring) = self.series.read()?.get(key) {
            return Ok(Arc::clone(ring));
        }
        let mut guard = self.series.write()?;
        let ring = guard
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(SeriesRing::new(
                    Arc::clone(&self.store),
                    Arc::clone(&self.role),
                    Arc::clone(&self.config.event_listener),
                    key,
                    self.config.chunk_span,
                    self.config.num_chunks,
                    self.config.ttl,
                    &self.config.agg_settings,
                ))
            })
            .clone();
        tier_metrics::set_series(guard.len());
        Ok(ring)
    }

    /// Returns the ring for `key`, if the series is resident.
    pub fn get(&self, key: &str) -> Result<Option<Arc<SeriesRing>>, TierError> {
        Ok(self.series.read()?.get(key).cloned())
    }

    /// Store acknowledgement entry point: marks `(key, t0)` as durable.
    /// Unknown keys and t0s are silent no-ops.
    pub fn sync_chunk_save_state(&self, key: &str, t0: u32) -> Result<(), TierError> {
        if let Some(ring) = self.get(key)? {
            ring.sync_chunk_save_state(t0)?;
        }
        Ok(())
    }

    /// Number of resident series.
    pub fn len(&self) -> Result<usize, TierError> {
        Ok(self.series.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, TierError> {
        Ok(self.series.read()?.is_empty())
    }

    /// Runs a GC sweep immediately and waits for it, returning the number of
    /// series dropped. Useful for tests and controlled shutdown.
    pub fn gc_now(&self) -> Result<usize, TierError> {
        let (tx, rx) = mpsc::channel();
        self.gc_cmd_tx
            .send(GcCommand::Sweep { ack: tx })
            .map_err(|e| {
                TierError::BackgroundTask(format!("Failed to send sweep command: {}", e))
            })?;
        rx.recv().map_err(|e| {
            TierError::BackgroundTask(format!("Failed to receive sweep ack: {}", e))
        })?
    }

    /// Returns the configuration the tier was built with.
    pub fn config(&self) -> &TierConfig {
        &self.config
    }
}

impl Drop for HotTier {
    fn drop(&mut self) {
        let _ = self.gc_cmd_tx.send(GcCommand::Shutdown);
        if let Some(handle) = self.gc_handle.take() {
            if handle.join().is_err() {
                self.config
                    .event_listener
                    .on_event(TierEvent::GcThreadPanicked);
            }
        }
    }
}

fn validate(config: &TierConfig) -> Result<(), TierError> {
    if config.chunk_span == 0 {
        return Err(TierError::Config("chunk_span must be non-zero".to_string()));
    }
    if config.num_chunks < 2 {
        return Err(TierError::Config(
            "num_chunks must be at least 2".to_string(),
        ));
    }
    let mut seen_spans = Vec::with_capacity(config.agg_settings.len());
    for setting in &config.agg_settings {
        if setting.span == 0 || setting.span % config.chunk_span != 0 {
            return Err(TierError::Config(format!(
                "agg span {} is not a non-zero multiple of chunk_span {}",
                setting.span, config.chunk_span
            )));
        }
        if seen_spans.contains(&setting.span) {
            return Err(TierError::Config(format!(
                "duplicate agg span {}",
                setting.span
            )));
        }
        if setting.num_chunks < 2 {
            return Err(TierError::Config(format!(
                "agg span {}: num_chunks must be at least 2",
                setting.span
            )));
        }
        seen_spans.push(setting.span);
    }
    Ok(())
}

fn spawn_sweeper(
    series: SeriesMap,
    chunk_max_stale: u32,
    metric_max_stale: u32,
    gc_interval: Duration,
    events: Arc<dyn TierEventListener>,
    gc_cmd_rx: Receiver<GcCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        events.on_event(TierEvent::GcThreadStarted);

        let sweep = |ack: Option<Sender<Result<usize, TierError>>>| {
            let result = sweep_once(&series, chunk_max_stale, metric_max_stale, &events);
            if let Some(ack) = ack {
                let _ = ack.send(result);
            }
        };

        loop {
            match gc_cmd_rx.recv_timeout(gc_interval) {
                Ok(GcCommand::Sweep { ack }) => sweep(Some(ack)),
                Err(RecvTimeoutError::Timeout) => sweep(None),
                Ok(GcCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    events.on_event(TierEvent::GcThreadStopping);
                    break;
                }
            }
        }
    })
}

/// One sweep over every resident series. Rings are evaluated in parallel;
/// those voting for removal are then dropped under the map's write lock.
fn sweep_once(
    series: &SeriesMap,
    chunk_max_stale: u32,
    metric_max_stale: u32,
    events: &Arc<dyn TierEventListener>,
) -> Result<usize, TierError> {
    let now = now_secs();
    let chunk_min_ts = now.saturating_sub(chunk_max_stale);
    let metric_min_ts = now.saturating_sub(metric_max_stale);

    let snapshot: Vec<(String, Arc<SeriesRing>)> = series
        .read()?
        .iter()
        .map(|(key, ring)| (key.clone(), Arc::clone(ring)))
        .collect();
    let evaluated = snapshot.len();

    let drop_keys: Vec<String> = snapshot
        .into_par_iter()
        .filter_map(|(key, ring)| match ring.gc(chunk_min_ts, metric_min_ts) {
            Ok(true) => Some(key),
            Ok(false) | Err(_) => None,
        })
        .collect();

    if !drop_keys.is_empty() {
        let mut guard = series.write()?;
        for key in &drop_keys {
            guard.remove(key);
            events.on_event(TierEvent::SeriesDropped { key: key.clone() });
        }
        tier_metrics::set_series(guard.len());
    }

    events.on_event(TierEvent::GcSweepCompleted {
        series: evaluated,
        dropped: drop_keys.len(),
    });
    Ok(drop_keys.len())
}
