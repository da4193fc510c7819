//! Multi-resolution rollups: per-window accumulators feeding five derived
//! series (min, max, sum, count, last) at a coarser span.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::cluster::NodeRole;
use crate::error::TierError;
use crate::series::SeriesRing;
use crate::store::ChunkStore;
use crate::telemetry::TierEventListener;
use crate::types::{span_start, Timestamp, Value};

/// Selects which rollup series a rollup query reads.
///
/// `Avg` and `None` are deliberate non-archives: there is no backing series
/// for either, and requesting one is a caller bug. Average is derived by
/// querying `Sum` and `Cnt` and dividing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consolidator {
    None,
    Avg,
    Cnt,
    Last,
    Min,
    Max,
    Sum,
}

impl fmt::Display for Consolidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consolidator::None => "none",
            Consolidator::Avg => "avg",
            Consolidator::Cnt => "cnt",
            Consolidator::Last => "last",
            Consolidator::Min => "min",
            Consolidator::Max => "max",
            Consolidator::Sum => "sum",
        };
        f.write_str(name)
    }
}

/// Configuration of one rollup band. `span` must be a non-zero multiple of
/// the base series' chunk span and unique among a series' bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggSetting {
    /// Rollup window span in seconds.
    pub span: u32,
    /// Chunk span of the derived series.
    pub chunk_span: u32,
    /// Ring capacity of the derived series.
    pub num_chunks: u32,
    /// TTL forwarded to the store for the derived series.
    pub ttl: u32,
}

/// Running accumulators for the currently open rollup window.
#[derive(Debug, Clone, Copy)]
struct Window {
    t0: Timestamp,
    min: Value,
    max: Value,
    sum: Value,
    cnt: u32,
    lst: Value,
}

impl Window {
    fn open(t0: Timestamp, val: Value) -> Self {
        Window {
            t0,
            min: val,
            max: val,
            sum: val,
            cnt: 1,
            lst: val,
        }
    }

    fn update(&mut self, val: Value) {
        self.min = self.min.min(val);
        self.max = self.max.max(val);
        self.sum += val;
        self.cnt += 1;
        self.lst = val;
    }
}

/// One rollup band over a source series.
///
/// `add` runs under the source series' write lock; the window state has its
/// own small mutex so rollup queries never touch the source lock.
#[derive(Debug)]
pub struct Aggregator {
    span: u32,
    window: Mutex<Option<Window>>,
    min_metric: SeriesRing,
    max_metric: SeriesRing,
    sum_metric: SeriesRing,
    cnt_metric: SeriesRing,
    lst_metric: SeriesRing,
}

impl Aggregator {
    pub(crate) fn new(
        store: Arc<dyn ChunkStore>,
        role: Arc<dyn NodeRole>,
        events: Arc<dyn TierEventListener>,
        key: &str,
        setting: AggSetting,
    ) -> Self {
        let child = |cons: Consolidator| {
            SeriesRing::new(
                Arc::clone(&store),
                Arc::clone(&role),
                Arc::clone(&events),
                format!("{}_{}_{}", key, cons, setting.span),
                setting.chunk_span,
                setting.num_chunks,
                setting.ttl,
                &[],
            )
        };
        Aggregator {
            span: setting.span,
            window: Mutex::new(None),
            min_metric: child(Consolidator::Min),
            max_metric: child(Consolidator::Max),
            sum_metric: child(Consolidator::Sum),
            cnt_metric: child(Consolidator::Cnt),
            lst_metric: child(Consolidator::Last),
        }
    }

    /// Rollup window span in seconds.
    pub fn span(&self) -> u32 {
        self.span
    }

    /// Feeds one source sample into the running window, flushing the closed
    /// window's five summaries into the derived series when the sample
    /// crosses a span boundary.
    pub(crate) fn add(&self, ts: Timestamp, val: Value) -> Result<(), TierError> {
        let window_t0 = span_start(ts, self.span);
        let mut guard = self.window.lock()?;
        let closed = match *guard {
            None => {
                *guard = Some(Window::open(window_t0, val));
                None
            }
            Some(mut window) if window_t0 == window.t0 => {
                window.update(val);
                *guard = Some(window);
                None
            }
            Some(window) if window_t0 > window.t0 => {
                *guard = Some(Window::open(window_t0, val));
                Some(window)
            }
            // a window that already closed; the derived series would reject
            // the write anyway
            Some(_) => None,
        };
        drop(guard);
        if let Some(window) = closed {
            self.flush(window)?;
        }
        Ok(())
    }

    fn flush(&self, window: Window) -> Result<(), TierError> {
        self.min_metric.add(window.t0, window.min)?;
        self.max_metric.add(window.t0, window.max)?;
        self.sum_metric.add(window.t0, window.sum)?;
        self.cnt_metric.add(window.t0, f64::from(window.cnt))?;
        self.lst_metric.add(window.t0, window.lst)?;
        Ok(())
    }

    /// Backing series for `cons`. Panics for the non-archive consolidators.
    pub(crate) fn metric(&self, cons: Consolidator) -> &SeriesRing {
        match cons {
            Consolidator::None => {
                panic!("cannot fetch an archive for the none consolidator")
            }
            Consolidator::Avg => {
                panic!("avg has no archive; query sum and cnt and divide")
            }
            Consolidator::Cnt => &self.cnt_metric,
            Consolidator::Last => &self.lst_metric,
            Consolidator::Min => &self.min_metric,
            Consolidator::Max => &self.max_metric,
            Consolidator::Sum => &self.sum_metric,
        }
    }
}
