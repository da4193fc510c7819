//! Per-series circular chunk buffer: ingestion, range queries, persistence
//! handoff, and garbage collection.
//!
//! Samples stream in through [`SeriesRing::add`], land in the current chunk
//! (a timestamp range quantized to the chunk span), and fan out to the
//! configured rollup aggregators. When a sample crosses a span boundary the
//! current chunk is finished and handed to the store, and the ring advances;
//! once the ring is full, advancing overwrites the oldest slot. Queries are
//! served straight out of the ring.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::aggregator::{AggSetting, Aggregator, Consolidator};
use crate::chunk::{Chunk, ChunkIter};
use crate::cluster::NodeRole;
use crate::error::TierError;
use crate::store::{ChunkStore, ChunkWriteRequest};
use crate::telemetry::{tier_metrics, TierEvent, TierEventListener};
use crate::types::{span_start, Timestamp, Value};

/// Sentinel `mem_start` returned by [`SeriesRing::get`] when no in-memory
/// data can serve the requested range.
pub const NO_DATA: u32 = i32::MAX as u32;

/// Mutable ring state, guarded by the series lock.
#[derive(Debug)]
struct RingState {
    /// Ring slots. Grows append-only to `num_chunks`, then wraps. Slots are
    /// shared with in-flight write requests, so overwriting a slot never
    /// invalidates the store's copy.
    chunks: Vec<Arc<RwLock<Chunk>>>,
    /// Index of the only writable chunk. All other slots are finished.
    current_pos: usize,
    /// Ring capacity. Mutable only through `grow_num_chunks`.
    num_chunks: u32,
    /// `t0` of the very first chunk ever created for this series. That chunk
    /// usually covers only part of its span.
    first_chunk_t0: u32,
}

/// One metric series in the hot tier: a circular buffer of chunks plus the
/// rollup aggregators derived from it.
///
/// Concurrency-safe: many ingesters and readers may share a `SeriesRing`.
/// Writers serialize on an internal readers-writer lock; queries take the
/// read side and return snapshot iterators that stay valid after the lock is
/// released.
#[derive(Debug)]
pub struct SeriesRing {
    store: Arc<dyn ChunkStore>,
    role: Arc<dyn NodeRole>,
    events: Arc<dyn TierEventListener>,
    key: String,
    chunk_span: u32,
    ttl: u32,
    state: RwLock<RingState>,
    /// Construction-time immutable, so rollup dispatch never needs the lock.
    aggregators: Vec<Aggregator>,
}

impl SeriesRing {
    /// Creates a series retaining `num_chunks` chunks of `chunk_span`
    /// seconds each, with one rollup band per entry in `agg_settings`.
    ///
    /// # Panics
    /// Panics if `chunk_span` is zero or `num_chunks < 2`; both are
    /// construction-time configuration bugs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        role: Arc<dyn NodeRole>,
        events: Arc<dyn TierEventListener>,
        key: impl Into<String>,
        chunk_span: u32,
        num_chunks: u32,
        ttl: u32,
        agg_settings: &[AggSetting],
    ) -> Self {
        assert!(chunk_span > 0, "chunk_span must be non-zero");
        assert!(num_chunks >= 2, "a series ring needs at least 2 chunks");
        let key = key.into();
        let aggregators = agg_settings
            .iter()
            .map(|setting| {
                Aggregator::new(
                    Arc::clone(&store),
                    Arc::clone(&role),
                    Arc::clone(&events),
                    &key,
                    *setting,
                )
            })
            .collect();
        SeriesRing {
            store,
            role,
            events,
            key,
            chunk_span,
            ttl,
            state: RwLock::new(RingState {
                chunks: Vec::with_capacity(num_chunks as usize),
                current_pos: 0,
                num_chunks,
                first_chunk_t0: 0,
            }),
            aggregators,
        }
    }

    /// Series identifier.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Span of individual chunks in seconds.
    pub fn chunk_span(&self) -> u32 {
        self.chunk_span
    }

    /// TTL forwarded to the store with every write request.
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Ingests one sample and streams it to the rollup aggregators.
    ///
    /// Timestamps must not decrease: a sample quantizing into an older chunk
    /// window, or into the current window after the store acknowledged the
    /// current chunk, is dropped (an event records it). Crossing into a newer
    /// window finishes the current chunk and hands it to the store; if the
    /// write queue is full this call blocks until the store admits the chunk.
    ///
    /// Never call with a `ts` of 0.
    pub fn add(&self, ts: Timestamp, val: Value) -> Result<(), TierError> {
        let mut state = self.state.write()?;
        let t0 = span_start(ts, self.chunk_span);

        if state.chunks.is_empty() {
            // no data has been added to this series at all
            tier_metrics::record_chunk_created();
            let chunk = Arc::new(RwLock::new(Chunk::new(t0)));
            state.chunks.push(chunk);
            state.current_pos = 0;
            // the first chunk typically covers only part of its span, so
            // keep a record of it
            state.first_chunk_t0 = t0;
            self.push_first(&state.chunks[0], ts, val)?;
        } else {
            let current = Arc::clone(&state.chunks[state.current_pos]);
            let (current_t0, current_saved) = {
                let chunk = current.read()?;
                (chunk.t0(), chunk.is_saved())
            };

            if t0 == current_t0 {
                if current_saved {
                    self.events.on_event(TierEvent::SampleAfterSave {
                        key: self.key.clone(),
                        t0: current_t0,
                    });
                    return Ok(());
                }
                if let Err(err) = current.write()?.push(ts, val) {
                    self.events.on_event(TierEvent::SampleRejected {
                        key: self.key.clone(),
                        ts,
                        error: err.to_string(),
                    });
                    return Ok(());
                }
            } else if t0 < current_t0 {
                self.events.on_event(TierEvent::SampleOutOfOrder {
                    key: self.key.clone(),
                    ts,
                    chunk_t0: current_t0,
                });
                return Ok(());
            } else {
                // span boundary crossed: hand the current chunk to the
                // store, then advance the ring. If the write queue is full,
                // persist blocks and so does this add.
                self.persist(&state, state.current_pos)?;

                let pos = (state.current_pos + 1) % state.num_chunks as usize;
                state.current_pos = pos;

                tier_metrics::record_chunk_created();
                if state.chunks.len() < state.num_chunks as usize {
                    state.chunks.push(Arc::new(RwLock::new(Chunk::new(t0))));
                } else {
                    // the store may still hold this slot's chunk; the ring
                    // does not wait for acknowledgement to reclaim it
                    let evicted_points = state.chunks[pos].read()?.num_points();
                    tier_metrics::record_chunk_cleared(evicted_points);
                    state.chunks[pos] = Arc::new(RwLock::new(Chunk::new(t0)));
                }
                self.push_first(&state.chunks[pos], ts, val)?;
            }
        }

        tier_metrics::record_point_added();
        for aggregator in &self.aggregators {
            aggregator.add(ts, val)?;
        }
        Ok(())
    }

    /// Pushes the opening sample of a freshly created chunk. A failure here
    /// means the ring state is unrecoverable.
    fn push_first(
        &self,
        chunk: &Arc<RwLock<Chunk>>,
        ts: Timestamp,
        val: Value,
    ) -> Result<(), TierError> {
        if let Err(err) = chunk.write()?.push(ts, val) {
            panic!(
                "pushing initial value <{},{}> to a new chunk for {} failed: {}",
                ts, val, self.key, err
            );
        }
        Ok(())
    }

    /// Returns all data between `from` (inclusive) and `to` (exclusive).
    /// More data than requested may be included: iterators cover whole
    /// chunks.
    ///
    /// The first element of the result is the `t0` of the oldest chunk being
    /// served, so a caller needing earlier data knows where to pick up in
    /// the durable store. It is [`NO_DATA`] when the buffer holds nothing
    /// for the range at all, and the oldest retained `t0` when the range
    /// ends before anything held here.
    ///
    /// # Panics
    /// Panics if `from >= to`.
    pub fn get(&self, from: Timestamp, to: Timestamp) -> Result<(u32, Vec<ChunkIter>), TierError> {
        assert!(from < to, "invalid request: to must be > from");
        let state = self.state.read()?;

        if state.chunks.is_empty() {
            return Ok((NO_DATA, Vec::new()));
        }
        let len = state.chunks.len();

        let mut newest_t0 = state.chunks[state.current_pos].read()?.t0();
        if from >= newest_t0 + self.chunk_span {
            // the requested range starts after everything we have
            return Ok((NO_DATA, Vec::new()));
        }

        let mut oldest_pos = (state.current_pos + 1) % len;
        let mut oldest_t0 = state.chunks[oldest_pos].read()?.t0();

        // The first chunk of a series is usually partial. Only the primary
        // may serve it; a secondary defers that region to the durable store,
        // where the primary has long since written it.
        if !self.role.is_primary() && oldest_t0 == state.first_chunk_t0 {
            if oldest_pos == state.current_pos {
                // the partial leader is the only chunk we have
                return Ok((NO_DATA, Vec::new()));
            }
            oldest_pos = (oldest_pos + 1) % len;
            oldest_t0 = state.chunks[oldest_pos].read()?.t0();
        }

        if to <= oldest_t0 {
            // the requested range ends before any data we have
            return Ok((oldest_t0, Vec::new()));
        }

        // advance to the oldest chunk that intersects `from`; if the range
        // starts before everything retained, the oldest chunk stands
        while from >= oldest_t0 + self.chunk_span {
            oldest_pos = (oldest_pos + 1) % len;
            oldest_t0 = state.chunks[oldest_pos].read()?.t0();
        }

        // walk the newest position back until its chunk intersects `to`.
        // With the newest t0 at 120: to=121 needs this chunk, to=120 only
        // data up to 119, so an older chunk.
        let mut newest_pos = state.current_pos;
        while to <= newest_t0 {
            newest_pos = (newest_pos + len - 1) % len;
            newest_t0 = state.chunks[newest_pos].read()?.t0();
        }

        let mut iters = Vec::with_capacity(len);
        let mut pos = oldest_pos;
        loop {
            iters.push(state.chunks[pos].read()?.iter());
            if pos == newest_pos {
                break;
            }
            pos = (pos + 1) % len;
        }
        Ok((oldest_t0, iters))
    }

    /// Routes a rollup query to the derived series for `cons` in the band
    /// whose span equals `agg_span`.
    ///
    /// No lock is taken here: the aggregator list never changes after
    /// construction. The derived series takes its own read lock.
    ///
    /// # Panics
    /// Panics on an unknown `agg_span` and for the non-archive consolidators
    /// (`Avg`, `None`); both are caller bugs.
    pub fn get_aggregated(
        &self,
        cons: Consolidator,
        agg_span: u32,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<(u32, Vec<ChunkIter>), TierError> {
        for aggregator in &self.aggregators {
            if aggregator.span() == agg_span {
                return aggregator.metric(cons).get(from, to);
            }
        }
        panic!(
            "get_aggregated called with unknown agg span {} for {}",
            agg_span, self.key
        );
    }

    /// Marks the chunk starting at `t0` as durably saved.
    ///
    /// Called by the store once a write request is acknowledged. A `t0` no
    /// longer in the ring is a no-op: the slot was reclaimed, and the
    /// durable copy is unaffected.
    pub fn sync_chunk_save_state(&self, t0: Timestamp) -> Result<(), TierError> {
        let state = self.state.write()?;
        if let Some(chunk) = self.chunk_at_t0(&state, t0)? {
            chunk.write()?.mark_saved();
            self.events.on_event(TierEvent::ChunkSaved {
                key: self.key.clone(),
                t0,
            });
        }
        Ok(())
    }

    /// Finishes the chunk at `pos` and, on the primary, enqueues it together
    /// with any older unsaved chunks a previous primary left behind. Runs
    /// with the write lock held.
    ///
    /// Requests are submitted oldest-first so durable order matches temporal
    /// order. A full write queue blocks here, which is the system's
    /// backpressure: callers up the stack wait until the store catches up.
    fn persist(&self, state: &RingState, pos: usize) -> Result<(), TierError> {
        let chunk = &state.chunks[pos];
        chunk.write()?.finish();

        if !self.role.is_primary() {
            // secondaries never write
            return Ok(());
        }

        let current_t0 = chunk.read()?.t0();
        let mut pending: Vec<(u32, Arc<RwLock<Chunk>>)> =
            vec![(current_t0, Arc::clone(chunk))];

        // if this node recently became the primary, older chunks may never
        // have been queued by the previous one
        let len = state.chunks.len();
        let mut prev_pos = (pos + len - 1) % len;
        loop {
            let prev = &state.chunks[prev_pos];
            let (t0, saved, saving) = {
                let chunk = prev.read()?;
                (chunk.t0(), chunk.is_saved(), chunk.is_saving())
            };
            if t0 >= current_t0 || saved || saving {
                break;
            }
            pending.push((t0, Arc::clone(prev)));
            prev_pos = (prev_pos + len - 1) % len;
        }

        for (t0, chunk) in pending.into_iter().rev() {
            self.store.add(ChunkWriteRequest {
                key: self.key.clone(),
                chunk: Arc::clone(&chunk),
                ttl: self.ttl,
                enqueued_at: SystemTime::now(),
            });
            chunk.write()?.mark_saving();
            self.events.on_event(TierEvent::ChunkQueued {
                key: self.key.clone(),
                t0,
            });
        }
        Ok(())
    }

    /// Evaluates this series for garbage collection. Run periodically by the
    /// owning registry.
    ///
    /// Returns `true` when the series can be dropped from memory entirely:
    /// the writable chunk went idle before `chunk_min_ts`, was saved, and
    /// its last write predates `metric_min_ts`. An idle chunk that is not
    /// droppable yet is finalized and sent to the store right away, without
    /// advancing the ring, so it becomes droppable once acknowledged.
    pub fn gc(&self, chunk_min_ts: u32, metric_min_ts: u32) -> Result<bool, TierError> {
        let state = self.state.write()?;
        if state.chunks.is_empty() {
            return Ok(false);
        }
        let (t0, last_write, saved) = {
            let chunk = state.chunks[state.current_pos].read()?;
            (chunk.t0(), chunk.last_write(), chunk.is_saved())
        };
        if last_write < chunk_min_ts {
            if saved && last_write < metric_min_ts {
                return Ok(true);
            }
            // stale writable chunk: finalize and persist it even though it
            // never rolled over
            self.events.on_event(TierEvent::StaleChunkPersisted {
                key: self.key.clone(),
                t0,
            });
            self.persist(&state, state.current_pos)?;
        }
        Ok(false)
    }

    /// Raises the ring capacity to `num_chunks`. Intended for startup, when
    /// a configuration change grants a series more retention. Shrinking is
    /// not supported; a smaller value is ignored.
    pub fn grow_num_chunks(&self, num_chunks: u32) -> Result<(), TierError> {
        let mut state = self.state.write()?;
        if num_chunks <= state.num_chunks {
            return Ok(());
        }
        let old_cap = state.num_chunks as usize;
        state.num_chunks = num_chunks;

        if state.chunks.len() < old_cap {
            // the ring never filled, so it is still in append order
            return Ok(());
        }

        // re-order the wrapped ring with the oldest chunk at the start of
        // the list and the newest at the end
        let len = state.chunks.len();
        let mut ordered = Vec::with_capacity(len);
        let mut pos = (state.current_pos + 1) % len;
        for _ in 0..len {
            ordered.push(Arc::clone(&state.chunks[pos]));
            pos = (pos + 1) % len;
        }
        state.chunks = ordered;
        state.current_pos = len - 1;
        Ok(())
    }

    /// Looks up a chunk by its `t0`. Constant-time in the happy path: chunks
    /// are sequential in time, so the distance from the current chunk's `t0`
    /// is a position guess, corrected by a short scan when the ring has gaps.
    fn chunk_at_t0(
        &self,
        state: &RingState,
        ts: Timestamp,
    ) -> Result<Option<Arc<RwLock<Chunk>>>, TierError> {
        if state.chunks.is_empty() {
            return Ok(None);
        }
        let len = state.chunks.len();
        let current_t0 = state.chunks[state.current_pos].read()?.t0();

        if ts == current_t0 {
            return Ok(Some(Arc::clone(&state.chunks[state.current_pos])));
        }
        if ts > current_t0 || len == 1 {
            // not in our dataset
            return Ok(None);
        }

        let chunks_ago = ((current_t0 - ts) / self.chunk_span) as usize;
        let oldest_pos = (state.current_pos + 1) % len;

        let mut guess = if chunks_ago >= len - 1 {
            oldest_pos
        } else {
            (state.current_pos + len - chunks_ago) % len
        };

        let mut guess_t0 = state.chunks[guess].read()?.t0();
        if guess_t0 == ts {
            return Ok(Some(Arc::clone(&state.chunks[guess])));
        }

        if ts > guess_t0 {
            // guessed too old: check newer chunks
            while guess_t0 < current_t0 {
                guess = (guess + 1) % len;
                guess_t0 = state.chunks[guess].read()?.t0();
                if guess_t0 == ts {
                    return Ok(Some(Arc::clone(&state.chunks[guess])));
                }
            }
        } else {
            // guessed too new: check older chunks
            let oldest_t0 = state.chunks[oldest_pos].read()?.t0();
            while guess_t0 >= oldest_t0 && guess_t0 < current_t0 {
                guess = (guess + len - 1) % len;
                guess_t0 = state.chunks[guess].read()?.t0();
                if guess_t0 == ts {
                    return Ok(Some(Arc::clone(&state.chunks[guess])));
                }
            }
        }
        Ok(None)
    }
}
