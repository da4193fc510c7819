//! Fixed-span append-only chunk of points starting at a quantized boundary.

use crate::error::TierError;
use crate::types::{now_secs, Point, Timestamp, Value};

/// A fixed-duration buffer of time-ordered samples starting at `t0`.
///
/// A chunk accepts strictly increasing timestamps until it is finished; after
/// [`finish`](Chunk::finish) it is immutable. The `saving`/`saved` flags
/// track the handoff to the persistent store: `saving` once enqueued, `saved`
/// once the store acknowledged durability. Both start cleared and are each
/// set at most once.
#[derive(Debug)]
pub struct Chunk {
    t0: Timestamp,
    timestamps: Vec<Timestamp>,
    values: Vec<Value>,
    last_ts: Timestamp,
    last_write: u32,
    finished: bool,
    saving: bool,
    saved: bool,
}

impl Chunk {
    /// Creates an empty writable chunk starting at `t0`.
    pub fn new(t0: Timestamp) -> Self {
        Chunk {
            t0,
            timestamps: Vec::new(),
            values: Vec::new(),
            last_ts: t0,
            last_write: now_secs(),
            finished: false,
            saving: false,
            saved: false,
        }
    }

    /// Rebuilds a finished chunk from decoded columns. Used by the codec.
    pub(crate) fn from_columns(
        t0: Timestamp,
        timestamps: Vec<Timestamp>,
        values: Vec<Value>,
    ) -> Self {
        let last_ts = timestamps.last().copied().unwrap_or(t0);
        Chunk {
            t0,
            timestamps,
            values,
            last_ts,
            last_write: now_secs(),
            finished: true,
            saving: false,
            saved: false,
        }
    }

    /// Quantized start timestamp, `t0 % chunk_span == 0`.
    pub fn t0(&self) -> Timestamp {
        self.t0
    }

    /// Timestamp of the most recently accepted point (`t0` while empty).
    pub fn last_ts(&self) -> Timestamp {
        self.last_ts
    }

    /// Wall-clock seconds of the most recent mutation (push or finish).
    pub fn last_write(&self) -> u32 {
        self.last_write
    }

    /// Number of accepted points.
    pub fn num_points(&self) -> u32 {
        self.timestamps.len() as u32
    }

    /// Returns true if the chunk holds no points.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Timestamp column, oldest first.
    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    /// Value column, index-aligned with [`timestamps`](Chunk::timestamps).
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn mark_saving(&mut self) {
        self.saving = true;
    }

    pub(crate) fn mark_saved(&mut self) {
        self.saved = true;
    }

    /// Appends a sample. The chunk must be writable and `ts` must advance
    /// past the previous point.
    pub fn push(&mut self, ts: Timestamp, val: Value) -> Result<(), TierError> {
        if self.finished {
            return Err(TierError::ChunkFinished { t0: self.t0 });
        }
        if !self.timestamps.is_empty() && ts <= self.last_ts {
            return Err(TierError::NonMonotonic {
                ts,
                last_ts: self.last_ts,
            });
        }
        self.timestamps.push(ts);
        self.values.push(val);
        self.last_ts = ts;
        self.last_write = now_secs();
        Ok(())
    }

    /// Seals the chunk. Idempotent; a finished chunk accepts no more points.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.last_write = now_secs();
    }

    /// Snapshot iterator over the points currently in the chunk, oldest
    /// first. The snapshot is taken eagerly so the iterator stays valid after
    /// any lock guarding the chunk is released.
    pub fn iter(&self) -> ChunkIter {
        let points = self
            .timestamps
            .iter()
            .zip(self.values.iter())
            .map(|(&ts, &val)| Point { ts, val })
            .collect();
        ChunkIter { points, pos: 0 }
    }
}

/// Owning iterator over a chunk snapshot, oldest point first.
#[derive(Debug, Clone)]
pub struct ChunkIter {
    points: Vec<Point>,
    pos: usize,
}

impl Iterator for ChunkIter {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        let point = self.points.get(self.pos).copied();
        if point.is_some() {
            self.pos += 1;
        }
        point
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.points.len() - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chunk_is_writable_and_empty() {
        let chunk = Chunk::new(60);
        assert_eq!(chunk.t0(), 60);
        assert_eq!(chunk.num_points(), 0);
        assert!(chunk.is_empty());
        assert!(!chunk.is_finished());
        assert!(!chunk.is_saving());
        assert!(!chunk.is_saved());
        assert!(chunk.last_write() > 0);
    }

    #[test]
    fn test_push_tracks_last_ts() {
        let mut chunk = Chunk::new(60);
        chunk.push(100, 1.0).unwrap();
        chunk.push(110, 2.0).unwrap();
        assert_eq!(chunk.num_points(), 2);
        assert_eq!(chunk.last_ts(), 110);
        assert_eq!(chunk.timestamps(), &[100, 110]);
        assert_eq!(chunk.values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_push_rejects_non_monotonic() {
        let mut chunk = Chunk::new(60);
        chunk.push(100, 1.0).unwrap();

        match chunk.push(100, 2.0) {
            Err(TierError::NonMonotonic { ts: 100, last_ts: 100 }) => {}
            other => panic!("expected NonMonotonic, got {:?}", other),
        }
        match chunk.push(90, 2.0) {
            Err(TierError::NonMonotonic { .. }) => {}
            other => panic!("expected NonMonotonic, got {:?}", other),
        }
        assert_eq!(chunk.num_points(), 1);
    }

    #[test]
    fn test_finish_seals_chunk() {
        let mut chunk = Chunk::new(60);
        chunk.push(100, 1.0).unwrap();
        chunk.finish();
        assert!(chunk.is_finished());

        match chunk.push(110, 2.0) {
            Err(TierError::ChunkFinished { t0: 60 }) => {}
            other => panic!("expected ChunkFinished, got {:?}", other),
        }
        // finishing again is a no-op
        chunk.finish();
        assert!(chunk.is_finished());
        assert_eq!(chunk.num_points(), 1);
    }

    #[test]
    fn test_iter_snapshot_is_independent() {
        let mut chunk = Chunk::new(60);
        chunk.push(100, 1.0).unwrap();
        let iter = chunk.iter();
        chunk.push(110, 2.0).unwrap();

        let points: Vec<Point> = iter.collect();
        assert_eq!(points, vec![Point { ts: 100, val: 1.0 }]);
        assert_eq!(chunk.iter().count(), 2);
    }

    #[test]
    fn test_iter_is_exact_size() {
        let mut chunk = Chunk::new(0);
        for i in 1..=5u32 {
            chunk.push(i * 10, f64::from(i)).unwrap();
        }
        let mut iter = chunk.iter();
        assert_eq!(iter.len(), 5);
        iter.next();
        assert_eq!(iter.len(), 4);
    }

    #[test]
    fn test_save_flags_set_once() {
        let mut chunk = Chunk::new(60);
        chunk.push(70, 1.0).unwrap();
        chunk.finish();
        chunk.mark_saving();
        assert!(chunk.is_saving() && !chunk.is_saved());
        chunk.mark_saved();
        assert!(chunk.is_saved());
    }

    #[test]
    fn test_from_columns_is_finished() {
        let chunk = Chunk::from_columns(60, vec![70, 80], vec![1.0, 2.0]);
        assert!(chunk.is_finished());
        assert_eq!(chunk.last_ts(), 80);
        assert_eq!(chunk.num_points(), 2);
        assert!(!chunk.is_saved());
    }
}
