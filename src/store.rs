//! Persistent-store handoff: the write request, the store contract, and a
//! bounded blocking queue.
//!
//! `ChunkStore::add` is allowed to block, and that blocking is the system's
//! only backpressure signal: it propagates through `persist` into the
//! ingestion caller, which must be willing to wait for the store to admit
//! the chunk. Do not wrap the store in an unbounded queue; the bound IS the
//! signal.

use crate::chunk::Chunk;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// A finished (or stale-partial) chunk on its way to durable storage.
///
/// The store owns this request after enqueue. The chunk handle is shared
/// with the ring, which may overwrite its slot without waiting for the
/// store; the request keeps the chunk alive regardless.
#[derive(Debug, Clone)]
pub struct ChunkWriteRequest {
    pub key: String,
    pub chunk: Arc<RwLock<Chunk>>,
    pub ttl: u32,
    pub enqueued_at: SystemTime,
}

/// Write-queue contract. `add` may block when the queue is full; success is
/// presumed unless the process aborts. A durable store is expected to call
/// back into `SeriesRing::sync_chunk_save_state` once a chunk is safe.
pub trait ChunkStore: std::fmt::Debug + Send + Sync + 'static {
    fn add(&self, req: ChunkWriteRequest);
}

/// Store that discards every request. Default for secondaries and tests.
#[derive(Debug, Default)]
pub struct NullStore;

impl ChunkStore for NullStore {
    fn add(&self, _req: ChunkWriteRequest) {}
}

/// Bounded handoff queue in front of a durable-store bridge.
///
/// `add` blocks once `capacity` requests are in flight, which is exactly the
/// backpressure contract above. The consumer half drains requests and ships
/// them to storage.
#[derive(Debug)]
pub struct WriteQueue {
    tx: SyncSender<ChunkWriteRequest>,
}

impl WriteQueue {
    /// Creates a queue admitting at most `capacity` undrained requests,
    /// returning the store handle and the consumer half.
    pub fn bounded(capacity: usize) -> (WriteQueue, Receiver<ChunkWriteRequest>) {
        let (tx, rx) = sync_channel(capacity);
        (WriteQueue { tx }, rx)
    }
}

impl ChunkStore for WriteQueue {
    fn add(&self, req: ChunkWriteRequest) {
        // A dropped consumer means the bridge is shutting down; the request
        // has nowhere to go.
        let _ = self.tx.send(req);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::TryRecvError;
    use std::thread;
    use std::time::Duration;

    fn request(key: &str, t0: u32) -> ChunkWriteRequest {
        let mut chunk = Chunk::new(t0);
        chunk.push(t0 + 1, 1.0).unwrap();
        chunk.finish();
        ChunkWriteRequest {
            key: key.to_string(),
            chunk: Arc::new(RwLock::new(chunk)),
            ttl: 3600,
            enqueued_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_write_queue_delivers_in_order() {
        let (queue, rx) = WriteQueue::bounded(4);
        queue.add(request("a", 60));
        queue.add(request("a", 120));

        assert_eq!(rx.recv().unwrap().chunk.read().unwrap().t0(), 60);
        assert_eq!(rx.recv().unwrap().chunk.read().unwrap().t0(), 120);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_write_queue_blocks_when_full() {
        let (queue, rx) = WriteQueue::bounded(1);
        queue.add(request("a", 60));

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            // queue is full: this blocks until the consumer drains a slot
            queue.add(request("a", 120));
            done_tx.send(()).unwrap();
        });

        assert!(
            done_rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "add returned while the queue was full"
        );

        let first = rx.recv().unwrap();
        assert_eq!(first.chunk.read().unwrap().t0(), 60);
        done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("add should complete once a slot frees up");
        handle.join().unwrap();
    }

    #[test]
    fn test_null_store_discards() {
        let store = NullStore;
        store.add(request("a", 60));
    }
}
