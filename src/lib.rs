#![doc = r#"
firn: In-Memory Chunked Hot Tier for Metric Series

This crate provides the hot tier of a metrics store: per-series circular
buffers of fixed-span chunks with efficient ingestion, in-memory range
queries, and write-through handoff to a persistent write queue. It is
designed for high-throughput concurrent use, with support for:
- Per-series chunk rings with wrap-around retention of the most recent data
- Multi-resolution rollups (min/max/sum/count/last) per series
- Backpressure through a bounded, blocking store queue
- Primary/secondary cluster roles with catch-up persistence after failover
- Idle-series garbage collection with a background sweeper

See the README for usage examples and more details.
"#]
// Declare modules
pub mod aggregator;
pub mod chunk;
pub mod cluster;
pub mod encoding;
pub mod error;
pub mod registry;
pub mod series;
pub mod store;
pub mod telemetry;
pub mod types;

/// Main entry point: the per-process registry of series rings.
pub use crate::registry::HotTier;
/// Configuration options for the hot tier.
pub use crate::registry::TierConfig;
/// One metric series: a circular buffer of chunks plus its rollups.
pub use crate::series::SeriesRing;
/// Sentinel `mem_start` meaning no in-memory data serves the range.
pub use crate::series::NO_DATA;
/// Error type for hot-tier operations.
pub use crate::error::TierError;
/// A fixed-span append-only chunk of points.
pub use crate::chunk::Chunk;
/// Snapshot iterator over one chunk's points.
pub use crate::chunk::ChunkIter;
/// Rollup band configuration.
pub use crate::aggregator::AggSetting;
/// Selects which rollup series a rollup query reads.
pub use crate::aggregator::Consolidator;
/// Write-queue contract consumed by the tier.
pub use crate::store::ChunkStore;
/// A chunk on its way to durable storage.
pub use crate::store::ChunkWriteRequest;
/// Store that discards every request.
pub use crate::store::NullStore;
/// Bounded blocking handoff queue (the backpressure primitive).
pub use crate::store::WriteQueue;
/// Cluster role capability read by every series.
pub use crate::cluster::NodeRole;
/// Settable role handle backed by an atomic flag.
pub use crate::cluster::ClusterStatus;
/// Structured event hook for observability.
pub use crate::telemetry::{TierEvent, TierEventListener};
/// Represents a single (timestamp, value) sample.
pub use crate::types::Point;
/// Type alias for a timestamp (seconds since epoch).
pub use crate::types::Timestamp;
/// Type alias for a value in a time series (f64).
pub use crate::types::Value;
