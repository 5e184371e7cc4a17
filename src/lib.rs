//! A concurrent HNSW vector similarity index, fronted by a tiered flat
//! buffer + asynchronous promotion pipeline.
//!
//! [`hnsw::HnswIndex`] is the graph index on its own: insertion, layer-local
//! beam search, the neighbor-selection heuristic, deletion and repair, a
//! resumable batch iterator, and top-K/range queries, all safe to call from
//! any number of threads concurrently. [`tiered::TieredIndex`] wraps it with
//! [`flat::FlatIndex`] so a freshly added vector is queryable the instant
//! `add` returns, while its promotion into the graph happens on a
//! caller-owned worker pool via the job types in [`tiered::jobs`].
//!
//! # Example
//!
//! ```
//! use vecsim_core::{HnswIndex, HnswParams, Metric};
//!
//! let params = HnswParams::new(4, Metric::L2).with_m(16);
//! let index = HnswIndex::<f32>::new(params).unwrap();
//! index.insert(&[1.0, 1.0, 1.0, 1.0], 1).unwrap();
//! let (results, _status) = index.top_k(&[1.0, 1.0, 1.0, 1.0], 1, None).unwrap();
//! assert_eq!(results[0].label, 1);
//! ```

mod config;
mod distance;
mod error;
mod flat;
mod graph;
mod hnsw;
mod label_map;
pub mod runtime;
mod tiered;
mod types;
mod util;
mod visited;

/// Dense unsigned id in `[0, count)`; the index keeps this range contiguous
/// by swap-with-last reclamation on physical delete.
pub type Id = u32;

/// Opaque 64-bit caller-chosen key.
pub type Label = u64;

pub use config::{ElementType, HnswParams, Metric, MultiMode, TieredParams};
pub use error::{Result, StatusCode, VecSimError};
pub use flat::FlatIndex;
pub use hnsw::{BatchIterator, DeleteMode, HnswIndex, LevelSnapshot, NodeSnapshot};
pub use tiered::{InsertJob, Job, RepairJob, SwapDeleteJob, TieredIndex};
pub use types::{BatchOrder, IndexInfo, QueryMode, QueryParams, SearchResult};
