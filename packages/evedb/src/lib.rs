//! evedb — a typed event-telemetry store.
//!
//! The crate ingests semi-structured security/network events, normalizes
//! them into typed columnar [table slices](slice::TableSlice), packs the
//! slices into immutable [segments](segment::Segment), and seals
//! segment, per-column [synopses](synopsis::Synopsis), and exact
//! [value indexes](index::ValueIndex) into on-disk
//! [partitions](partition::PassivePartition). Queries arrive as boolean
//! [expressions](expr::Expression) over field extractors; evaluation
//! pushes predicates down to each partition, short-circuits through the
//! synopses, and streams matching slices back.
//!
//! Layering, leaves first:
//!
//! - [`data`]: the typed value universe and schemas
//! - [`bitmap`]: run-length compressed id sets
//! - [`slice`]: columnar event batches
//! - [`chunk`] / [`filesystem`]: shared buffers and the I/O actor
//! - [`segment`]: the immutable slice container
//! - [`synopsis`] / [`index`]: per-column prefilters and exact indexes
//! - [`partition`]: sealed units of segment + indexes + schema
//! - [`expr`] / [`query`]: expressions and predicate pushdown
//!
//! Components communicate as actors ([`actor`]); readers ([`reader`])
//! produce slices from byte streams.

pub mod actor;
pub mod bitmap;
pub mod chunk;
pub mod config;
pub mod data;
pub mod error;
pub mod expr;
pub mod filesystem;
pub mod index;
pub mod partition;
pub mod query;
pub mod reader;
pub mod segment;
pub mod slice;
pub mod synopsis;

pub use crate::actor::Verbosity;
pub use crate::bitmap::Bitmap;
pub use crate::chunk::Chunk;
pub use crate::config::StoreConfig;
pub use crate::data::{Data, Schema, Type, TypeKind};
pub use crate::error::{Error, Result};
pub use crate::expr::{Expression, Extractor, MetaExtractor, Predicate, RelOp};
pub use crate::filesystem::FsHandle;
pub use crate::partition::{ActivePartition, PassivePartition};
pub use crate::segment::{Segment, SegmentBuilder};
pub use crate::slice::{SliceBuilder, TableSlice};
