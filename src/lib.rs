//! # Knowledge Graph
//!
//! An append-only knowledge graph: a hierarchy of *topics*, user-authored
//! *explorations* of those topics, and the relationships between them —
//! parenthood, authorship, citation, access. The domain layer drives an
//! abstract graph backend, and any two conforming backends produce
//! observably identical results for the same sequence of operations.
//!
//! ## Features
//! - **Graph algebra**: labeled nodes, typed directed edges, indexed
//!   neighbor lookup, aggregation, path traversal.
//! - **Append-only domain protocol**: explorations are immutable once
//!   written, every mutation lands in an auditable transaction log, and
//!   content integrity is committed via SHA-256.
//! - **Interchangeable backends**: a volatile in-memory reference store
//!   and a SQLite store (feature `sqlite`, on by default).
//! - **Snapshots**: point-in-time accounting of graph size and the
//!   transaction entries it includes.
//!
//! ## Usage
//!
//! ```no_run
//! use knowledge_graph::{ExploreInput, KnowledgeGraph, MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> knowledge_graph::Result<()> {
//!     let graph = KnowledgeGraph::new(MemoryBackend::new(), "0xAuthor");
//!
//!     graph.register_topic("ai", "AI", "Artificial intelligence").await?;
//!     let entry_id = graph
//!         .explore(ExploreInput {
//!             topic_path: "ai".into(),
//!             title: "Getting started".into(),
//!             content: "Notes on the field".into(),
//!             summary: "An overview".into(),
//!             depth: 1,
//!             tags: "intro".into(),
//!             ..ExploreInput::default()
//!         })
//!         .await?;
//!
//!     let stats = graph.get_topic_stats("ai").await?;
//!     assert_eq!(stats.explorer_count, 1);
//!     let report = graph.verify_integrity().await?;
//!     assert!(report.invalid.is_empty());
//!     println!("wrote {entry_id}");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod graph;
pub mod hash;
pub mod knowledge;
pub mod pushid;

pub use error::{GraphError, Result};
pub use graph::memory::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use graph::sqlite::SqliteBackend;
pub use graph::{
    Direction, Edge, EdgeType, GraphBackend, Label, Metric, MetricValues, Node, Properties,
    TraversalPath,
};
pub use knowledge::{
    AccessGrant, ExploreInput, IntegrityReport, KnowledgeGraph, SnapshotInfo, TopicStats,
};
pub use pushid::PushIdGenerator;
