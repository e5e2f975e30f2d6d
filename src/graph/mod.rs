//! Graph algebra and the storage backend contract.
//!
//! The graph is a store of labeled nodes and typed directed edges with
//! indexed neighbor lookup. Backends implement [`GraphBackend`]; the domain
//! layer drives any conforming backend and must observe identical results,
//! which the equivalence test suite enforces against the in-memory
//! reference.

pub mod algo;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

////////////////////////////////////////////////////////////////////////////////
// Node and edge records

/// Property map attached to nodes and edges. Values are JSON scalars;
/// `Null` models nullable fields such as the withheld content of a gated
/// exploration.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Closed set of node labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Topic,
    User,
    Exploration,
    TxLog,
    Snapshot,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Topic => "Topic",
            Label::User => "User",
            Label::Exploration => "Exploration",
            Label::TxLog => "TxLog",
            Label::Snapshot => "Snapshot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Topic" => Some(Label::Topic),
            "User" => Some(Label::User),
            "Exploration" => Some(Label::Exploration),
            "TxLog" => Some(Label::TxLog),
            "Snapshot" => Some(Label::Snapshot),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    ParentOf,
    Created,
    InTopic,
    Explored,
    BuildsOn,
    PaidFor,
    Includes,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::ParentOf => "PARENT_OF",
            EdgeType::Created => "CREATED",
            EdgeType::InTopic => "IN_TOPIC",
            EdgeType::Explored => "EXPLORED",
            EdgeType::BuildsOn => "BUILDS_ON",
            EdgeType::PaidFor => "PAID_FOR",
            EdgeType::Includes => "INCLUDES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PARENT_OF" => Some(EdgeType::ParentOf),
            "CREATED" => Some(EdgeType::Created),
            "IN_TOPIC" => Some(EdgeType::InTopic),
            "EXPLORED" => Some(EdgeType::Explored),
            "BUILDS_ON" => Some(EdgeType::BuildsOn),
            "PAID_FOR" => Some(EdgeType::PaidFor),
            "INCLUDES" => Some(EdgeType::Includes),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// A labeled node. `(label, id)` is the primary key; ids are
/// domain-meaningful for topics (path) and users (address), generated
/// push ids for everything else. Ids are assumed globally unique across
/// labels — callers must not reuse an id under a different label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub label: Label,
    pub id: String,
    pub properties: Properties,
}

impl Node {
    pub fn new(label: Label, id: impl Into<String>, properties: Properties) -> Self {
        Self {
            label,
            id: id.into(),
            properties,
        }
    }
}

/// A typed directed edge. Endpoints reference nodes by id only; the graph
/// tolerates edges to nonexistent nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub edge_type: EdgeType,
    pub from: String,
    pub to: String,
    pub properties: Properties,
}

impl Edge {
    pub fn new(edge_type: EdgeType, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            edge_type,
            from: from.into(),
            to: to.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// The endpoint reached by following this edge in `direction`.
    pub fn endpoint(&self, direction: Direction) -> &str {
        match direction {
            Direction::Out => &self.to,
            Direction::In => &self.from,
        }
    }
}

/// One path produced by [`GraphBackend::traverse`] or
/// [`GraphBackend::shortest_path`]. `nodes[0]` is the start node and
/// `edges[i]` connects `nodes[i]` to `nodes[i + 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalPath {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

////////////////////////////////////////////////////////////////////////////////
// Aggregation metrics

/// Metrics a backend can compute in the aggregate queries. Results are
/// keyed by [`Metric::key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Number of distinct source nodes.
    Count,
    /// Number of incoming `EXPLORED` edges on a child (grouped form).
    CountDistinct,
    /// Maximum collected depth, 0 if none.
    Max,
    /// Mean collected depth rounded to 2 decimal places, 0 if none.
    Avg,
    /// Sum of collected depths.
    Sum,
}

impl Metric {
    pub fn key(&self) -> &'static str {
        match self {
            Metric::Count => "count",
            Metric::CountDistinct => "count_distinct",
            Metric::Max => "max",
            Metric::Avg => "avg",
            Metric::Sum => "sum",
        }
    }
}

/// Metric name → value, as returned by the aggregate queries.
pub type MetricValues = BTreeMap<String, f64>;

////////////////////////////////////////////////////////////////////////////////
// Backend contract

/// Unit of work handed to [`GraphBackend::with_transaction`].
pub type TxWork = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send>;

/// Abstract graph store.
///
/// All operations are asynchronous. Read operations on absent keys return
/// `None` / empty collections, never an error; writes fail only on
/// backend-internal errors (I/O, connectivity), which propagate unchanged.
///
/// For observable equivalence across backends, [`find_nodes`] and
/// [`get_roots`] return nodes in ascending id order within the label, and
/// [`get_edges`] follows edge insertion order.
///
/// [`find_nodes`]: GraphBackend::find_nodes
/// [`get_roots`]: GraphBackend::get_roots
/// [`get_edges`]: GraphBackend::get_edges
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Prepare the backend for use (open connections, create schema).
    async fn initialize(&self) -> Result<()>;

    /// Release resources. Volatile backends discard all state.
    async fn close(&self) -> Result<()>;

    /// Run `work` to completion with at-most-once semantics. Backends
    /// without real transactions pass the work through unchanged.
    async fn with_transaction(&self, work: TxWork) -> Result<()>;

    /// Insert a node. Overwriting an existing `(label, id)` is not
    /// prevented here; the domain layer uses unique ids for append-only
    /// labels and [`merge_node`](GraphBackend::merge_node) for idempotent
    /// ones.
    async fn create_node(&self, node: Node) -> Result<()>;

    /// Shallow-merge `properties` onto an existing `(label, id)` — new
    /// keys added, existing keys overwritten, untouched keys preserved —
    /// or insert if absent.
    async fn merge_node(&self, label: Label, id: &str, properties: Properties) -> Result<()>;

    /// Append an edge, even if a structurally identical one exists.
    async fn create_edge(&self, edge: Edge) -> Result<()>;

    /// Shallow-merge properties onto the edge with the same
    /// `(type, from, to)`, or create it.
    async fn merge_edge(&self, edge: Edge) -> Result<()>;

    /// `property += delta` on the matching edge (missing or non-numeric
    /// treated as 0); creates the edge carrying `{property: delta}` when
    /// no edge matches.
    async fn increment_edge_property(
        &self,
        edge_type: EdgeType,
        from: &str,
        to: &str,
        property: &str,
        delta: i64,
    ) -> Result<()>;

    async fn get_node(&self, label: Label, id: &str) -> Result<Option<Node>>;

    /// All nodes under `label`, optionally restricted to those whose
    /// properties exactly match every entry of `filter`.
    async fn find_nodes(&self, label: Label, filter: Option<&Properties>) -> Result<Vec<Node>>;

    /// Targets of outgoing `edge_type` edges from the parent, resolved
    /// under `child_label`. Dangling targets are skipped.
    async fn get_children(
        &self,
        parent_label: Label,
        parent_id: &str,
        edge_type: EdgeType,
        child_label: Label,
    ) -> Result<Vec<Node>>;

    /// Nodes of `label` with no incoming edge of `incoming`.
    async fn get_roots(&self, label: Label, incoming: EdgeType) -> Result<Vec<Node>>;

    async fn get_edges(
        &self,
        node_id: &str,
        edge_type: EdgeType,
        direction: Direction,
    ) -> Result<Vec<Edge>>;

    async fn node_count(&self, label: Option<Label>) -> Result<u64>;

    async fn edge_count(&self, edge_type: Option<EdgeType>) -> Result<u64>;

    /// Aggregate over one target node: `count` is the number of distinct
    /// existing `source_label` nodes with an `edge_type` edge into the
    /// target, while `max`/`avg`/`sum` are computed over the `depth`
    /// property of all explorations joined to the target via incoming
    /// `IN_TOPIC` edges. Mixing source counts with leaf depths in one
    /// query is intentional; it is the shape of the topic-stats domain
    /// query.
    async fn aggregate_over_edge(
        &self,
        target_label: Label,
        target_id: &str,
        edge_type: EdgeType,
        source_label: Label,
        metrics: &[Metric],
    ) -> Result<MetricValues>;

    /// Grouped form of the aggregate: for every child of the parent via
    /// `parent_to_child`, `count_distinct` counts incoming `EXPLORED`
    /// edges on the child and `max`/`avg` run over the `depth` property
    /// of `leaf_label` nodes joined via incoming `child_to_leaf` edges.
    /// Returns child id → metric values.
    async fn aggregate_grouped(
        &self,
        parent_label: Label,
        parent_id: &str,
        parent_to_child: EdgeType,
        child_label: Label,
        child_to_leaf: EdgeType,
        leaf_label: Label,
        metrics: &[Metric],
    ) -> Result<BTreeMap<String, MetricValues>>;

    /// Depth-first enumeration of acyclic simple paths from `start_id`
    /// along `edge_type` edges in `direction`. The visited set is global
    /// across sibling branches, so each reachable node appears in at most
    /// one returned path; the result is the branch decomposition the
    /// lineage query wants, not the full combinatorial path set.
    /// `max_depth` bounds the number of edges per path.
    async fn traverse(
        &self,
        start_id: &str,
        edge_type: EdgeType,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> Result<Vec<TraversalPath>>;

    /// Fewest-edge path between two nodes, treating `edge_type` edges as
    /// undirected. The start node is not a path to itself; a returned
    /// path has at least one edge.
    async fn shortest_path(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: EdgeType,
    ) -> Result<Option<TraversalPath>>;
}

////////////////////////////////////////////////////////////////////////////////
// Shared helpers

/// Shallow merge: every entry of `incoming` lands in `target`, overwriting
/// on key collision and leaving other keys untouched.
pub(crate) fn merge_properties(target: &mut Properties, incoming: Properties) {
    for (key, value) in incoming {
        target.insert(key, value);
    }
}

/// True when every `filter` entry is present in `properties` with an equal
/// value.
pub(crate) fn matches_filter(properties: &Properties, filter: &Properties) -> bool {
    filter
        .iter()
        .all(|(key, expected)| properties.get(key) == Some(expected))
}

/// Round to 2 decimal places, the contract of the `avg` metric.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compute the requested metrics from a distinct-source count and the
/// collected leaf depths. Shared by both backends so they agree bit for
/// bit.
pub(crate) fn metric_values(
    metrics: &[Metric],
    source_count: usize,
    edge_count: usize,
    depths: &[i64],
) -> MetricValues {
    let mut out = MetricValues::new();
    for metric in metrics {
        let value = match metric {
            Metric::Count => source_count as f64,
            Metric::CountDistinct => edge_count as f64,
            Metric::Max => depths.iter().copied().max().unwrap_or(0) as f64,
            Metric::Avg => {
                if depths.is_empty() {
                    0.0
                } else {
                    round2(depths.iter().sum::<i64>() as f64 / depths.len() as f64)
                }
            }
            Metric::Sum => depths.iter().sum::<i64>() as f64,
        };
        out.insert(metric.key().to_string(), value);
    }
    out
}

/// Extract an integer depth from a property map, if present and numeric.
pub(crate) fn depth_of(properties: &Properties) -> Option<i64> {
    properties.get("depth").and_then(|v| v.as_i64())
}
