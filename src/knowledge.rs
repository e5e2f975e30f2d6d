//! Knowledge graph domain layer.
//!
//! A stateless façade bound to one backend and one actor address. Every
//! mutating method follows the same three-step protocol: upsert the domain
//! nodes and edges, write any secondary structural edges, then append one
//! transaction log entry. There is no locking — the domain is
//! single-writer by design, and concurrent writers must be serialized
//! externally.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::{Direction, Edge, EdgeType, GraphBackend, Label, Metric, Node, Properties};
use crate::hash::hash_content;
use crate::pushid::PushIdGenerator;

/// Everything an author supplies when exploring a topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExploreInput {
    pub topic_path: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub depth: i64,
    /// Comma-separated tag string; tags of the form `builds-on:<id>`
    /// become citation edges.
    pub tags: String,
    pub price: Option<f64>,
    pub gateway_url: Option<String>,
}

/// Per-topic statistics: how many distinct users explored it, and the
/// depth profile of its explorations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicStats {
    pub explorer_count: u64,
    pub max_depth: i64,
    pub avg_depth: f64,
}

/// What `take_snapshot` froze: graph size and transaction count as they
/// stood immediately before the snapshot node itself was inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub node_count: u64,
    pub rel_count: u64,
    pub tx_count: u64,
}

/// Result of a content integrity sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub total: u64,
    pub valid: u64,
    pub invalid: Vec<String>,
}

/// Content handed back by `access`. Gated explorations yield an empty
/// string; `paid` is always false here — payment, if any, happens outside
/// the graph layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessGrant {
    pub content: String,
    pub paid: bool,
}

/// Domain façade over a [`GraphBackend`].
pub struct KnowledgeGraph<B: GraphBackend> {
    backend: B,
    address: String,
    ids: PushIdGenerator,
}

impl<B: GraphBackend> KnowledgeGraph<B> {
    /// Bind a backend to an actor address. The address is the caller's
    /// identity as supplied by the wallet layer; the graph neither signs
    /// nor verifies it.
    pub fn new(backend: B, address: impl Into<String>) -> Self {
        Self {
            backend,
            address: address.into(),
            ids: PushIdGenerator::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    ////////////////////////////////////////////////////////////////////////
    // Writes

    /// Register (or re-register) a topic under its slash-separated path.
    ///
    /// Merge semantics: a second registration by any actor overwrites
    /// `title`, `description`, `created_at`, and `created_by`. For a
    /// nested path the `PARENT_OF` edge is written, but the parent topic
    /// node is not auto-created — register ancestors first.
    pub async fn register_topic(&self, path: &str, title: &str, description: &str) -> Result<()> {
        let now = now_ms();
        self.backend
            .merge_node(
                Label::Topic,
                path,
                object(json!({
                    "path": path,
                    "title": title,
                    "description": description,
                    "created_at": now,
                    "created_by": self.address,
                })),
            )
            .await?;

        if let Some(separator) = path.rfind('/') {
            let parent = &path[..separator];
            self.backend
                .merge_edge(Edge::new(EdgeType::ParentOf, parent, path))
                .await?;
        }

        self.append_tx_log("registerTopic", path, "Topic", now).await?;
        debug!(actor = %self.address, path, "registered topic");
        Ok(())
    }

    /// Append an exploration of a topic and return its generated id.
    ///
    /// Append-only: calling this twice with identical input creates two
    /// distinct explorations. When both `price` and `gateway_url` are set
    /// the exploration is gated — the content is withheld (stored as
    /// null) while `content_hash` still commits to the supplied content.
    pub async fn explore(&self, input: ExploreInput) -> Result<String> {
        let now = now_ms();
        let entry_id = self.ids.generate();
        let is_gated = input.price.is_some() && input.gateway_url.is_some();
        let content_hash = hash_content(&input.content);

        self.backend
            .merge_node(
                Label::User,
                &self.address,
                object(json!({ "address": self.address })),
            )
            .await?;

        let stored_content = if is_gated {
            Value::Null
        } else {
            Value::String(input.content.clone())
        };
        self.backend
            .create_node(Node::new(
                Label::Exploration,
                entry_id.clone(),
                object(json!({
                    "topic_path": input.topic_path,
                    "title": input.title,
                    "content": stored_content,
                    "summary": input.summary,
                    "depth": input.depth,
                    "tags": input.tags,
                    "price": input.price,
                    "gateway_url": input.gateway_url,
                    "content_hash": content_hash,
                    "created_at": now,
                    "updated_at": now,
                })),
            ))
            .await?;

        self.backend
            .create_edge(Edge::new(EdgeType::Created, &self.address, &entry_id))
            .await?;
        self.backend
            .create_edge(Edge::new(EdgeType::InTopic, &entry_id, &input.topic_path))
            .await?;
        self.backend
            .increment_edge_property(
                EdgeType::Explored,
                &self.address,
                &input.topic_path,
                "count",
                1,
            )
            .await?;

        for parent_id in parse_builds_on(&input.tags) {
            // The cited exploration may not exist; the graph tolerates
            // the dangling edge.
            self.backend
                .create_edge(Edge::new(EdgeType::BuildsOn, &entry_id, parent_id))
                .await?;
        }

        self.append_tx_log("explore", &entry_id, "Exploration", now).await?;
        debug!(
            actor = %self.address,
            topic = %input.topic_path,
            entry = %entry_id,
            gated = is_gated,
            "explored topic"
        );
        Ok(entry_id)
    }

    /// Record access to an exploration and return its content.
    ///
    /// The graph layer records a free access; settling payment against
    /// `gateway_url` is the caller's job. Gated content comes back empty.
    pub async fn access(
        &self,
        owner_address: &str,
        topic_path: &str,
        entry_id: &str,
    ) -> Result<AccessGrant> {
        let node = self
            .backend
            .get_node(Label::Exploration, entry_id)
            .await?
            .ok_or_else(|| GraphError::NotFound(format!("Exploration {entry_id}")))?;

        self.backend
            .merge_edge(
                Edge::new(EdgeType::PaidFor, &self.address, entry_id).with_properties(object(
                    json!({
                        "amount": "0",
                        "currency": "FREE",
                        "tx_hash": "",
                        "accessed_at": now_ms(),
                    }),
                )),
            )
            .await?;

        let content = node
            .properties
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        debug!(
            actor = %self.address,
            owner = owner_address,
            topic = topic_path,
            entry = entry_id,
            "recorded access"
        );
        Ok(AccessGrant { content, paid: false })
    }

    ////////////////////////////////////////////////////////////////////////
    // Reads

    /// Topics with no parent.
    pub async fn list_topics(&self) -> Result<Vec<Node>> {
        self.backend.get_roots(Label::Topic, EdgeType::ParentOf).await
    }

    /// Direct children of a topic.
    pub async fn list_subtopics(&self, path: &str) -> Result<Vec<Node>> {
        self.backend
            .get_children(Label::Topic, path, EdgeType::ParentOf, Label::Topic)
            .await
    }

    pub async fn get_topic_info(&self, path: &str) -> Result<Option<Node>> {
        self.backend.get_node(Label::Topic, path).await
    }

    /// Explorations a user created in one topic, keyed by entry id.
    /// `None` when the user has created nothing at all.
    pub async fn get_explorations(
        &self,
        address: &str,
        topic_path: &str,
    ) -> Result<Option<BTreeMap<String, Node>>> {
        let created = self
            .backend
            .get_edges(address, EdgeType::Created, Direction::Out)
            .await?;
        if created.is_empty() {
            return Ok(None);
        }
        let mut entries = BTreeMap::new();
        for edge in created {
            let Some(node) = self.backend.get_node(Label::Exploration, &edge.to).await? else {
                continue;
            };
            if node.properties.get("topic_path").and_then(Value::as_str) == Some(topic_path) {
                entries.insert(node.id.clone(), node);
            }
        }
        Ok(Some(entries))
    }

    /// Every exploration a user created, grouped by topic path with `/`
    /// flattened to `|` in the group keys. `None` when the user has
    /// created nothing.
    pub async fn get_explorations_by_user(
        &self,
        address: &str,
    ) -> Result<Option<BTreeMap<String, BTreeMap<String, Node>>>> {
        let created = self
            .backend
            .get_edges(address, EdgeType::Created, Direction::Out)
            .await?;
        if created.is_empty() {
            return Ok(None);
        }
        let mut grouped: BTreeMap<String, BTreeMap<String, Node>> = BTreeMap::new();
        for edge in created {
            let Some(node) = self.backend.get_node(Label::Exploration, &edge.to).await? else {
                continue;
            };
            let topic = node
                .properties
                .get("topic_path")
                .and_then(Value::as_str)
                .unwrap_or("")
                .replace('/', "|");
            grouped.entry(topic).or_default().insert(node.id.clone(), node);
        }
        Ok(Some(grouped))
    }

    /// Users with an `EXPLORED` edge into the topic.
    pub async fn get_explorers(&self, topic_path: &str) -> Result<Vec<Node>> {
        let edges = self
            .backend
            .get_edges(topic_path, EdgeType::Explored, Direction::In)
            .await?;
        let mut users = Vec::new();
        for edge in edges {
            if let Some(user) = self.backend.get_node(Label::User, &edge.from).await? {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Explorer count and depth statistics for one topic.
    pub async fn get_topic_stats(&self, topic_path: &str) -> Result<TopicStats> {
        let values = self
            .backend
            .aggregate_over_edge(
                Label::Topic,
                topic_path,
                EdgeType::Explored,
                Label::User,
                &[Metric::Count, Metric::Max, Metric::Avg],
            )
            .await?;
        Ok(TopicStats {
            explorer_count: values.get("count").copied().unwrap_or(0.0) as u64,
            max_depth: values.get("max").copied().unwrap_or(0.0) as i64,
            avg_depth: values.get("avg").copied().unwrap_or(0.0),
        })
    }

    /// Per-child statistics under a parent topic, or per-root statistics
    /// for the whole graph when no parent is given.
    pub async fn get_frontier_map(
        &self,
        parent: Option<&str>,
    ) -> Result<BTreeMap<String, TopicStats>> {
        match parent {
            Some(parent) => {
                let grouped = self
                    .backend
                    .aggregate_grouped(
                        Label::Topic,
                        parent,
                        EdgeType::ParentOf,
                        Label::Topic,
                        EdgeType::InTopic,
                        Label::Exploration,
                        &[Metric::CountDistinct, Metric::Max, Metric::Avg],
                    )
                    .await?;
                Ok(grouped
                    .into_iter()
                    .map(|(child, values)| {
                        (
                            child,
                            TopicStats {
                                explorer_count: values
                                    .get("count_distinct")
                                    .copied()
                                    .unwrap_or(0.0) as u64,
                                max_depth: values.get("max").copied().unwrap_or(0.0) as i64,
                                avg_depth: values.get("avg").copied().unwrap_or(0.0),
                            },
                        )
                    })
                    .collect())
            }
            None => {
                let mut frontier = BTreeMap::new();
                for root in self.list_topics().await? {
                    let stats = self.get_topic_stats(&root.id).await?;
                    frontier.insert(root.id, stats);
                }
                Ok(frontier)
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Traversal queries

    /// The citation chain an exploration builds on: the single longest
    /// `BUILDS_ON` path starting at `id`, the start included. When the
    /// citations form a DAG, alternative ancestor chains are dropped.
    pub async fn get_lineage(&self, id: &str) -> Result<Vec<Node>> {
        let paths = self
            .backend
            .traverse(id, EdgeType::BuildsOn, Direction::Out, None)
            .await?;
        let mut longest: Option<Vec<Node>> = None;
        for path in paths {
            if longest.as_ref().map_or(true, |best| path.nodes.len() > best.len()) {
                longest = Some(path.nodes);
            }
        }
        Ok(longest.unwrap_or_default())
    }

    /// Every exploration that transitively builds on `id`, in first-seen
    /// order, the start excluded.
    pub async fn get_descendants(&self, id: &str) -> Result<Vec<Node>> {
        let paths = self
            .backend
            .traverse(id, EdgeType::BuildsOn, Direction::In, None)
            .await?;
        let mut seen = HashSet::new();
        let mut descendants = Vec::new();
        for path in paths {
            for node in path.nodes {
                if node.id == id || node.label != Label::Exploration {
                    continue;
                }
                if seen.insert(node.id.clone()) {
                    descendants.push(node);
                }
            }
        }
        Ok(descendants)
    }

    /// Fewest-hop undirected `BUILDS_ON` path between two explorations;
    /// empty when disconnected.
    pub async fn get_shortest_path(&self, from_id: &str, to_id: &str) -> Result<Vec<Node>> {
        let path = self
            .backend
            .shortest_path(from_id, to_id, EdgeType::BuildsOn)
            .await?;
        Ok(path.map(|p| p.nodes).unwrap_or_default())
    }

    ////////////////////////////////////////////////////////////////////////
    // Snapshot, log, integrity

    /// Freeze point-in-time accounting: node, edge, and transaction
    /// counts as they stand right now, then a Snapshot node with an
    /// `INCLUDES` edge to every existing transaction log entry. The
    /// snapshot node and its edges are not counted in the snapshot
    /// itself.
    pub async fn take_snapshot(&self) -> Result<SnapshotInfo> {
        let node_count = self.backend.node_count(None).await?;
        let rel_count = self.backend.edge_count(None).await?;
        let tx_logs = self.backend.find_nodes(Label::TxLog, None).await?;
        let tx_count = tx_logs.len() as u64;

        let id = self.ids.generate();
        self.backend
            .create_node(Node::new(
                Label::Snapshot,
                id.clone(),
                object(json!({
                    "created_at": now_ms(),
                    "node_count": node_count,
                    "rel_count": rel_count,
                    "tx_count": tx_count,
                })),
            ))
            .await?;
        for tx in &tx_logs {
            self.backend
                .create_edge(Edge::new(EdgeType::Includes, &id, &tx.id))
                .await?;
        }

        debug!(snapshot = %id, node_count, rel_count, tx_count, "took snapshot");
        Ok(SnapshotInfo {
            id,
            node_count,
            rel_count,
            tx_count,
        })
    }

    /// Transaction log entries, ascending by timestamp (entry id as the
    /// stable tiebreak), optionally bounded below by `since` and in size
    /// by `limit`.
    pub async fn get_tx_log(&self, since: Option<i64>, limit: Option<usize>) -> Result<Vec<Node>> {
        let mut entries = self.backend.find_nodes(Label::TxLog, None).await?;
        if let Some(since) = since {
            entries.retain(|entry| timestamp_of(entry) >= since);
        }
        entries.sort_by_key(timestamp_of);
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Recompute every exploration's content hash and compare against the
    /// stored commitment. Gated explorations (null content) and entries
    /// without a stored hash cannot be checked in isolation and count as
    /// valid.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let explorations = self.backend.find_nodes(Label::Exploration, None).await?;
        let total = explorations.len() as u64;
        let mut invalid = Vec::new();
        for node in &explorations {
            let content = node.properties.get("content").and_then(Value::as_str);
            let stored_hash = node.properties.get("content_hash").and_then(Value::as_str);
            if let (Some(content), Some(stored_hash)) = (content, stored_hash) {
                if hash_content(content) != stored_hash {
                    invalid.push(node.id.clone());
                }
            }
        }
        Ok(IntegrityReport {
            total,
            valid: total - invalid.len() as u64,
            invalid,
        })
    }

    async fn append_tx_log(
        &self,
        op: &str,
        target_id: &str,
        target_type: &str,
        timestamp: i64,
    ) -> Result<()> {
        self.backend
            .create_node(Node::new(
                Label::TxLog,
                self.ids.generate(),
                object(json!({
                    "op": op,
                    "actor": self.address,
                    "target_id": target_id,
                    "target_type": target_type,
                    "timestamp": timestamp,
                })),
            ))
            .await
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn timestamp_of(entry: &Node) -> i64 {
    entry
        .properties
        .get("timestamp")
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Tags of the form `builds-on:<id>`, split out of the comma-separated
/// tag string. Anything malformed is skipped without comment.
fn parse_builds_on(tags: &str) -> Vec<&str> {
    tags.split(',')
        .map(str::trim)
        .filter_map(|tag| tag.strip_prefix("builds-on:"))
        .filter(|parent| !parent.is_empty())
        .collect()
}

/// Unwrap a `json!` object literal into a property map.
fn object(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => Properties::new(),
    }
}
