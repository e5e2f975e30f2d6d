//! Reference in-memory backend.
//!
//! Three structures: a primary node map keyed `(label, id)`, an
//! insertion-ordered edge list, and an edge index keyed
//! `"out:{from}:{type}"` / `"in:{to}:{type}"` for O(1) neighbor lookup,
//! maintained on every edge insertion. The node map is ordered, so
//! per-label scans come back in ascending id order. Volatile: `close`
//! discards everything. Stored records are owned copies and reads clone
//! out, so callers can never mutate backend state through a retained
//! reference.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    algo, depth_of, matches_filter, merge_properties, metric_values, Direction, Edge, EdgeType,
    GraphBackend, Label, Metric, MetricValues, Node, Properties, TraversalPath, TxWork,
};
use crate::error::Result;

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<(Label, String), Node>,
    edges: Vec<Edge>,
    edge_index: HashMap<String, Vec<usize>>,
}

impl MemoryState {
    fn index_edge(&mut self, position: usize) {
        let edge = &self.edges[position];
        let out_key = index_key(Direction::Out, &edge.from, edge.edge_type);
        let in_key = index_key(Direction::In, &edge.to, edge.edge_type);
        self.edge_index.entry(out_key).or_default().push(position);
        self.edge_index.entry(in_key).or_default().push(position);
    }

    /// Position of the first edge matching `(type, from, to)`, the merge key.
    fn find_edge(&self, edge_type: EdgeType, from: &str, to: &str) -> Option<usize> {
        let key = index_key(Direction::Out, from, edge_type);
        self.edge_index
            .get(&key)?
            .iter()
            .copied()
            .find(|&i| self.edges[i].to == to)
    }

    fn edges_at(&self, node_id: &str, edge_type: EdgeType, direction: Direction) -> Vec<&Edge> {
        let key = index_key(direction, node_id, edge_type);
        self.edge_index
            .get(&key)
            .map(|positions| positions.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    fn nodes_with_label(&self, label: Label) -> impl Iterator<Item = &Node> {
        self.nodes
            .range((label, String::new())..)
            .take_while(move |((l, _), _)| *l == label)
            .map(|(_, node)| node)
    }

    fn edges_of_type(&self, edge_type: EdgeType) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|e| e.edge_type == edge_type)
            .cloned()
            .collect()
    }

    fn existing_ids(&self) -> HashSet<String> {
        self.nodes.keys().map(|(_, id)| id.clone()).collect()
    }

    fn node_by_id(&self, id: &str) -> Option<&Node> {
        // Ids are globally unique across labels in practice; take the
        // first match.
        self.nodes.iter().find(|((_, nid), _)| nid == id).map(|(_, n)| n)
    }

    fn resolve_path(&self, node_ids: Vec<String>, edges: Vec<Edge>) -> TraversalPath {
        let nodes = node_ids
            .iter()
            .filter_map(|id| self.node_by_id(id).cloned())
            .collect();
        TraversalPath { nodes, edges }
    }

    /// Distinct-source count, incoming edge count, and leaf depths for one
    /// target node: the three ingredients of the aggregate queries.
    fn aggregate_inputs(
        &self,
        target_id: &str,
        edge_type: EdgeType,
        source_label: Label,
        leaf_edge: EdgeType,
        leaf_label: Label,
    ) -> (usize, usize, Vec<i64>) {
        let incoming = self.edges_at(target_id, edge_type, Direction::In);
        let edge_count = incoming.len();
        let sources: HashSet<&str> = incoming
            .iter()
            .filter(|e| self.nodes.contains_key(&(source_label, e.from.clone())))
            .map(|e| e.from.as_str())
            .collect();
        let depths: Vec<i64> = self
            .edges_at(target_id, leaf_edge, Direction::In)
            .iter()
            .filter_map(|e| self.nodes.get(&(leaf_label, e.from.clone())))
            .filter_map(|leaf| depth_of(&leaf.properties))
            .collect();
        (sources.len(), edge_count, depths)
    }
}

fn index_key(direction: Direction, node_id: &str, edge_type: EdgeType) -> String {
    match direction {
        Direction::Out => format!("out:{node_id}:{edge_type}"),
        Direction::In => format!("in:{node_id}:{edge_type}"),
    }
}

/// Volatile reference backend.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphBackend for MemoryBackend {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.nodes.clear();
        state.edges.clear();
        state.edge_index.clear();
        Ok(())
    }

    async fn with_transaction(&self, work: TxWork) -> Result<()> {
        // No multi-statement atomicity to offer: run the work once.
        work().await
    }

    async fn create_node(&self, node: Node) -> Result<()> {
        let mut state = self.state.write().await;
        state.nodes.insert((node.label, node.id.clone()), node);
        Ok(())
    }

    async fn merge_node(&self, label: Label, id: &str, properties: Properties) -> Result<()> {
        let mut state = self.state.write().await;
        match state.nodes.get_mut(&(label, id.to_string())) {
            Some(existing) => merge_properties(&mut existing.properties, properties),
            None => {
                state
                    .nodes
                    .insert((label, id.to_string()), Node::new(label, id, properties));
            }
        }
        Ok(())
    }

    async fn create_edge(&self, edge: Edge) -> Result<()> {
        let mut state = self.state.write().await;
        state.edges.push(edge);
        let position = state.edges.len() - 1;
        state.index_edge(position);
        Ok(())
    }

    async fn merge_edge(&self, edge: Edge) -> Result<()> {
        let mut state = self.state.write().await;
        match state.find_edge(edge.edge_type, &edge.from, &edge.to) {
            Some(position) => {
                merge_properties(&mut state.edges[position].properties, edge.properties);
            }
            None => {
                state.edges.push(edge);
                let position = state.edges.len() - 1;
                state.index_edge(position);
            }
        }
        Ok(())
    }

    async fn increment_edge_property(
        &self,
        edge_type: EdgeType,
        from: &str,
        to: &str,
        property: &str,
        delta: i64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        match state.find_edge(edge_type, from, to) {
            Some(position) => {
                let props = &mut state.edges[position].properties;
                let current = props.get(property).and_then(|v| v.as_i64()).unwrap_or(0);
                props.insert(property.to_string(), (current + delta).into());
            }
            None => {
                let mut props = Properties::new();
                props.insert(property.to_string(), delta.into());
                state
                    .edges
                    .push(Edge::new(edge_type, from, to).with_properties(props));
                let position = state.edges.len() - 1;
                state.index_edge(position);
            }
        }
        Ok(())
    }

    async fn get_node(&self, label: Label, id: &str) -> Result<Option<Node>> {
        let state = self.state.read().await;
        Ok(state.nodes.get(&(label, id.to_string())).cloned())
    }

    async fn find_nodes(&self, label: Label, filter: Option<&Properties>) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(state
            .nodes_with_label(label)
            .filter(|node| filter.map_or(true, |f| matches_filter(&node.properties, f)))
            .cloned()
            .collect())
    }

    async fn get_children(
        &self,
        _parent_label: Label,
        parent_id: &str,
        edge_type: EdgeType,
        child_label: Label,
    ) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(state
            .edges_at(parent_id, edge_type, Direction::Out)
            .iter()
            .filter_map(|e| state.nodes.get(&(child_label, e.to.clone())))
            .cloned()
            .collect())
    }

    async fn get_roots(&self, label: Label, incoming: EdgeType) -> Result<Vec<Node>> {
        let state = self.state.read().await;
        Ok(state
            .nodes_with_label(label)
            .filter(|node| state.edges_at(&node.id, incoming, Direction::In).is_empty())
            .cloned()
            .collect())
    }

    async fn get_edges(
        &self,
        node_id: &str,
        edge_type: EdgeType,
        direction: Direction,
    ) -> Result<Vec<Edge>> {
        let state = self.state.read().await;
        Ok(state
            .edges_at(node_id, edge_type, direction)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn node_count(&self, label: Option<Label>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(match label {
            Some(label) => state.nodes_with_label(label).count() as u64,
            None => state.nodes.len() as u64,
        })
    }

    async fn edge_count(&self, edge_type: Option<EdgeType>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(match edge_type {
            Some(edge_type) => state
                .edges
                .iter()
                .filter(|e| e.edge_type == edge_type)
                .count() as u64,
            None => state.edges.len() as u64,
        })
    }

    async fn aggregate_over_edge(
        &self,
        _target_label: Label,
        target_id: &str,
        edge_type: EdgeType,
        source_label: Label,
        metrics: &[Metric],
    ) -> Result<MetricValues> {
        let state = self.state.read().await;
        let (sources, edge_count, depths) = state.aggregate_inputs(
            target_id,
            edge_type,
            source_label,
            EdgeType::InTopic,
            Label::Exploration,
        );
        Ok(metric_values(metrics, sources, edge_count, &depths))
    }

    async fn aggregate_grouped(
        &self,
        _parent_label: Label,
        parent_id: &str,
        parent_to_child: EdgeType,
        child_label: Label,
        child_to_leaf: EdgeType,
        leaf_label: Label,
        metrics: &[Metric],
    ) -> Result<BTreeMap<String, MetricValues>> {
        let state = self.state.read().await;
        let mut grouped = BTreeMap::new();
        for edge in state.edges_at(parent_id, parent_to_child, Direction::Out) {
            let Some(child) = state.nodes.get(&(child_label, edge.to.clone())) else {
                continue;
            };
            let (sources, edge_count, depths) = state.aggregate_inputs(
                &child.id,
                EdgeType::Explored,
                Label::User,
                child_to_leaf,
                leaf_label,
            );
            grouped.insert(
                child.id.clone(),
                metric_values(metrics, sources, edge_count, &depths),
            );
        }
        Ok(grouped)
    }

    async fn traverse(
        &self,
        start_id: &str,
        edge_type: EdgeType,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> Result<Vec<TraversalPath>> {
        let state = self.state.read().await;
        let edges = state.edges_of_type(edge_type);
        let exists = state.existing_ids();
        Ok(algo::collect_paths(&edges, &exists, start_id, direction, max_depth)
            .into_iter()
            .map(|(node_ids, path_edges)| state.resolve_path(node_ids, path_edges))
            .collect())
    }

    async fn shortest_path(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: EdgeType,
    ) -> Result<Option<TraversalPath>> {
        let state = self.state.read().await;
        let edges = state.edges_of_type(edge_type);
        let exists = state.existing_ids();
        Ok(algo::shortest_path(&edges, &exists, from_id, to_id)
            .map(|(node_ids, path_edges)| state.resolve_path(node_ids, path_edges)))
    }
}
