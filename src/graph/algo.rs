//! Pure traversal algorithms shared by the backends.
//!
//! Both backends gather the relevant edges and the set of existing node
//! ids, then delegate here, so the observable path shapes are identical no
//! matter which store produced them. Paths never extend through a node id
//! that does not exist — the graph tolerates dangling edges, traversal
//! just stops in front of them.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{Direction, Edge};

/// A path as raw node ids plus the edges connecting them, before the
/// backend resolves ids to full nodes.
pub(crate) type IdPath = (Vec<String>, Vec<Edge>);

/// Depth-first enumeration of acyclic simple paths from `start`.
///
/// The visited set is shared across sibling branches: once a node has been
/// claimed by one branch, no other branch re-enters it, so each reachable
/// node appears in at most one returned path. A path is recorded whenever
/// it cannot be extended (dead end, all neighbors claimed, or `max_depth`
/// edges reached). A start with no usable neighbors yields one
/// single-node path; a nonexistent start yields none.
pub(crate) fn collect_paths(
    edges: &[Edge],
    exists: &HashSet<String>,
    start: &str,
    direction: Direction,
    max_depth: Option<usize>,
) -> Vec<IdPath> {
    if !exists.contains(start) {
        return Vec::new();
    }

    let mut adjacency: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in edges {
        let origin = match direction {
            Direction::Out => edge.from.as_str(),
            Direction::In => edge.to.as_str(),
        };
        adjacency.entry(origin).or_default().push(edge);
    }

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());
    let mut node_stack = vec![start.to_string()];
    let mut edge_stack: Vec<Edge> = Vec::new();
    let mut paths = Vec::new();

    dfs(
        start,
        direction,
        max_depth,
        &adjacency,
        exists,
        &mut visited,
        &mut node_stack,
        &mut edge_stack,
        &mut paths,
    );
    paths
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    current: &str,
    direction: Direction,
    max_depth: Option<usize>,
    adjacency: &HashMap<&str, Vec<&Edge>>,
    exists: &HashSet<String>,
    visited: &mut HashSet<String>,
    node_stack: &mut Vec<String>,
    edge_stack: &mut Vec<Edge>,
    paths: &mut Vec<IdPath>,
) {
    let at_cap = max_depth.is_some_and(|d| edge_stack.len() >= d);
    let mut extended = false;

    if !at_cap {
        if let Some(neighbors) = adjacency.get(current) {
            for edge in neighbors {
                let next = edge.endpoint(direction).to_string();
                // Re-checked here: an earlier sibling's subtree may have
                // claimed this node since the loop started.
                if !exists.contains(&next) || visited.contains(&next) {
                    continue;
                }
                visited.insert(next.clone());
                node_stack.push(next.clone());
                edge_stack.push((*edge).clone());
                extended = true;
                dfs(
                    &next, direction, max_depth, adjacency, exists, visited, node_stack,
                    edge_stack, paths,
                );
                node_stack.pop();
                edge_stack.pop();
            }
        }
    }

    if !extended {
        paths.push((node_stack.clone(), edge_stack.clone()));
    }
}

/// Breadth-first fewest-edge path between `from` and `to`, treating every
/// edge as undirected. Neighbor expansion follows edge insertion order, so
/// ties resolve identically on every backend. The start node is not a path
/// to itself.
pub(crate) fn shortest_path(
    edges: &[Edge],
    exists: &HashSet<String>,
    from: &str,
    to: &str,
) -> Option<IdPath> {
    if from == to || !exists.contains(from) || !exists.contains(to) {
        return None;
    }

    let mut adjacency: HashMap<&str, Vec<(&str, &Edge)>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push((edge.to.as_str(), edge));
        adjacency
            .entry(edge.to.as_str())
            .or_default()
            .push((edge.from.as_str(), edge));
    }

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(from);
    let mut predecessor: HashMap<&str, (&str, &Edge)> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        let Some(neighbors) = adjacency.get(current) else {
            continue;
        };
        for &(next, edge) in neighbors {
            if !exists.contains(next) || visited.contains(next) {
                continue;
            }
            visited.insert(next);
            predecessor.insert(next, (current, edge));
            if next == to {
                return Some(reconstruct(&predecessor, from, to));
            }
            queue.push_back(next);
        }
    }
    None
}

fn reconstruct(predecessor: &HashMap<&str, (&str, &Edge)>, from: &str, to: &str) -> IdPath {
    let mut node_ids = vec![to.to_string()];
    let mut edges = Vec::new();
    let mut current = to;
    while current != from {
        let (prev, edge) = predecessor[current];
        edges.push((*edge).clone());
        node_ids.push(prev.to_string());
        current = prev;
    }
    node_ids.reverse();
    edges.reverse();
    (node_ids, edges)
}
