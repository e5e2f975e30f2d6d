//! End-to-end domain scenarios against the in-memory reference backend.

use knowledge_graph::{
    Direction, EdgeType, ExploreInput, GraphBackend, KnowledgeGraph, Label, MemoryBackend,
};
use serde_json::{json, Value};

fn graph() -> KnowledgeGraph<MemoryBackend> {
    KnowledgeGraph::new(MemoryBackend::new(), "0xTestUser")
}

fn entry(topic: &str, title: &str, content: &str, depth: i64, tags: &str) -> ExploreInput {
    ExploreInput {
        topic_path: topic.into(),
        title: title.into(),
        content: content.into(),
        summary: format!("Summary of {title}"),
        depth,
        tags: tags.into(),
        price: None,
        gateway_url: None,
    }
}

fn titles(nodes: &[knowledge_graph::Node]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| {
            n.properties
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_topic_hierarchy() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    graph
        .register_topic("ai/transformers", "Transformers", "Attention architectures")
        .await
        .unwrap();
    graph
        .register_topic("ai/transformers/attention", "Attention", "Attention mechanisms")
        .await
        .unwrap();

    let subtopics = graph.list_subtopics("ai").await.unwrap();
    let paths: Vec<&str> = subtopics.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(paths, vec!["ai/transformers"]);

    let nested = graph.list_subtopics("ai/transformers").await.unwrap();
    let paths: Vec<&str> = nested.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(paths, vec!["ai/transformers/attention"]);

    let roots = graph.list_topics().await.unwrap();
    let paths: Vec<&str> = roots.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(paths, vec!["ai"]);
}

#[tokio::test]
async fn test_exploration_id_and_content_hash() {
    let graph = graph();
    graph
        .register_topic("ai/transformers/attention", "Attention", "Attention mechanisms")
        .await
        .unwrap();
    let entry_id = graph
        .explore(entry(
            "ai/transformers/attention",
            "Paper A",
            "Content for Paper A",
            2,
            "",
        ))
        .await
        .unwrap();

    assert_eq!(entry_id.len(), 20);
    let node = graph
        .backend()
        .get_node(Label::Exploration, &entry_id)
        .await
        .unwrap()
        .unwrap();
    let stored_hash = node
        .properties
        .get("content_hash")
        .and_then(Value::as_str)
        .unwrap();
    assert_eq!(stored_hash.len(), 64);
    assert_eq!(stored_hash, knowledge_graph::hash::hash_content("Content for Paper A"));
}

#[tokio::test]
async fn test_explored_counter_is_monotone() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    graph.explore(entry("ai", "First", "first body", 1, "")).await.unwrap();
    graph.explore(entry("ai", "Second", "second body", 2, "")).await.unwrap();

    let edges = graph
        .backend()
        .get_edges("ai", EdgeType::Explored, Direction::In)
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].properties.get("count"), Some(&json!(2)));
}

#[tokio::test]
async fn test_append_only_duplicate_explorations() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    let first = graph.explore(entry("ai", "Same", "same body", 1, "")).await.unwrap();
    let second = graph.explore(entry("ai", "Same", "same body", 1, "")).await.unwrap();

    assert_ne!(first, second);
    assert!(second > first, "push ids sort in creation order");
    assert_eq!(
        graph.backend().node_count(Some(Label::Exploration)).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_builds_on_lineage_descendants_shortest_path() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();

    let root = graph.explore(entry("ai", "Root Paper", "root body", 1, "")).await.unwrap();
    let child = graph
        .explore(entry("ai", "Child 1", "child body", 2, &format!("builds-on:{root}")))
        .await
        .unwrap();
    let grandchild = graph
        .explore(entry("ai", "Grandchild", "grandchild body", 3, &format!("builds-on:{child}")))
        .await
        .unwrap();
    let isolated = graph.explore(entry("ai", "Isolated", "alone", 1, "")).await.unwrap();

    let lineage = graph.get_lineage(&grandchild).await.unwrap();
    let lineage_titles = titles(&lineage);
    assert!(lineage_titles.contains(&"Grandchild".to_string()));
    assert!(lineage_titles.contains(&"Child 1".to_string()));
    assert_eq!(lineage_titles.last().map(String::as_str), Some("Root Paper"));

    let descendants = graph.get_descendants(&root).await.unwrap();
    let mut descendant_titles = titles(&descendants);
    descendant_titles.sort();
    assert_eq!(descendant_titles, vec!["Child 1", "Grandchild"]);

    let path = graph.get_shortest_path(&root, &grandchild).await.unwrap();
    assert!(path.len() >= 3, "two hops span three nodes");
    assert_eq!(path.first().map(|n| n.id.as_str()), Some(root.as_str()));
    assert_eq!(path.last().map(|n| n.id.as_str()), Some(grandchild.as_str()));

    let no_path = graph.get_shortest_path(&root, &isolated).await.unwrap();
    assert!(no_path.is_empty());
}

#[tokio::test]
async fn test_topic_stats() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    for (title, depth) in [("D3", 3), ("D4", 4), ("D5", 5)] {
        graph.explore(entry("ai", title, title, depth, "")).await.unwrap();
    }

    let stats = graph.get_topic_stats("ai").await.unwrap();
    assert_eq!(stats.explorer_count, 1);
    assert_eq!(stats.max_depth, 5);
    assert!((stats.avg_depth - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_frontier_map_under_parent_and_at_roots() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    graph.register_topic("ai/nlp", "NLP", "Language").await.unwrap();
    graph.register_topic("ai/vision", "Vision", "Images").await.unwrap();
    graph.explore(entry("ai/nlp", "Tokens", "token body", 2, "")).await.unwrap();
    graph.explore(entry("ai/nlp", "Parsing", "parse body", 4, "")).await.unwrap();

    let frontier = graph.get_frontier_map(Some("ai")).await.unwrap();
    assert_eq!(frontier.len(), 2);
    let nlp = &frontier["ai/nlp"];
    assert_eq!(nlp.explorer_count, 1);
    assert_eq!(nlp.max_depth, 4);
    assert!((nlp.avg_depth - 3.0).abs() < 1e-9);
    assert_eq!(frontier["ai/vision"].explorer_count, 0);
    assert_eq!(frontier["ai/vision"].max_depth, 0);

    let roots = graph.get_frontier_map(None).await.unwrap();
    assert_eq!(roots.len(), 1);
    // Root-level stats aggregate only explorations attached to the root
    // topic itself, and nothing was explored directly under "ai".
    assert_eq!(roots["ai"].explorer_count, 0);
}

#[tokio::test]
async fn test_snapshot_accounting_and_tx_log_order() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    graph.explore(entry("ai", "One", "one body", 1, "")).await.unwrap();
    graph.explore(entry("ai", "Two", "two body", 2, "")).await.unwrap();

    let backend = graph.backend();
    let pre_nodes = backend.node_count(None).await.unwrap();
    let pre_edges = backend.edge_count(None).await.unwrap();

    let snapshot = graph.take_snapshot().await.unwrap();
    assert_eq!(snapshot.node_count, pre_nodes);
    assert_eq!(snapshot.rel_count, pre_edges);
    assert_eq!(snapshot.tx_count, 3);

    // The snapshot node and its INCLUDES edges land after the counting.
    assert_eq!(backend.node_count(None).await.unwrap(), pre_nodes + 1);
    assert_eq!(backend.edge_count(None).await.unwrap(), pre_edges + snapshot.tx_count);

    let log = graph.get_tx_log(None, None).await.unwrap();
    let ops: Vec<&str> = log
        .iter()
        .map(|n| n.properties.get("op").and_then(Value::as_str).unwrap_or_default())
        .collect();
    assert_eq!(ops, vec!["registerTopic", "explore", "explore"]);

    // Log entry ids are themselves push ids, so they sort in write order.
    let ids: Vec<&str> = log.iter().map(|n| n.id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let limited = graph.get_tx_log(None, Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_verify_integrity_all_valid() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    graph.explore(entry("ai", "One", "one body", 1, "")).await.unwrap();
    graph
        .explore(ExploreInput {
            topic_path: "ai".into(),
            title: "Gated".into(),
            content: "hidden body".into(),
            summary: "".into(),
            depth: 2,
            tags: "".into(),
            price: Some(1.5),
            gateway_url: Some("https://gateway.example".into()),
        })
        .await
        .unwrap();

    let report = graph.verify_integrity().await.unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.valid, 2);
    assert!(report.invalid.is_empty());
}

#[tokio::test]
async fn test_verify_integrity_flags_tampering() {
    let graph = graph();
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    let entry_id = graph.explore(entry("ai", "One", "one body", 1, "")).await.unwrap();

    // Corrupt the stored content behind the domain layer's back.
    let mut tampered = knowledge_graph::Properties::new();
    tampered.insert("content".into(), json!("rewritten body"));
    graph
        .backend()
        .merge_node(Label::Exploration, &entry_id, tampered)
        .await
        .unwrap();

    let report = graph.verify_integrity().await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.valid, 0);
    assert_eq!(report.invalid, vec![entry_id]);
}

#[tokio::test]
async fn test_reregistration_overwrites_topic_metadata() {
    let backend = MemoryBackend::new();
    let first = KnowledgeGraph::new(backend.clone(), "0xFirst");
    let second = KnowledgeGraph::new(backend.clone(), "0xSecond");

    first.register_topic("ai", "AI", "original").await.unwrap();
    second.register_topic("ai", "AI again", "rewritten").await.unwrap();

    let topic = first.get_topic_info("ai").await.unwrap().unwrap();
    assert_eq!(topic.properties.get("title"), Some(&json!("AI again")));
    assert_eq!(topic.properties.get("created_by"), Some(&json!("0xSecond")));
}

#[tokio::test]
async fn test_explorations_lookup_and_grouping() {
    let backend = MemoryBackend::new();
    let graph = KnowledgeGraph::new(backend.clone(), "0xTestUser");
    graph.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    graph.register_topic("ai/nlp", "NLP", "Language").await.unwrap();
    let in_ai = graph.explore(entry("ai", "On AI", "ai body", 1, "")).await.unwrap();
    graph.explore(entry("ai/nlp", "On NLP", "nlp body", 2, "")).await.unwrap();

    let in_topic = graph.get_explorations("0xTestUser", "ai").await.unwrap().unwrap();
    assert_eq!(in_topic.len(), 1);
    assert!(in_topic.contains_key(&in_ai));

    let by_user = graph.get_explorations_by_user("0xTestUser").await.unwrap().unwrap();
    let groups: Vec<&str> = by_user.keys().map(String::as_str).collect();
    assert_eq!(groups, vec!["ai", "ai|nlp"]);

    // A user with no creations reads as absent, not empty.
    let stranger = KnowledgeGraph::new(backend, "0xStranger");
    assert!(stranger.get_explorations("0xStranger", "ai").await.unwrap().is_none());
    assert!(stranger.get_explorations_by_user("0xStranger").await.unwrap().is_none());
}

#[tokio::test]
async fn test_explorers_and_paid_for_edge() {
    let backend = MemoryBackend::new();
    let author = KnowledgeGraph::new(backend.clone(), "0xAuthor");
    let reader = KnowledgeGraph::new(backend.clone(), "0xReader");

    author.register_topic("ai", "AI", "Artificial intelligence").await.unwrap();
    let entry_id = author.explore(entry("ai", "Open", "open body", 1, "")).await.unwrap();

    let grant = reader.access("0xAuthor", "ai", &entry_id).await.unwrap();
    assert_eq!(grant.content, "open body");
    assert!(!grant.paid);

    // Access twice: the PAID_FOR edge merges rather than duplicating.
    reader.access("0xAuthor", "ai", &entry_id).await.unwrap();
    let paid_edges = backend
        .get_edges(&entry_id, EdgeType::PaidFor, Direction::In)
        .await
        .unwrap();
    assert_eq!(paid_edges.len(), 1);
    assert_eq!(paid_edges[0].properties.get("currency"), Some(&json!("FREE")));

    let explorers = author.get_explorers("ai").await.unwrap();
    let addresses: Vec<&str> = explorers.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(addresses, vec!["0xAuthor"]);
}
