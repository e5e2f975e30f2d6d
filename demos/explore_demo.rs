use knowledge_graph::{
    ExploreInput, GraphBackend, GraphError, KnowledgeGraph, MemoryBackend, SqliteBackend,
};

fn paper(topic: &str, title: &str, content: &str, depth: i64, tags: &str) -> ExploreInput {
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

#[tokio::main]
async fn main() -> Result<(), GraphError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "knowledge_graph=debug".into()),
        )
        .init();

    println!("📚 Knowledge Graph Example");
    println!("==========================");

    let graph = KnowledgeGraph::new(MemoryBackend::new(), "0xAuthor");

    println!("\n📍 Registering topic hierarchy...");
    graph.register_topic("ai", "AI", "Artificial intelligence").await?;
    graph
        .register_topic("ai/transformers", "Transformers", "Attention architectures")
        .await?;
    graph
        .register_topic("ai/transformers/attention", "Attention", "Attention mechanisms")
        .await?;
    for topic in graph.list_topics().await? {
        println!("  root topic: {}", topic.id);
    }

    println!("\n✍️ Writing an exploration chain...");
    let root = graph
        .explore(paper(
            "ai/transformers",
            "Attention Is All You Need",
            "Sequence transduction with attention only.",
            3,
            "transformers",
        ))
        .await?;
    let follow_up = graph
        .explore(paper(
            "ai/transformers",
            "Scaling Laws",
            "How loss falls with model size.",
            4,
            &format!("builds-on:{root}"),
        ))
        .await?;
    println!("  wrote {root} and {follow_up}");

    println!("\n📈 Topic statistics...");
    let stats = graph.get_topic_stats("ai/transformers").await?;
    println!(
        "  explorers: {}, max depth: {}, avg depth: {}",
        stats.explorer_count, stats.max_depth, stats.avg_depth
    );

    println!("\n🧬 Lineage of the follow-up...");
    for node in graph.get_lineage(&follow_up).await? {
        let title = node
            .properties
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("<untitled>");
        println!("  {title}");
    }

    println!("\n📸 Snapshot and integrity...");
    let snapshot = graph.take_snapshot().await?;
    println!(
        "  snapshot {}: {} nodes, {} edges, {} tx entries",
        snapshot.id, snapshot.node_count, snapshot.rel_count, snapshot.tx_count
    );
    let report = graph.verify_integrity().await?;
    println!("  integrity: {}/{} valid", report.valid, report.total);

    println!("\n💾 Same session shape on SQLite...");
    let backend = SqliteBackend::in_memory().await?;
    backend.initialize().await?;
    let durable = KnowledgeGraph::new(backend, "0xAuthor");
    durable.register_topic("ai", "AI", "Artificial intelligence").await?;
    durable
        .explore(paper("ai", "Notes", "The same API, another store.", 1, ""))
        .await?;
    let log = durable.get_tx_log(None, None).await?;
    println!("  sqlite transaction log has {} entries", log.len());

    println!("\n🎉 Done");
    Ok(())
}
