//! SQLite backend over `sqlx`.
//!
//! Two tables mirror the in-memory layout: `nodes` keyed `(label, id)`
//! with the property map as a JSON column, and `edges` with a
//! monotonically increasing `seq` standing in for insertion order. The
//! `(from_id, edge_type)` and `(to_id, edge_type)` indexes are the SQL
//! counterpart of the reference backend's `out:`/`in:` multimaps.
//!
//! Traversals and aggregations pull the relevant rows and run the same
//! shared algorithms as the reference backend, so both stores answer every
//! query identically for the same write sequence.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::{
    algo, depth_of, matches_filter, merge_properties, metric_values, Direction, Edge, EdgeType,
    GraphBackend, Label, Metric, MetricValues, Node, Properties, TraversalPath, TxWork,
};
use crate::error::{GraphError, Result};

/// Durable backend on a SQLite database. Cloning shares the connection
/// pool, so multiple domain instances can address one store.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open a database by URL, e.g. `sqlite://knowledge.db`. The file is
    /// created when missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| GraphError::Backend(e.to_string()))?
            .create_if_missing(true);
        Self::with_options(options).await
    }

    /// Open a private in-memory database. State lives exactly as long as
    /// the backend: `close` drops the only connection and with it the
    /// data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| GraphError::Backend(e.to_string()))?;
        Self::with_options(options).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self> {
        // One pinned connection: an in-memory database is per-connection,
        // so the pool must never rotate it away.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    async fn fetch_edge_row(
        &self,
        edge_type: EdgeType,
        from: &str,
        to: &str,
    ) -> Result<Option<(i64, Properties)>> {
        let row = sqlx::query(
            "SELECT seq, properties FROM edges \
             WHERE edge_type = ? AND from_id = ? AND to_id = ? \
             ORDER BY seq LIMIT 1",
        )
        .bind(edge_type.as_str())
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Ok((r.get::<i64, _>("seq"), parse_properties(&r)?)))
            .transpose()
    }

    async fn insert_edge(&self, edge: &Edge) -> Result<()> {
        sqlx::query(
            "INSERT INTO edges (edge_type, from_id, to_id, properties) VALUES (?, ?, ?, ?)",
        )
        .bind(edge.edge_type.as_str())
        .bind(&edge.from)
        .bind(&edge.to)
        .bind(serde_json::to_string(&edge.properties)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn edges_of_type(&self, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let rows = sqlx::query(
            "SELECT edge_type, from_id, to_id, properties FROM edges \
             WHERE edge_type = ? ORDER BY seq",
        )
        .bind(edge_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_edge).collect()
    }

    async fn existing_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT id FROM nodes")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("id")).collect())
    }

    /// Resolve raw id paths to full nodes. Ids are globally unique across
    /// labels in practice; `ORDER BY label LIMIT 1` pins the answer should
    /// a caller ever violate that.
    async fn resolve_path(&self, node_ids: Vec<String>, edges: Vec<Edge>) -> Result<TraversalPath> {
        let mut nodes = Vec::with_capacity(node_ids.len());
        for id in node_ids {
            let row = sqlx::query(
                "SELECT label, id, properties FROM nodes WHERE id = ? ORDER BY label LIMIT 1",
            )
            .bind(&id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                nodes.push(row_to_node(&row)?);
            }
        }
        Ok(TraversalPath { nodes, edges })
    }

    /// The three aggregate ingredients for one target node, matching the
    /// reference backend's computation exactly.
    async fn aggregate_inputs(
        &self,
        target_id: &str,
        edge_type: EdgeType,
        source_label: Label,
        leaf_edge: EdgeType,
        leaf_label: Label,
    ) -> Result<(usize, usize, Vec<i64>)> {
        let (edge_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM edges WHERE to_id = ? AND edge_type = ?")
                .bind(target_id)
                .bind(edge_type.as_str())
                .fetch_one(&self.pool)
                .await?;

        let (sources,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT e.from_id) FROM edges e \
             JOIN nodes n ON n.id = e.from_id AND n.label = ? \
             WHERE e.to_id = ? AND e.edge_type = ?",
        )
        .bind(source_label.as_str())
        .bind(target_id)
        .bind(edge_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        let leaf_rows = sqlx::query(
            "SELECT n.properties FROM edges e \
             JOIN nodes n ON n.id = e.from_id AND n.label = ? \
             WHERE e.to_id = ? AND e.edge_type = ? ORDER BY e.seq",
        )
        .bind(leaf_label.as_str())
        .bind(target_id)
        .bind(leaf_edge.as_str())
        .fetch_all(&self.pool)
        .await?;
        let depths: Vec<i64> = leaf_rows
            .iter()
            .map(|r| parse_properties(r))
            .collect::<Result<Vec<_>>>()?
            .iter()
            .filter_map(depth_of)
            .collect();

        Ok((sources as usize, edge_count as usize, depths))
    }
}

fn parse_properties(row: &SqliteRow) -> Result<Properties> {
    let text: String = row.get("properties");
    Ok(serde_json::from_str(&text)?)
}

fn row_to_node(row: &SqliteRow) -> Result<Node> {
    let label_text: String = row.get("label");
    let label = Label::parse(&label_text)
        .ok_or_else(|| GraphError::Backend(format!("unknown node label: {label_text}")))?;
    Ok(Node::new(label, row.get::<String, _>("id"), parse_properties(row)?))
}

fn row_to_edge(row: &SqliteRow) -> Result<Edge> {
    let type_text: String = row.get("edge_type");
    let edge_type = EdgeType::parse(&type_text)
        .ok_or_else(|| GraphError::Backend(format!("unknown edge type: {type_text}")))?;
    Ok(
        Edge::new(edge_type, row.get::<String, _>("from_id"), row.get::<String, _>("to_id"))
            .with_properties(parse_properties(row)?),
    )
}

#[async_trait]
impl GraphBackend for SqliteBackend {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nodes (\
                 label      TEXT NOT NULL,\
                 id         TEXT NOT NULL,\
                 properties TEXT NOT NULL,\
                 PRIMARY KEY (label, id)\
             )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS edges (\
                 seq        INTEGER PRIMARY KEY AUTOINCREMENT,\
                 edge_type  TEXT NOT NULL,\
                 from_id    TEXT NOT NULL,\
                 to_id      TEXT NOT NULL,\
                 properties TEXT NOT NULL\
             )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_out ON edges (from_id, edge_type)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_in ON edges (to_id, edge_type)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn with_transaction(&self, work: TxWork) -> Result<()> {
        // The work is opaque to the backend, so it cannot be rebound to a
        // dedicated connection; run it once, like the reference backend.
        work().await
    }

    async fn create_node(&self, node: Node) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO nodes (label, id, properties) VALUES (?, ?, ?)")
            .bind(node.label.as_str())
            .bind(&node.id)
            .bind(serde_json::to_string(&node.properties)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn merge_node(&self, label: Label, id: &str, properties: Properties) -> Result<()> {
        let existing = sqlx::query("SELECT properties FROM nodes WHERE label = ? AND id = ?")
            .bind(label.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let merged = match existing {
            Some(row) => {
                let mut current = parse_properties(&row)?;
                merge_properties(&mut current, properties);
                current
            }
            None => properties,
        };
        sqlx::query("INSERT OR REPLACE INTO nodes (label, id, properties) VALUES (?, ?, ?)")
            .bind(label.as_str())
            .bind(id)
            .bind(serde_json::to_string(&merged)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_edge(&self, edge: Edge) -> Result<()> {
        self.insert_edge(&edge).await
    }

    async fn merge_edge(&self, edge: Edge) -> Result<()> {
        match self.fetch_edge_row(edge.edge_type, &edge.from, &edge.to).await? {
            Some((seq, mut current)) => {
                merge_properties(&mut current, edge.properties);
                sqlx::query("UPDATE edges SET properties = ? WHERE seq = ?")
                    .bind(serde_json::to_string(&current)?)
                    .bind(seq)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
            None => self.insert_edge(&edge).await,
        }
    }

    async fn increment_edge_property(
        &self,
        edge_type: EdgeType,
        from: &str,
        to: &str,
        property: &str,
        delta: i64,
    ) -> Result<()> {
        match self.fetch_edge_row(edge_type, from, to).await? {
            Some((seq, mut current)) => {
                let base = current.get(property).and_then(|v| v.as_i64()).unwrap_or(0);
                current.insert(property.to_string(), (base + delta).into());
                sqlx::query("UPDATE edges SET properties = ? WHERE seq = ?")
                    .bind(serde_json::to_string(&current)?)
                    .bind(seq)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
            None => {
                let mut props = Properties::new();
                props.insert(property.to_string(), delta.into());
                self.insert_edge(&Edge::new(edge_type, from, to).with_properties(props))
                    .await
            }
        }
    }

    async fn get_node(&self, label: Label, id: &str) -> Result<Option<Node>> {
        let row = sqlx::query("SELECT label, id, properties FROM nodes WHERE label = ? AND id = ?")
            .bind(label.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    async fn find_nodes(&self, label: Label, filter: Option<&Properties>) -> Result<Vec<Node>> {
        let rows =
            sqlx::query("SELECT label, id, properties FROM nodes WHERE label = ? ORDER BY id")
                .bind(label.as_str())
                .fetch_all(&self.pool)
                .await?;
        let nodes = rows
            .iter()
            .map(row_to_node)
            .collect::<Result<Vec<_>>>()?;
        Ok(match filter {
            Some(filter) => nodes
                .into_iter()
                .filter(|n| matches_filter(&n.properties, filter))
                .collect(),
            None => nodes,
        })
    }

    async fn get_children(
        &self,
        _parent_label: Label,
        parent_id: &str,
        edge_type: EdgeType,
        child_label: Label,
    ) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT n.label, n.id, n.properties FROM edges e \
             JOIN nodes n ON n.id = e.to_id AND n.label = ? \
             WHERE e.from_id = ? AND e.edge_type = ? ORDER BY e.seq",
        )
        .bind(child_label.as_str())
        .bind(parent_id)
        .bind(edge_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn get_roots(&self, label: Label, incoming: EdgeType) -> Result<Vec<Node>> {
        let rows = sqlx::query(
            "SELECT label, id, properties FROM nodes WHERE label = ? \
             AND id NOT IN (SELECT to_id FROM edges WHERE edge_type = ?) \
             ORDER BY id",
        )
        .bind(label.as_str())
        .bind(incoming.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_node).collect()
    }

    async fn get_edges(
        &self,
        node_id: &str,
        edge_type: EdgeType,
        direction: Direction,
    ) -> Result<Vec<Edge>> {
        let sql = match direction {
            Direction::Out => {
                "SELECT edge_type, from_id, to_id, properties FROM edges \
                 WHERE from_id = ? AND edge_type = ? ORDER BY seq"
            }
            Direction::In => {
                "SELECT edge_type, from_id, to_id, properties FROM edges \
                 WHERE to_id = ? AND edge_type = ? ORDER BY seq"
            }
        };
        let rows = sqlx::query(sql)
            .bind(node_id)
            .bind(edge_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_edge).collect()
    }

    async fn node_count(&self, label: Option<Label>) -> Result<u64> {
        let (count,): (i64,) = match label {
            Some(label) => {
                sqlx::query_as("SELECT COUNT(*) FROM nodes WHERE label = ?")
                    .bind(label.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM nodes")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }

    async fn edge_count(&self, edge_type: Option<EdgeType>) -> Result<u64> {
        let (count,): (i64,) = match edge_type {
            Some(edge_type) => {
                sqlx::query_as("SELECT COUNT(*) FROM edges WHERE edge_type = ?")
                    .bind(edge_type.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM edges")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }

    async fn aggregate_over_edge(
        &self,
        _target_label: Label,
        target_id: &str,
        edge_type: EdgeType,
        source_label: Label,
        metrics: &[Metric],
    ) -> Result<MetricValues> {
        let (sources, edge_count, depths) = self
            .aggregate_inputs(
                target_id,
                edge_type,
                source_label,
                EdgeType::InTopic,
                Label::Exploration,
            )
            .await?;
        Ok(metric_values(metrics, sources, edge_count, &depths))
    }

    async fn aggregate_grouped(
        &self,
        parent_label: Label,
        parent_id: &str,
        parent_to_child: EdgeType,
        child_label: Label,
        child_to_leaf: EdgeType,
        leaf_label: Label,
        metrics: &[Metric],
    ) -> Result<BTreeMap<String, MetricValues>> {
        let children = self
            .get_children(parent_label, parent_id, parent_to_child, child_label)
            .await?;
        let mut grouped = BTreeMap::new();
        for child in children {
            let (sources, edge_count, depths) = self
                .aggregate_inputs(
                    &child.id,
                    EdgeType::Explored,
                    Label::User,
                    child_to_leaf,
                    leaf_label,
                )
                .await?;
            grouped.insert(child.id, metric_values(metrics, sources, edge_count, &depths));
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
        let edges = self.edges_of_type(edge_type).await?;
        let exists = self.existing_ids().await?;
        let mut paths = Vec::new();
        for (node_ids, path_edges) in
            algo::collect_paths(&edges, &exists, start_id, direction, max_depth)
        {
            paths.push(self.resolve_path(node_ids, path_edges).await?);
        }
        Ok(paths)
    }

    async fn shortest_path(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: EdgeType,
    ) -> Result<Option<TraversalPath>> {
        let edges = self.edges_of_type(edge_type).await?;
        let exists = self.existing_ids().await?;
        match algo::shortest_path(&edges, &exists, from_id, to_id) {
            Some((node_ids, path_edges)) => {
                Ok(Some(self.resolve_path(node_ids, path_edges).await?))
            }
            None => Ok(None),
        }
    }
}
