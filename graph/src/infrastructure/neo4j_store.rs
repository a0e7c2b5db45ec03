// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Neo4j graph store
//!
//! Nodes carry their [`NodeId`] in a `node_id` property, unique per label
//! (`uid` is left to node attributes such as a process owner). A
//! subgraph is written in one explicit transaction: one `UNWIND` batch per
//! label, then one per edge shape. The transaction is rolled back on the
//! first failed statement or when fewer relationships were created than the
//! subgraph holds.

use async_trait::async_trait;
use neo4rs::{query, BoltType, Graph, Query, Txn};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::domain::node::{GraphNode, NodeId, NodeLabel, PropertyValue, Relation};
use crate::domain::subgraph::Subgraph;
use crate::infrastructure::store::{check_root, GraphStore, GraphStoreError};

const DELETE_OWNED_SUBGRAPH: &str = "\
MATCH (o:OS {name: $name}) \
OPTIONAL MATCH (x)-[:OWNED_BY*1..]->(o) \
WITH o, collect(DISTINCT x) AS owned \
FOREACH (n IN owned | DETACH DELETE n) \
DETACH DELETE o \
RETURN size(owned) + 1 AS removed";

/// Identity property of every stored node
const NODE_ID_KEY: &str = "node_id";

const OS_NAME_INDEX: &str = "CREATE INDEX os_name IF NOT EXISTS FOR (n:OS) ON (n.name)";

/// Schema statements: the OS name index plus a `node_id` uniqueness constraint
/// (which is also an index) for every label
fn schema_statements() -> Vec<String> {
    let mut statements = vec![OS_NAME_INDEX.to_string()];
    statements.extend(NodeLabel::ALL.iter().map(|label| {
        format!(
            "CREATE CONSTRAINT {}_node_id IF NOT EXISTS FOR (n:{}) REQUIRE n.node_id IS UNIQUE",
            label.as_str().to_lowercase(),
            label.as_str()
        )
    }));
    statements
}

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, GraphStoreError> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| GraphStoreError::Connection(format!("{}: {}", uri, e)))?;
        info!("Connected to Neo4j at {}", uri);
        Ok(Self { graph })
    }

    pub async fn ensure_indexes(&self) -> Result<(), GraphStoreError> {
        for statement in schema_statements() {
            self.graph.run(query(&statement)).await.map_err(query_error)?;
        }
        Ok(())
    }
}

fn query_error(e: neo4rs::Error) -> GraphStoreError {
    GraphStoreError::Query(e.to_string())
}

fn node_cypher(label: NodeLabel) -> String {
    format!(
        "UNWIND $rows AS row CREATE (n:{}) SET n = row RETURN count(n) AS created",
        label.as_str()
    )
}

fn edge_cypher(from: NodeLabel, to: NodeLabel, relation: Relation) -> String {
    format!(
        "UNWIND $rows AS row \
         MATCH (a:{} {{node_id: row.from}}) \
         MATCH (b:{} {{node_id: row.to}}) \
         CREATE (a)-[:{}]->(b) \
         RETURN count(*) AS created",
        from.as_str(),
        to.as_str(),
        relation.as_str()
    )
}

/// Nodes to create, grouped by label
fn node_batches(subgraph: &Subgraph) -> BTreeMap<&'static str, (NodeLabel, Vec<&GraphNode>)> {
    let mut batches: BTreeMap<&'static str, (NodeLabel, Vec<&GraphNode>)> = BTreeMap::new();
    for node in subgraph.nodes_to_create() {
        batches
            .entry(node.label.as_str())
            .or_insert_with(|| (node.label, Vec::new()))
            .1
            .push(node);
    }
    batches
}

type EdgeShape = (NodeLabel, NodeLabel, Relation);

/// Edges grouped by (source label, target label, relation), in first-seen order
fn edge_batches(subgraph: &Subgraph) -> Result<Vec<(EdgeShape, Vec<(NodeId, NodeId)>)>, GraphStoreError> {
    let labels: HashMap<NodeId, NodeLabel> = subgraph.nodes.iter().map(|n| (n.id, n.label)).collect();

    let mut batches: Vec<(EdgeShape, Vec<(NodeId, NodeId)>)> = Vec::new();
    for edge in &subgraph.edges {
        let (Some(from), Some(to)) = (labels.get(&edge.from), labels.get(&edge.to)) else {
            return Err(GraphStoreError::Query(format!(
                "edge {} references a node outside the subgraph",
                edge.relation
            )));
        };
        let shape = (*from, *to, edge.relation);
        match batches.iter_mut().find(|(s, _)| *s == shape) {
            Some((_, pairs)) => pairs.push((edge.from, edge.to)),
            None => batches.push((shape, vec![(edge.from, edge.to)])),
        }
    }
    Ok(batches)
}

fn property_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Bool(b) => (*b).into(),
        PropertyValue::Int(v) => (*v).into(),
        PropertyValue::Str(s) => s.clone().into(),
    }
}

fn node_row(node: &GraphNode) -> BoltType {
    let mut row: HashMap<String, BoltType> = node
        .properties
        .iter()
        .map(|(key, value)| (key.clone(), property_bolt(value)))
        .collect();
    row.insert(NODE_ID_KEY.to_string(), node.id.to_string().into());
    row.into()
}

fn edge_row(from: NodeId, to: NodeId) -> BoltType {
    let row: HashMap<String, BoltType> = HashMap::from([
        ("from".to_string(), from.to_string().into()),
        ("to".to_string(), to.to_string().into()),
    ]);
    row.into()
}

fn check_created(os: &str, expected: usize, created: usize) -> Result<(), GraphStoreError> {
    if created != expected {
        return Err(GraphStoreError::IncompleteWrite {
            os: os.to_string(),
            expected,
            created,
        });
    }
    Ok(())
}

/// Run a batch statement inside the transaction and return its `created` count
async fn run_counted(txn: &mut Txn, q: Query) -> Result<usize, GraphStoreError> {
    let mut rows = txn.execute(q).await.map_err(query_error)?;
    let mut created = 0usize;
    while let Some(row) = rows.next(&mut *txn).await.map_err(query_error)? {
        let count: i64 = row.get("created").map_err(|e| GraphStoreError::Query(e.to_string()))?;
        created += usize::try_from(count).unwrap_or(0);
    }
    Ok(created)
}

impl Neo4jGraphStore {
    async fn write_batches(txn: &mut Txn, subgraph: &Subgraph) -> Result<(), GraphStoreError> {
        let mut nodes_created = 0usize;
        for (label, nodes) in node_batches(subgraph).into_values() {
            let rows: Vec<BoltType> = nodes.into_iter().map(node_row).collect();
            nodes_created += run_counted(txn, query(&node_cypher(label)).param("rows", rows)).await?;
        }
        let nodes_expected = subgraph.nodes_to_create().count();
        if nodes_created != nodes_expected {
            return Err(GraphStoreError::Query(format!(
                "created {} of {} nodes for OS {}",
                nodes_created, nodes_expected, subgraph.root_name
            )));
        }

        let mut edges_created = 0usize;
        for ((from, to, relation), pairs) in edge_batches(subgraph)? {
            let rows: Vec<BoltType> = pairs.into_iter().map(|(a, b)| edge_row(a, b)).collect();
            edges_created += run_counted(txn, query(&edge_cypher(from, to, relation)).param("rows", rows)).await?;
        }
        check_created(&subgraph.root_name, subgraph.edges.len(), edges_created)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn find_os(&self, name: &str) -> Result<Option<GraphNode>, GraphStoreError> {
        let mut rows = self
            .graph
            .execute(
                query("MATCH (o:OS {name: $name}) RETURN o.node_id AS node_id, o.release_date AS release_date")
                    .param("name", name),
            )
            .await
            .map_err(query_error)?;

        let Some(row) = rows.next().await.map_err(query_error)? else {
            return Ok(None);
        };
        let node_id: String = row
            .get(NODE_ID_KEY)
            .map_err(|e| GraphStoreError::Query(format!("OS {} has no node_id: {}", name, e)))?;
        let id = node_id
            .parse()
            .map(NodeId)
            .map_err(|e| GraphStoreError::Query(format!("OS {} has invalid node_id '{}': {}", name, node_id, e)))?;

        let mut node = GraphNode::new(id, NodeLabel::OperatingSystem).with("name", name);
        if let Ok(release_date) = row.get::<String>("release_date") {
            node = node.with("release_date", release_date);
        }
        Ok(Some(node))
    }

    async fn insert_subgraph(&self, subgraph: &Subgraph) -> Result<(), GraphStoreError> {
        subgraph.validate_ownership()?;
        check_root(subgraph, self.find_os(&subgraph.root_name).await?.as_ref())?;

        let mut txn = self.graph.start_txn().await.map_err(query_error)?;
        if let Err(e) = Self::write_batches(&mut txn, subgraph).await {
            warn!("Rolling back subgraph write for {}: {}", subgraph.root_name, e);
            if let Err(rollback) = txn.rollback().await {
                warn!("Rollback failed: {}", rollback);
            }
            return Err(e);
        }
        txn.commit().await.map_err(query_error)?;

        debug!(
            "Committed {} nodes and {} edges for OS {}",
            subgraph.nodes_to_create().count(),
            subgraph.edges.len(),
            subgraph.root_name
        );
        Ok(())
    }

    async fn delete_owned_subgraph(&self, name: &str) -> Result<usize, GraphStoreError> {
        let mut rows = self
            .graph
            .execute(query(DELETE_OWNED_SUBGRAPH).param("name", name))
            .await
            .map_err(query_error)?;

        let mut removed = 0usize;
        while let Some(row) = rows.next().await.map_err(query_error)? {
            let count: i64 = row.get("removed").map_err(|e| GraphStoreError::Query(e.to_string()))?;
            removed += usize::try_from(count).unwrap_or(0);
        }
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<(), GraphStoreError> {
        self.graph
            .run(query("MATCH (n) DETACH DELETE n"))
            .await
            .map_err(query_error)
    }

    async fn node_count(&self) -> Result<usize, GraphStoreError> {
        let mut rows = self
            .graph
            .execute(query("MATCH (n) RETURN count(n) AS count"))
            .await
            .map_err(query_error)?;
        match rows.next().await.map_err(query_error)? {
            Some(row) => {
                let count: i64 = row.get("count").map_err(|e| GraphStoreError::Query(e.to_string()))?;
                Ok(usize::try_from(count).unwrap_or(0))
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::GraphEdge;
    use crate::domain::os::{OperatingSystem, Process};
    use crate::domain::subgraph::RootMode;

    fn sample() -> Subgraph {
        let mut os = OperatingSystem::new("centos-7", "2014-07-07");
        os.attach_processes((1..=3).map(|pid| Process {
            id: NodeId::new(),
            pid,
            ppid: None,
            name: format!("p{}", pid),
            command_line: None,
            uid: None,
        }));
        Subgraph::from_os(&os, RootMode::Create)
    }

    #[test]
    fn test_every_label_gets_a_node_id_constraint() {
        let statements = schema_statements();
        assert_eq!(statements.len(), NodeLabel::ALL.len() + 1);
        assert!(statements.contains(
            &"CREATE CONSTRAINT inode_node_id IF NOT EXISTS FOR (n:Inode) REQUIRE n.node_id IS UNIQUE".to_string()
        ));
        assert!(statements.contains(
            &"CREATE CONSTRAINT os_node_id IF NOT EXISTS FOR (n:OS) REQUIRE n.node_id IS UNIQUE".to_string()
        ));
    }

    #[test]
    fn test_nodes_batched_per_label() {
        let subgraph = sample();
        let batches = node_batches(&subgraph);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches["Process"].1.len(), 3);
        assert_eq!(batches["OS"].1.len(), 1);
        assert_eq!(
            node_cypher(NodeLabel::Process),
            "UNWIND $rows AS row CREATE (n:Process) SET n = row RETURN count(n) AS created"
        );
    }

    #[test]
    fn test_edges_batched_per_shape() {
        let subgraph = sample();
        let batches = edge_batches(&subgraph).unwrap();

        // OS -PROCESS-> Process and Process -OWNED_BY-> OS
        assert_eq!(batches.len(), 2);
        let total: usize = batches.iter().map(|(_, pairs)| pairs.len()).sum();
        assert_eq!(total, subgraph.edges.len());
        assert!(batches
            .iter()
            .any(|((from, to, rel), pairs)| *from == NodeLabel::Process
                && *to == NodeLabel::OperatingSystem
                && *rel == Relation::OwnedBy
                && pairs.len() == 3));
    }

    #[test]
    fn test_edge_cypher_matches_by_label_and_uid() {
        assert_eq!(
            edge_cypher(NodeLabel::Inode, NodeLabel::OperatingSystem, Relation::OwnedBy),
            "UNWIND $rows AS row MATCH (a:Inode {node_id: row.from}) MATCH (b:OS {node_id: row.to}) \
             CREATE (a)-[:OWNED_BY]->(b) RETURN count(*) AS created"
        );
    }

    #[test]
    fn test_edge_to_unknown_node_is_rejected() {
        let mut subgraph = sample();
        subgraph
            .edges
            .push(GraphEdge::new(NodeId::new(), subgraph.root, Relation::OwnedBy));
        assert!(matches!(edge_batches(&subgraph), Err(GraphStoreError::Query(_))));
    }

    #[test]
    fn test_process_uid_survives_identity_key() {
        let node = GraphNode::new(NodeId::new(), NodeLabel::Process).with("uid", 1000u32);
        let BoltType::Map(row) = node_row(&node) else {
            panic!("node rows are maps");
        };
        assert_eq!(row.value.len(), 2);
        assert!(row.get::<i64>("uid").is_ok_and(|uid| uid == 1000));
        assert!(row.get::<String>(NODE_ID_KEY).is_ok_and(|id| id == node.id.to_string()));
    }

    #[test]
    fn test_missing_relationships_fail_the_write() {
        assert!(check_created("centos-7", 6, 6).is_ok());
        let err = check_created("centos-7", 6, 3).unwrap_err();
        assert!(matches!(
            err,
            GraphStoreError::IncompleteWrite { expected: 6, created: 3, .. }
        ));
    }
}
