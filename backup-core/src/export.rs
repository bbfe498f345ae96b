//! 图数据导出：图摘要统计，以及把整个图导出为 Cypher 语句脚本。
//!
//! 导出分两级：优先使用 APOC 的批量导出；不可用时退回手动导出
//! （约束、非约束索引、逐节点 CREATE 语句，关系仅以注释记录）。

use crate::constants::{backup, graph};
use crate::error::{BackupError, Result};
use crate::graph::{GraphSession, Record, record_str, record_u64};
use crate::statement::StatementWriter;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, instrument, warn};

const APOC_VERSION_QUERY: &str = "RETURN apoc.version() AS version";
const APOC_EXPORT_QUERY: &str = "CALL apoc.export.cypher.all(null, {stream: true, format: 'plain'}) \
     YIELD cypherStatements RETURN cypherStatements";
const CONSTRAINTS_QUERY: &str = "SHOW CONSTRAINTS YIELD name, createStatement";
const INDEXES_QUERY: &str = "SHOW INDEXES YIELD name, type, owningConstraint, createStatement";
const CONSTRAINT_BACKED: &str = "CONSTRAINT BACKED";

/// 图摘要，写入备份对象的元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSummary {
    pub nodes: u64,
    pub relationships: u64,
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
}

impl GraphSummary {
    /// 转换为对象元数据；列表最多保留前 10 项，用 `|` 连接
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let join = |items: &[String]| {
            items
                .iter()
                .take(backup::SUMMARY_LIST_LIMIT)
                .cloned()
                .collect::<Vec<_>>()
                .join(&backup::metadata::LIST_SEPARATOR.to_string())
        };

        HashMap::from([
            (backup::metadata::NODES.to_string(), self.nodes.to_string()),
            (
                backup::metadata::RELATIONSHIPS.to_string(),
                self.relationships.to_string(),
            ),
            (backup::metadata::LABELS.to_string(), join(&self.labels)),
            (
                backup::metadata::REL_TYPES.to_string(),
                join(&self.relationship_types),
            ),
        ])
    }
}

/// 统计节点数、关系数、标签与关系类型
///
/// 计数查询失败时返回错误；标签和关系类型查询失败只记录警告。
pub async fn collect_graph_summary(session: &dyn GraphSession) -> Result<GraphSummary> {
    let count = |records: Vec<Record>| {
        records
            .first()
            .and_then(|r| record_u64(r, "count"))
            .unwrap_or(0)
    };

    let nodes = count(session.run("MATCH (n) RETURN count(n) AS count").await?);
    let relationships = count(session.run("MATCH ()-[r]->() RETURN count(r) AS count").await?);

    let labels = match session.run("CALL db.labels()").await {
        Ok(records) => column_strings(&records, "label"),
        Err(e) => {
            warn!("获取标签列表失败: {}", e);
            Vec::new()
        }
    };

    let relationship_types = match session.run("CALL db.relationshipTypes()").await {
        Ok(records) => column_strings(&records, "relationshipType"),
        Err(e) => {
            warn!("获取关系类型列表失败: {}", e);
            Vec::new()
        }
    };

    Ok(GraphSummary {
        nodes,
        relationships,
        labels,
        relationship_types,
    })
}

fn column_strings(records: &[Record], column: &str) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| record_str(r, column))
        .map(str::to_string)
        .collect()
}

/// 实际使用的导出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTier {
    Bulk,
    Manual,
}

/// 导出结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub tier: ExportTier,
    pub nodes: u64,
    pub relationships: u64,
    pub size_bytes: u64,
}

/// 把整个图导出到 `output`
#[instrument(skip(session, output), fields(output = %output.display()))]
pub async fn export_graph(
    session: &dyn GraphSession,
    database: &str,
    output: &Path,
) -> Result<ExportReport> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let report = match export_bulk(session, output).await {
        Ok(report) => report,
        Err(e) => {
            warn!("APOC 不可用 ({}), 使用手动导出", e);
            export_manual(session, database, output).await?
        }
    };

    info!(
        tier = ?report.tier,
        nodes = report.nodes,
        relationships = report.relationships,
        "导出完成: {} ({:.2} MB)",
        output.display(),
        report.size_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(report)
}

async fn export_bulk(session: &dyn GraphSession, output: &Path) -> Result<ExportReport> {
    let version = session
        .run(APOC_VERSION_QUERY)
        .await?
        .first()
        .and_then(|r| record_str(r, "version").map(str::to_string))
        .ok_or_else(|| BackupError::export("APOC 版本检查没有返回数据"))?;
    info!("检测到 APOC (版本: {}), 使用批量导出", version);

    let records = session.run(APOC_EXPORT_QUERY).await?;
    let scripts: Vec<&str> = records
        .iter()
        .filter_map(|r| record_str(r, "cypherStatements"))
        .collect();
    if scripts.is_empty() {
        return Err(BackupError::export("APOC 导出没有返回数据"));
    }

    let mut writer = StatementWriter::new(BufWriter::new(File::create(output)?));
    for script in scripts {
        writer.write_raw(script)?;
    }
    writer.finish()?;

    Ok(ExportReport {
        tier: ExportTier::Bulk,
        nodes: 0,
        relationships: 0,
        size_bytes: tokio::fs::metadata(output).await?.len(),
    })
}

async fn export_manual(
    session: &dyn GraphSession,
    database: &str,
    output: &Path,
) -> Result<ExportReport> {
    let file = File::create(output)
        .map_err(|e| BackupError::export(format!("无法创建导出文件 {}: {e}", output.display())))?;
    let mut writer = StatementWriter::new(BufWriter::new(file));
    writer.write_header(database, Utc::now())?;

    info!("导出 schema (约束与索引)...");
    for record in session.run(CONSTRAINTS_QUERY).await? {
        if let Some(statement) = record_str(&record, "createStatement") {
            writer.write_schema(statement)?;
        }
    }
    writer.write_section_break()?;

    for record in session.run(INDEXES_QUERY).await? {
        let constraint_backed = record_str(&record, "type") == Some(CONSTRAINT_BACKED)
            || record_str(&record, "owningConstraint").is_some();
        if constraint_backed {
            continue;
        }
        if let Some(statement) = record_str(&record, "createStatement") {
            writer.write_schema(statement)?;
        }
    }
    writer.write_section_break()?;

    info!("导出节点...");
    let mut skip = 0u64;
    loop {
        let page = session
            .run(&page_query(
                "MATCH (n) RETURN labels(n) AS labels, properties(n) AS props ORDER BY id(n)",
                skip,
            ))
            .await?;
        for record in &page {
            writer.write_node(&string_list(record, "labels"), &property_object(record))?;
            if writer.nodes_written() % graph::EXPORT_LOG_INTERVAL == 0 {
                info!("已导出 {} 个节点...", writer.nodes_written());
            }
        }
        if (page.len() as u64) < graph::EXPORT_PAGE_SIZE {
            break;
        }
        skip += graph::EXPORT_PAGE_SIZE;
    }
    info!("节点导出总数: {}", writer.nodes_written());
    writer.write_section_break()?;

    info!("导出关系...");
    let mut skip = 0u64;
    loop {
        let page = session
            .run(&page_query(
                "MATCH ()-[r]->() RETURN type(r) AS type, properties(r) AS props ORDER BY id(r)",
                skip,
            ))
            .await?;
        for record in &page {
            let rel_type = record_str(record, "type").unwrap_or_default();
            writer.write_relationship(rel_type, &property_object(record))?;
            if writer.relationships_written() % graph::EXPORT_LOG_INTERVAL == 0 {
                info!("已导出 {} 个关系...", writer.relationships_written());
            }
        }
        if (page.len() as u64) < graph::EXPORT_PAGE_SIZE {
            break;
        }
        skip += graph::EXPORT_PAGE_SIZE;
    }
    info!("关系导出总数: {}", writer.relationships_written());

    let nodes = writer.nodes_written();
    let relationships = writer.relationships_written();
    writer.finish()?;

    Ok(ExportReport {
        tier: ExportTier::Manual,
        nodes,
        relationships,
        size_bytes: tokio::fs::metadata(output).await?.len(),
    })
}

fn page_query(base: &str, skip: u64) -> String {
    format!("{base} SKIP {skip} LIMIT {}", graph::EXPORT_PAGE_SIZE)
}

fn string_list(record: &Record, column: &str) -> Vec<String> {
    record
        .get(column)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn property_object(record: &Record) -> Map<String, Value> {
    record
        .get("props")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::load_statements;
    use crate::testing::FakeGraph;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_summary_collects_counts_and_names() {
        let graph = FakeGraph::new()
            .with_node(&["Person"], json!({"name": "Ann"}))
            .with_node(&["Company"], json!({}))
            .with_relationship("WORKS_AT", json!({}));

        let summary = collect_graph_summary(&graph).await.unwrap();
        assert_eq!(summary.nodes, 2);
        assert_eq!(summary.relationships, 1);
        assert_eq!(summary.labels, vec!["Company", "Person"]);
        assert_eq!(summary.relationship_types, vec!["WORKS_AT"]);
    }

    #[tokio::test]
    async fn test_summary_ignores_label_failures() {
        let graph = FakeGraph::new()
            .with_node(&["Person"], json!({}))
            .failing_on("CALL db.labels()");

        let summary = collect_graph_summary(&graph).await.unwrap();
        assert_eq!(summary.nodes, 1);
        assert!(summary.labels.is_empty());
    }

    #[test]
    fn test_summary_metadata_caps_lists() {
        let summary = GraphSummary {
            nodes: 5,
            relationships: 3,
            labels: (0..15).map(|i| format!("L{i}")).collect(),
            relationship_types: vec!["A".to_string(), "B".to_string()],
        };
        let metadata = summary.to_metadata();
        assert_eq!(metadata["meta-nodes"], "5");
        assert_eq!(metadata["meta-relationships"], "3");
        assert_eq!(metadata["meta-labels"].split('|').count(), 10);
        assert!(metadata["meta-labels"].ends_with("L9"));
        assert_eq!(metadata["meta-rel-types"], "A|B");
    }

    #[tokio::test]
    async fn test_manual_export_writes_schema_nodes_and_relationship_comments() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("neo4j_2024-02-11_02-00-00.cypher");

        let graph = FakeGraph::new()
            .with_constraint(
                "person_id",
                "CREATE CONSTRAINT person_id FOR (n:Person) REQUIRE n.id IS UNIQUE",
            )
            .with_index(
                "person_id",
                "RANGE",
                Some("person_id"),
                "CREATE RANGE INDEX person_id FOR (n:Person) ON (n.id)",
            )
            .with_index(
                "person_name",
                "RANGE",
                None,
                "CREATE RANGE INDEX person_name FOR (n:Person) ON (n.name)",
            )
            .with_node(&["Person"], json!({"id": 1, "name": "Ann"}))
            .with_node(&["Person"], json!({"id": 2, "name": "O'Brien"}))
            .with_relationship("KNOWS", json!({"since": 2020}));

        let report = export_graph(&graph, "neo4j", &output).await.unwrap();
        assert_eq!(report.tier, ExportTier::Manual);
        assert_eq!(report.nodes, 2);
        assert_eq!(report.relationships, 1);
        assert_eq!(report.size_bytes, std::fs::metadata(&output).unwrap().len());

        let script = std::fs::read_to_string(&output).unwrap();
        assert!(script.starts_with("// Neo4j Database Export\n// Database: neo4j\n"));
        assert!(script.contains("// Relationship with properties: KNOWS"));

        let statements = load_statements(&output).unwrap();
        assert_eq!(
            statements,
            vec![
                "CREATE CONSTRAINT person_id FOR (n:Person) REQUIRE n.id IS UNIQUE",
                "CREATE RANGE INDEX person_name FOR (n:Person) ON (n.name)",
                "CREATE (n:Person {id: 1, name: 'Ann'})",
                r"CREATE (n:Person {id: 2, name: 'O\'Brien'})",
            ]
        );
    }

    #[tokio::test]
    async fn test_manual_export_pages_through_large_graphs() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("big.cypher");

        let mut graph = FakeGraph::new();
        for i in 0..(graph::EXPORT_PAGE_SIZE * 2 + 5) {
            graph = graph.with_node(&["Item"], json!({ "i": i }));
        }

        let report = export_graph(&graph, "neo4j", &output).await.unwrap();
        assert_eq!(report.nodes, graph::EXPORT_PAGE_SIZE * 2 + 5);

        let statements = load_statements(&output).unwrap();
        assert_eq!(statements.first().unwrap(), "CREATE (n:Item {i: 0})");
        assert_eq!(
            statements.last().unwrap(),
            &format!("CREATE (n:Item {{i: {}}})", graph::EXPORT_PAGE_SIZE * 2 + 4)
        );
    }

    #[tokio::test]
    async fn test_bulk_export_when_apoc_available() {
        let temp_dir = tempdir().unwrap();
        let output = temp_dir.path().join("bulk.cypher");

        let graph = FakeGraph::new()
            .with_apoc_script("CREATE (:A);\nCREATE (:B);")
            .with_node(&["A"], json!({}));

        let report = export_graph(&graph, "neo4j", &output).await.unwrap();
        assert_eq!(report.tier, ExportTier::Bulk);
        assert_eq!(
            load_statements(&output).unwrap(),
            vec!["CREATE (:A)", "CREATE (:B)"]
        );
    }

    #[tokio::test]
    async fn test_export_fails_when_graph_unreachable() {
        let temp_dir = tempdir().unwrap();
        let graph = FakeGraph::new().unavailable();
        assert!(
            export_graph(&graph, "neo4j", &temp_dir.path().join("x.cypher"))
                .await
                .is_err()
        );
    }
}
