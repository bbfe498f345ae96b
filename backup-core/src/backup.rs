//! 单次备份流程：校验配置 → 检查存储 → 图摘要 → 导出 → 压缩 → 上传 → 清理过期备份。

use crate::compression;
use crate::config::AppConfig;
use crate::constants::backup;
use crate::error::{BackupError, Result};
use crate::export::{self, GraphSummary};
use crate::graph::GraphConnector;
use crate::transfer::TransferClient;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, error, info, instrument, warn};

/// 备份结果；失败原因记录在 `error` 中而不是向上抛出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    pub remote_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
    pub error: Option<String>,
}

/// 备份流水线
#[derive(Clone)]
pub struct BackupPipeline {
    config: Arc<AppConfig>,
    connector: Arc<dyn GraphConnector>,
    transfer: Arc<dyn TransferClient>,
}

impl BackupPipeline {
    pub fn new(
        config: Arc<AppConfig>,
        connector: Arc<dyn GraphConnector>,
        transfer: Arc<dyn TransferClient>,
    ) -> Self {
        Self {
            config,
            connector,
            transfer,
        }
    }

    /// 执行一次完整备份
    #[instrument(skip(self))]
    pub async fn run(&self, retention_days: u32) -> BackupResult {
        let started_at = Utc::now();
        info!("{}", "=".repeat(60));
        info!("开始备份图数据库");
        info!("{}", "=".repeat(60));

        let mut size_bytes = None;
        let outcome = self.execute(started_at, retention_days, &mut size_bytes).await;
        let completed_at = Utc::now();

        match outcome {
            Ok(remote_key) => {
                info!("{}", "=".repeat(60));
                info!("备份成功: {}", remote_key);
                info!("{}", "=".repeat(60));
                BackupResult {
                    success: true,
                    remote_key: Some(remote_key),
                    started_at,
                    completed_at,
                    size_bytes,
                    error: None,
                }
            }
            Err(e) => {
                error!("备份失败: {}", e);
                BackupResult {
                    success: false,
                    remote_key: None,
                    started_at,
                    completed_at,
                    size_bytes,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn execute(
        &self,
        started_at: DateTime<Utc>,
        retention_days: u32,
        size_bytes: &mut Option<u64>,
    ) -> Result<String> {
        self.config.validate()?;
        self.verify_storage().await?;

        let work_dir = &self.config.backup.work_dir;
        tokio::fs::create_dir_all(work_dir).await?;

        let session = self
            .connector
            .open()
            .await
            .map_err(|e| BackupError::export(format!("无法连接图数据库: {e}")))?;

        let summary = match export::collect_graph_summary(session.as_ref()).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("收集图摘要失败，继续备份: {}", e);
                None
            }
        };

        let database = &self.config.graph.database;
        let backup_name = format!(
            "{}_{}",
            database,
            started_at.format(backup::TIMESTAMP_FORMAT)
        );

        // 本地文件都放在本次运行的临时目录中，离开作用域时整体删除
        let temp_dir = TempDir::new_in(work_dir)?;
        let export_file = temp_dir
            .path()
            .join(format!("{backup_name}{}", backup::CYPHER_EXTENSION));

        export::export_graph(session.as_ref(), database, &export_file)
            .await
            .map_err(|e| match e {
                BackupError::ExportFailed(_) => e,
                other => BackupError::export(other.to_string()),
            })?;

        let upload_file = if self.config.backup.compression_enabled {
            let compressed = temp_dir
                .path()
                .join(format!("{backup_name}{}", backup::COMPRESSED_EXTENSION));
            compression::compress_file(&export_file, &compressed, backup::COMPRESSION_LEVEL)
                .await
                .map_err(|e| match e {
                    BackupError::CompressionFailed(_) => e,
                    other => BackupError::compression(other.to_string()),
                })?;
            tokio::fs::remove_file(&export_file).await?;
            compressed
        } else {
            export_file
        };

        let size = tokio::fs::metadata(&upload_file).await?.len();
        *size_bytes = Some(size);

        let file_name = upload_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| backup_name.clone());
        let remote_key = format!("{}/{}", self.config.backup.prefix, file_name);

        let metadata = self.object_metadata(started_at, summary.as_ref());
        self.transfer
            .upload(&upload_file, &remote_key, &metadata)
            .await
            .map_err(|e| BackupError::upload(e.to_string()))?;

        drop(temp_dir);
        info!("本地备份文件已删除: {}", upload_file.display());

        if let Err(e) = enforce_retention(
            self.transfer.as_ref(),
            &self.config.backup.prefix,
            retention_days,
            Utc::now(),
        )
        .await
        {
            warn!("清理过期备份失败: {}", e);
        }

        Ok(remote_key)
    }

    async fn verify_storage(&self) -> Result<()> {
        self.transfer
            .head_bucket()
            .await
            .map_err(|source| BackupError::StorageUnreachable {
                bucket: self.transfer.bucket().to_string(),
                source,
            })?;
        info!("对象存储连接正常: {}", self.transfer.bucket());
        Ok(())
    }

    fn object_metadata(
        &self,
        started_at: DateTime<Utc>,
        summary: Option<&GraphSummary>,
    ) -> HashMap<String, String> {
        let mut metadata = HashMap::from([
            (
                backup::metadata::BACKUP_DATE.to_string(),
                started_at.to_rfc3339(),
            ),
            (
                backup::metadata::DATABASE.to_string(),
                self.config.graph.database.clone(),
            ),
            (backup::metadata::HOST.to_string(), self.connector.host()),
        ]);
        if let Some(summary) = summary {
            metadata.extend(summary.to_metadata());
        }
        metadata
    }
}

/// 从备份文件名中解析时间戳：`{database}_{YYYY-MM-DD}_{HH-MM-SS}.cypher[.gz]`
pub fn parse_backup_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let stem = file_name
        .strip_suffix(backup::COMPRESSED_EXTENSION)
        .or_else(|| file_name.strip_suffix(backup::CYPHER_EXTENSION))
        .unwrap_or(file_name);

    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 3 {
        return None;
    }
    let text = format!("{}_{}", parts[parts.len() - 2], parts[parts.len() - 1]);
    NaiveDateTime::parse_from_str(&text, backup::TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// 删除早于 `now - retention_days` 的备份，返回已删除的键
///
/// 文件名无法解析的对象一律保留。
pub async fn enforce_retention(
    transfer: &dyn TransferClient,
    prefix: &str,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let cutoff = now - Duration::days(i64::from(retention_days));
    info!("清理 {} 天前的备份 (早于 {})", retention_days, cutoff);

    let objects = transfer.list_by_prefix(&format!("{prefix}/")).await?;
    let mut deleted = Vec::new();
    for object in objects {
        let Some(timestamp) = parse_backup_timestamp(&object.key) else {
            debug!("无法解析备份时间，保留: {}", object.key);
            continue;
        };
        if timestamp >= cutoff {
            continue;
        }
        match transfer.delete(&object.key).await {
            Ok(()) => {
                info!("已删除过期备份: {}", object.key);
                deleted.push(object.key);
            }
            Err(e) => warn!("删除过期备份失败 {}: {}", object.key, e),
        }
    }

    if deleted.is_empty() {
        info!("没有需要清理的过期备份");
    } else {
        info!("共清理 {} 个过期备份", deleted.len());
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGraph, UnreachableStore, storage_failures, test_config};
    use crate::transfer::{ObjectStoreTransfer, ObjectSummary, TransferError, TransferResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use object_store::memory::InMemory;
    use serde_json::json;
    use std::path::Path;
    use tempfile::tempdir;

    fn memory_transfer() -> Arc<ObjectStoreTransfer> {
        Arc::new(ObjectStoreTransfer::new(Arc::new(InMemory::new()), "test-bucket"))
    }

    async fn put(transfer: &ObjectStoreTransfer, dir: &Path, key: &str) {
        let source = dir.join("payload");
        std::fs::write(&source, "x").unwrap();
        transfer.upload(&source, key, &HashMap::new()).await.unwrap();
    }

    fn work_dir_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 上传总是失败，其余操作委托给内存存储
    struct FailingUpload(Arc<ObjectStoreTransfer>);

    #[async_trait]
    impl TransferClient for FailingUpload {
        fn bucket(&self) -> &str {
            self.0.bucket()
        }
        async fn head_bucket(&self) -> TransferResult<()> {
            self.0.head_bucket().await
        }
        async fn upload(&self, _: &Path, _: &str, _: &HashMap<String, String>) -> TransferResult<()> {
            Err(TransferError::Other("connection reset".to_string()))
        }
        async fn download(&self, key: &str, local: &Path) -> TransferResult<u64> {
            self.0.download(key, local).await
        }
        async fn list_by_prefix(&self, prefix: &str) -> TransferResult<Vec<ObjectSummary>> {
            self.0.list_by_prefix(prefix).await
        }
        async fn head_object(&self, key: &str) -> TransferResult<HashMap<String, String>> {
            self.0.head_object(key).await
        }
        async fn delete(&self, key: &str) -> TransferResult<()> {
            self.0.delete(key).await
        }
    }

    #[test]
    fn test_parse_backup_timestamp() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            parse_backup_timestamp("neo4j-backup/neo4j_2024-01-02_03-04-05.cypher.gz"),
            Some(expected)
        );
        assert_eq!(
            parse_backup_timestamp("my_graph_db_2024-01-02_03-04-05.cypher"),
            Some(expected)
        );
        assert_eq!(parse_backup_timestamp("db_corrupted.cypher"), None);
        assert_eq!(parse_backup_timestamp("neo4j_2024-13-02_03-04-05.cypher"), None);
        assert_eq!(parse_backup_timestamp("notes.txt"), None);
    }

    #[tokio::test]
    async fn test_retention_deletes_only_expired_backups() {
        let temp_dir = tempdir().unwrap();
        let transfer = memory_transfer();
        for key in [
            "neo4j-backup/neo4j_2024-01-02_02-00-00.cypher.gz",
            "neo4j-backup/neo4j_2024-02-10_02-00-00.cypher.gz",
            "neo4j-backup/db_corrupted.cypher",
        ] {
            put(&transfer, temp_dir.path(), key).await;
        }

        let now = Utc.with_ymd_and_hms(2024, 2, 11, 0, 0, 0).unwrap();
        let deleted = enforce_retention(transfer.as_ref(), "neo4j-backup", 7, now)
            .await
            .unwrap();
        assert_eq!(deleted, vec!["neo4j-backup/neo4j_2024-01-02_02-00-00.cypher.gz"]);

        let mut remaining: Vec<String> = transfer
            .list_by_prefix("neo4j-backup/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "neo4j-backup/db_corrupted.cypher",
                "neo4j-backup/neo4j_2024-02-10_02-00-00.cypher.gz",
            ]
        );
    }

    #[tokio::test]
    async fn test_backup_uploads_compressed_export_and_cleans_up() {
        let temp_dir = tempdir().unwrap();
        let config = Arc::new(test_config(temp_dir.path()));
        let transfer = memory_transfer();

        // 约 10MB 的导出内容
        let filler = "graph ".repeat(100);
        let mut graph = FakeGraph::new().with_relationship("LINKS", json!({}));
        for i in 0..17_000 {
            graph = graph.with_node(&["Doc"], json!({ "i": i, "body": filler }));
        }

        let pipeline = BackupPipeline::new(config.clone(), graph.into_connector(), transfer.clone());
        let result = pipeline.run(7).await;

        assert!(result.success, "{:?}", result.error);
        let remote_key = result.remote_key.unwrap();
        assert!(remote_key.starts_with("neo4j-backup/neo4j_"));
        assert!(remote_key.ends_with(".cypher.gz"));
        assert!(parse_backup_timestamp(&remote_key).is_some());

        let size = result.size_bytes.unwrap();
        assert!(size > 0);
        assert!(size < 10 * 1024 * 1024 / 10, "compressed size {size}");

        let metadata = transfer.head_object(&remote_key).await.unwrap();
        assert_eq!(metadata["database"], "neo4j");
        assert_eq!(metadata["host"], "fake-graph");
        assert_eq!(metadata["meta-nodes"], "17000");
        assert_eq!(metadata["meta-relationships"], "1");
        assert_eq!(metadata["meta-labels"], "Doc");
        assert!(metadata.contains_key("backup-date"));

        assert!(work_dir_files(&config.backup.work_dir).is_empty());
    }

    #[tokio::test]
    async fn test_backup_without_compression_uploads_plain_script() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.backup.compression_enabled = false;
        let transfer = memory_transfer();

        let graph = FakeGraph::new().with_node(&["Person"], json!({"name": "Ann"}));
        let pipeline =
            BackupPipeline::new(Arc::new(config), graph.into_connector(), transfer.clone());
        let result = pipeline.run(7).await;

        assert!(result.success);
        let remote_key = result.remote_key.unwrap();
        assert!(remote_key.ends_with(".cypher"));

        let local = temp_dir.path().join("downloaded.cypher");
        transfer.download(&remote_key, &local).await.unwrap();
        assert!(
            std::fs::read_to_string(&local)
                .unwrap()
                .contains("CREATE (n:Person {name: 'Ann'});")
        );
    }

    #[tokio::test]
    async fn test_local_artifact_removed_when_upload_fails() {
        let temp_dir = tempdir().unwrap();
        let config = Arc::new(test_config(temp_dir.path()));
        let transfer = Arc::new(FailingUpload(memory_transfer()));

        let graph = FakeGraph::new().with_node(&["Person"], json!({"name": "Ann"}));
        let pipeline = BackupPipeline::new(config.clone(), graph.into_connector(), transfer);
        let result = pipeline.run(7).await;

        assert!(!result.success);
        assert!(result.remote_key.is_none());
        assert!(result.size_bytes.is_some());
        assert!(result.error.unwrap().contains("上传失败"));
        assert!(work_dir_files(&config.backup.work_dir).is_empty());
    }

    #[tokio::test]
    async fn test_missing_configuration_fails_before_any_work() {
        let temp_dir = tempdir().unwrap();
        let mut config = test_config(temp_dir.path());
        config.graph.password.clear();
        config.storage.bucket.clear();

        let graph = FakeGraph::new().into_connector();
        let pipeline = BackupPipeline::new(Arc::new(config), graph.clone(), memory_transfer());
        let result = pipeline.run(7).await;

        assert!(!result.success);
        let message = result.error.unwrap();
        assert!(message.contains("NEO4J_PASSWORD"));
        assert!(message.contains("R2_BUCKET_NAME"));
        assert!(graph.runs().is_empty());
    }

    #[tokio::test]
    async fn test_export_failure_is_reported() {
        let temp_dir = tempdir().unwrap();
        let config = Arc::new(test_config(temp_dir.path()));
        let graph = FakeGraph::new().unavailable();

        let pipeline = BackupPipeline::new(config.clone(), graph.into_connector(), memory_transfer());
        let result = pipeline.run(7).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("导出失败"));
        assert!(work_dir_files(&config.backup.work_dir).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_storage_fails_before_graph_work() {
        for (failure, detail) in storage_failures() {
            let temp_dir = tempdir().unwrap();
            let config = Arc::new(test_config(temp_dir.path()));
            let graph = FakeGraph::new().with_node(&["A"], json!({})).into_connector();
            let transfer = Arc::new(UnreachableStore::new(failure));

            let pipeline = BackupPipeline::new(config.clone(), graph.clone(), transfer.clone());
            let result = pipeline.run(7).await;

            assert!(!result.success);
            assert!(result.remote_key.is_none());
            assert!(result.size_bytes.is_none());
            let message = result.error.unwrap();
            assert!(message.contains("对象存储不可达"), "{message}");
            assert!(message.contains("test-bucket"), "{message}");
            assert!(message.contains(detail), "{message}");
            assert!(graph.runs().is_empty());
            assert_eq!(transfer.calls(), vec!["head_bucket"]);
            assert!(work_dir_files(&config.backup.work_dir).is_empty());
        }
    }
}
