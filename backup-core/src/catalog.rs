//! 远端备份目录：历史列表、单个备份的下载与删除。

use crate::constants::backup::metadata;
use crate::error::Result;
use crate::state::{JobStatus, RuntimeState};
use crate::transfer::TransferClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 历史列表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupHistoryEntry {
    pub id: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
    /// 下载时使用的文件名（对象键的最后一段）
    pub file_name: Option<String>,
    pub details: Option<String>,
    pub node_count: Option<u64>,
    pub relationship_count: Option<u64>,
    pub labels: Option<Vec<String>>,
    pub relationship_types: Option<Vec<String>>,
}

/// 对象键的最后一段
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn parse_count(value: Option<&String>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_list(value: Option<&String>) -> Option<Vec<String>> {
    let items: Vec<String> = value?
        .split(metadata::LIST_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

pub struct BackupCatalog {
    transfer: Arc<dyn TransferClient>,
    prefix: String,
}

impl BackupCatalog {
    pub fn new(transfer: Arc<dyn TransferClient>, prefix: impl Into<String>) -> Self {
        Self {
            transfer,
            prefix: prefix.into(),
        }
    }

    /// 备份历史，最新的在前；备份运行中时额外插入一条 running 记录
    pub async fn history(
        &self,
        runtime: &RuntimeState,
        running_job_id: Option<&str>,
    ) -> Result<Vec<BackupHistoryEntry>> {
        let objects = self
            .transfer
            .list_by_prefix(&format!("{}/", self.prefix))
            .await?;

        let mut history = Vec::with_capacity(objects.len() + 1);
        if runtime.last_status == JobStatus::Running {
            let id = runtime
                .last_backup_id
                .clone()
                .or_else(|| running_job_id.map(str::to_string))
                .unwrap_or_else(|| "in-progress".to_string());
            history.push(BackupHistoryEntry {
                id,
                status: JobStatus::Running,
                started_at: runtime.last_run_at.unwrap_or_else(Utc::now),
                completed_at: None,
                size_bytes: None,
                file_name: None,
                details: Some("备份进行中".to_string()),
                node_count: None,
                relationship_count: None,
                labels: None,
                relationship_types: None,
            });
        }

        for object in objects {
            if object.key.ends_with('/') {
                continue;
            }

            let meta: HashMap<String, String> = match self.transfer.head_object(&object.key).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("读取备份元数据失败 {}: {}", object.key, e);
                    HashMap::new()
                }
            };

            history.push(BackupHistoryEntry {
                file_name: Some(file_name_of(&object.key).to_string()),
                status: JobStatus::Completed,
                started_at: object.last_modified,
                completed_at: Some(object.last_modified),
                size_bytes: Some(object.size),
                details: None,
                node_count: parse_count(meta.get(metadata::NODES)),
                relationship_count: parse_count(meta.get(metadata::RELATIONSHIPS)),
                labels: parse_list(meta.get(metadata::LABELS)),
                relationship_types: parse_list(meta.get(metadata::REL_TYPES)),
                id: object.key,
            });
        }

        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(history)
    }

    /// 下载单个备份到本地文件，返回字节数；不存在时返回 NotFound
    pub async fn download(&self, key: &str, output: &Path) -> Result<u64> {
        let size = self.transfer.download(key, output).await?;
        info!("备份已下载到 {}", output.display());
        Ok(size)
    }

    /// 删除单个备份；不存在时返回 NotFound
    pub async fn delete(&self, key: &str) -> Result<()> {
        // S3 删除不存在的对象也会成功，先确认存在
        self.transfer.head_object(key).await?;
        self.transfer.delete(key).await?;
        info!("备份已删除: {}", key);
        Ok(())
    }
}
