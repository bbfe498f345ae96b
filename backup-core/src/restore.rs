//! 单次恢复流程：校验 → 下载 → 解压 → 解析语句 → 清空数据库 → 逐条回放。
//!
//! 恢复不是原子操作，回放中途失败时已执行的语句不会回滚。

use crate::compression;
use crate::config::AppConfig;
use crate::constants::{backup, restore};
use crate::error::{BackupError, Result};
use crate::graph::{GraphConnector, GraphSession, record_str};
use crate::state::{RestorePhase, RuntimeStateStore};
use crate::statement;
use crate::transfer::TransferClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{error, info, instrument, warn};

/// 恢复结果；`statements_applied` 在失败时同样有值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub success: bool,
    pub backup_key: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub statements_applied: Option<u64>,
    pub error: Option<String>,
}

/// 把远端键转换为本地文件名，中和路径穿越
pub fn sanitize_backup_key(key: &str) -> String {
    key.replace("..", "_").replace(['/', '\\'], "_")
}

/// 恢复流水线
#[derive(Clone)]
pub struct RestorePipeline {
    config: Arc<AppConfig>,
    connector: Arc<dyn GraphConnector>,
    transfer: Arc<dyn TransferClient>,
    state: Arc<RuntimeStateStore>,
}

impl RestorePipeline {
    pub fn new(
        config: Arc<AppConfig>,
        connector: Arc<dyn GraphConnector>,
        transfer: Arc<dyn TransferClient>,
        state: Arc<RuntimeStateStore>,
    ) -> Self {
        Self {
            config,
            connector,
            transfer,
            state,
        }
    }

    fn temp_dir(&self) -> PathBuf {
        self.config.backup.work_dir.join(restore::TEMP_DIR_NAME)
    }

    /// 从指定备份恢复
    #[instrument(skip(self))]
    pub async fn run(&self, backup_key: &str) -> RestoreResult {
        let started_at = Utc::now();
        info!("{}", "=".repeat(60));
        info!("开始从备份恢复: {}", backup_key);
        info!("{}", "=".repeat(60));

        let mut applied: Option<u64> = None;
        let outcome = self.execute(backup_key, &mut applied).await;
        let completed_at = Utc::now();

        match outcome {
            Ok(count) => {
                info!("恢复完成，共执行 {} 条语句", count);
                RestoreResult {
                    success: true,
                    backup_key: backup_key.to_string(),
                    started_at,
                    completed_at,
                    statements_applied: Some(count),
                    error: None,
                }
            }
            Err(e) => {
                error!("恢复失败: {}", e);
                if let Some(count) = applied {
                    if let Err(state_err) = self
                        .state
                        .update_runtime(|rt| rt.restore_progress = count)
                        .await
                    {
                        warn!("记录恢复进度失败: {}", state_err);
                    }
                }
                RestoreResult {
                    success: false,
                    backup_key: backup_key.to_string(),
                    started_at,
                    completed_at,
                    statements_applied: applied,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn execute(&self, backup_key: &str, applied: &mut Option<u64>) -> Result<u64> {
        self.config.validate()?;
        self.transfer
            .head_bucket()
            .await
            .map_err(|source| BackupError::StorageUnreachable {
                bucket: self.transfer.bucket().to_string(),
                source,
            })?;

        let restore_dir = self.temp_dir();
        tokio::fs::create_dir_all(&restore_dir).await?;

        // 下载与解压产物都在本次运行的临时目录中，离开作用域时整体删除
        let temp_dir = TempDir::new_in(&restore_dir)?;
        let download = temp_dir.path().join(sanitize_backup_key(backup_key));

        info!("下载备份对象: {}", backup_key);
        self.transfer
            .download(backup_key, &download)
            .await
            .map_err(|e| BackupError::download(e.to_string()))?;
        self.state
            .update_runtime(|rt| {
                rt.restore_phase = RestorePhase::Clearing;
                rt.restore_progress = 0;
            })
            .await?;

        let script = if backup_key.ends_with(backup::GZIP_SUFFIX) {
            info!("检测到压缩备份，正在解压...");
            let decompressed = download.with_extension("");
            compression::decompress_file(&download, &decompressed).await?;
            tokio::fs::remove_file(&download).await?;
            decompressed
        } else {
            download
        };

        let statements =
            tokio::task::spawn_blocking(move || statement::load_statements(&script)).await??;
        let total = statements.len() as u64;
        info!("从备份脚本加载了 {} 条语句", total);
        self.state
            .update_runtime(|rt| {
                rt.restore_phase = RestorePhase::Replaying;
                rt.restore_total_statements = Some(total);
                rt.restore_progress = 0;
            })
            .await?;

        let session = self.connector.open().await?;
        *applied = Some(0);

        info!("清空现有数据库...");
        drop_schema_and_data(session.as_ref())
            .await
            .map_err(|e| BackupError::ReplayFailed {
                applied: 0,
                message: e.to_string(),
            })?;

        let mut count = 0u64;
        for statement in &statements {
            if let Err(e) = session.execute_write(statement).await {
                *applied = Some(count);
                return Err(BackupError::ReplayFailed {
                    applied: count,
                    message: e.to_string(),
                });
            }
            count += 1;
            if count % restore::PROGRESS_CHECKPOINT_INTERVAL == 0 {
                *applied = Some(count);
                info!("已执行 {} 条语句...", count);
                self.state
                    .update_runtime(|rt| rt.restore_progress = count)
                    .await?;
            }
        }
        *applied = Some(count);

        self.state
            .update_runtime(|rt| rt.restore_progress = count)
            .await?;
        Ok(count)
    }
}

/// 名称加反引号，已带反引号的保持不变
fn decorate(name: &str) -> String {
    if name.len() >= 2 && name.starts_with('`') && name.ends_with('`') {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// 删除全部约束、索引和数据；单个约束或索引删除失败只记录警告
pub async fn drop_schema_and_data(session: &dyn GraphSession) -> Result<()> {
    for (listing, kind) in [
        ("SHOW CONSTRAINTS YIELD name", "CONSTRAINT"),
        ("SHOW INDEXES YIELD name", "INDEX"),
    ] {
        let records = match session.run(listing).await {
            Ok(records) => records,
            Err(e) => {
                warn!("列出 {} 失败: {}", kind, e);
                continue;
            }
        };
        for record in records {
            let Some(name) = record_str(&record, "name").filter(|n| !n.is_empty()) else {
                continue;
            };
            let drop = format!("DROP {kind} {} IF EXISTS", decorate(name));
            if let Err(e) = session.run(&drop).await {
                warn!("删除 {} {} 失败: {}", kind, name, e);
            }
        }
    }

    session.run("MATCH (n) DETACH DELETE n").await?;
    Ok(())
}
