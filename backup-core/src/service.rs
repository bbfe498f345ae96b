//! 备份服务门面：组装流水线、任务控制器、状态存储与备份目录。

use crate::backup::BackupPipeline;
use crate::catalog::{BackupCatalog, BackupHistoryEntry};
use crate::config::AppConfig;
use crate::constants::jobs::STALE_RUNNING_HOURS;
use crate::error::{BackupError, Result};
use crate::graph::{GraphConnector, HttpGraphConnector};
use crate::jobs::{BackupController, RestoreController};
use crate::restore::RestorePipeline;
use crate::state::{
    JobStatus, RestorePhase, RuntimeState, RuntimeStateStore, ScheduleSettings, StateSnapshot,
};
use crate::transfer::{DisconnectedTransfer, ObjectStoreTransfer, TransferClient};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 服务整体状态
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub job_id: Option<String>,
    pub restore_running: bool,
    pub restore_job_id: Option<String>,
    pub settings: StateSnapshot,
}

/// 恢复状态视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    pub running: bool,
    #[serde(rename = "job_id")]
    pub job_id: Option<String>,
    pub last_restore_status: JobStatus,
    pub restore_started_at: Option<DateTime<Utc>>,
    pub restore_completed_at: Option<DateTime<Utc>>,
    pub last_restore_id: Option<String>,
    pub last_restore_error: Option<String>,
    pub restore_statements_applied: Option<u64>,
    pub restore_total_statements: Option<u64>,
    pub restore_phase: RestorePhase,
    pub restore_progress: u64,
}

pub struct BackupService {
    state: Arc<RuntimeStateStore>,
    catalog: BackupCatalog,
    backups: BackupController,
    restores: RestoreController,
}

impl BackupService {
    pub fn new(
        config: Arc<AppConfig>,
        connector: Arc<dyn GraphConnector>,
        transfer: Arc<dyn TransferClient>,
        state: Arc<RuntimeStateStore>,
    ) -> Self {
        let backup_pipeline =
            BackupPipeline::new(config.clone(), connector.clone(), transfer.clone());
        let restore_pipeline =
            RestorePipeline::new(config.clone(), connector, transfer.clone(), state.clone());

        Self {
            catalog: BackupCatalog::new(transfer, config.backup.prefix.clone()),
            backups: BackupController::new(Arc::new(backup_pipeline), state.clone()),
            restores: RestoreController::new(Arc::new(restore_pipeline), state.clone()),
            state,
        }
    }

    /// 使用真实的 HTTP 图连接与 S3 兼容存储
    ///
    /// 存储客户端无法构造时（通常是配置不全）仍然返回服务，
    /// 具体错误在每次任务运行时记录到状态中。
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let connector: Arc<dyn GraphConnector> =
            Arc::new(HttpGraphConnector::new(config.graph.clone())?);
        let transfer: Arc<dyn TransferClient> =
            match ObjectStoreTransfer::from_config(&config.storage) {
                Ok(transfer) => Arc::new(transfer),
                Err(e) => {
                    warn!("对象存储客户端初始化失败: {}", e);
                    Arc::new(DisconnectedTransfer::new(
                        config.storage.bucket.clone(),
                        e.to_string(),
                    ))
                }
            };
        let state = Arc::new(RuntimeStateStore::from_config(&config));
        Ok(Self::new(Arc::new(config), connector, transfer, state))
    }

    /// 启动时调用：补齐状态文件并按当前设置写入 crontab
    pub async fn init(&self) -> Result<StateSnapshot> {
        let snapshot = self.state.ensure().await?;
        self.state.apply_schedule(snapshot.schedule()).await?;
        info!("状态文件已就绪: {}", self.state.path().display());
        Ok(snapshot)
    }

    /// 启动备份；本进程或其他进程（cron、另一个终端）已有备份在运行时返回 Conflict
    pub async fn start_backup(&self, description: Option<String>) -> Result<String> {
        if !self.backups.is_running() {
            let snapshot = self.state.load().await?;
            if backup_running_elsewhere(snapshot.runtime(), Utc::now()) {
                return Err(BackupError::conflict("其他进程中的备份正在运行"));
            }
        }
        self.backups.trigger(description)
    }

    /// 启动恢复；任何进程中有备份或恢复在运行时返回 Conflict
    pub async fn start_restore(&self, backup_key: &str) -> Result<String> {
        if !self.backups.is_running() && !self.restores.is_running() {
            let snapshot = self.state.load().await?;
            let now = Utc::now();
            if backup_running_elsewhere(snapshot.runtime(), now) {
                return Err(BackupError::conflict("备份进行中，无法同时恢复"));
            }
            if restore_running_elsewhere(snapshot.runtime(), now) {
                return Err(BackupError::conflict("其他进程中的恢复正在运行"));
            }
        }
        self.restores.trigger(backup_key, &self.backups)
    }

    pub async fn wait_backup(&self) {
        self.backups.wait().await
    }

    pub async fn wait_restore(&self) {
        self.restores.wait().await
    }

    /// 进程退出时取消仍在运行的任务
    pub fn shutdown(&self) {
        if self.backups.stop() {
            warn!("已取消运行中的备份任务");
        }
        if self.restores.stop() {
            warn!("已取消运行中的恢复任务，数据库可能处于部分恢复状态");
        }
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            running: self.backups.is_running(),
            job_id: self.backups.current_job_id(),
            restore_running: self.restores.is_running(),
            restore_job_id: self.restores.current_job_id(),
            settings: self.state.load().await?,
        })
    }

    pub async fn restore_status(&self) -> Result<RestoreStatus> {
        let snapshot = self.state.load().await?;
        let rt = snapshot.runtime().clone();
        Ok(RestoreStatus {
            running: self.restores.is_running(),
            job_id: self.restores.current_job_id(),
            last_restore_status: rt.last_restore_status,
            restore_started_at: rt.restore_started_at,
            restore_completed_at: rt.restore_completed_at,
            last_restore_id: rt.last_restore_id,
            last_restore_error: rt.last_restore_error,
            restore_statements_applied: rt.restore_statements_applied,
            restore_total_statements: rt.restore_total_statements,
            restore_phase: rt.restore_phase,
            restore_progress: rt.restore_progress,
        })
    }

    pub async fn schedule(&self) -> Result<StateSnapshot> {
        self.state.load().await
    }

    pub async fn update_schedule(&self, settings: ScheduleSettings) -> Result<StateSnapshot> {
        self.state.update_schedule(settings).await
    }

    pub async fn history(&self) -> Result<Vec<BackupHistoryEntry>> {
        let snapshot = self.state.load().await?;
        let job_id = self.backups.current_job_id();
        self.catalog
            .history(snapshot.runtime(), job_id.as_deref())
            .await
    }

    pub async fn download(&self, key: &str, output: &Path) -> Result<u64> {
        self.catalog.download(key, output).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.catalog.delete(key).await
    }
}

/// 状态文件记录为 running 且未过期
fn running_since(status: JobStatus, since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if status != JobStatus::Running {
        return false;
    }
    match since {
        Some(since) if now - since > Duration::hours(STALE_RUNNING_HOURS) => {
            warn!("忽略 {} 开始的过期 running 状态", since);
            false
        }
        _ => true,
    }
}

fn backup_running_elsewhere(runtime: &RuntimeState, now: DateTime<Utc>) -> bool {
    running_since(runtime.last_status, runtime.last_run_at, now)
}

fn restore_running_elsewhere(runtime: &RuntimeState, now: DateTime<Utc>) -> bool {
    running_since(runtime.last_restore_status, runtime.restore_started_at, now)
}
