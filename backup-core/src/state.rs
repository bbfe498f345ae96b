//! 调度配置与运行状态的持久化存储。
//!
//! 状态保存在一个扁平 JSON 文件中，所有读写都经过同一把互斥锁，
//! 写入采用"读取-合并-整体落盘"的方式，并通过临时文件 + rename 保证不会留下半个文件。

use crate::config::AppConfig;
use crate::constants::schedule;
use crate::cron::CronSchedule;
use crate::error::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 备份/恢复任务的最近一次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// 恢复进度阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePhase {
    #[default]
    Idle,
    Downloading,
    Clearing,
    Replaying,
    Completed,
    Failed,
}

/// 调度配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub cron: String,
    pub retention_days: u32,
}

/// 运行状态
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeState {
    pub last_status: JobStatus,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_backup_id: Option<String>,
    pub last_error: Option<String>,
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

/// 落盘的完整快照（调度配置与运行状态平铺在同一个 JSON 对象里）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(flatten)]
    pub schedule: ScheduleSettings,
    #[serde(flatten)]
    pub runtime: RuntimeState,
}

/// 对外返回的状态视图，附带实时计算的 nextRunAt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(flatten)]
    pub state: PersistedState,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    pub fn schedule(&self) -> &ScheduleSettings {
        &self.state.schedule
    }

    pub fn runtime(&self) -> &RuntimeState {
        &self.state.runtime
    }
}

/// 计算下一次调度时间；禁用、表达式为空或无效时返回 None
pub fn compute_next_run(settings: &ScheduleSettings, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !settings.enabled || settings.cron.trim().is_empty() {
        return None;
    }
    match CronSchedule::parse(&settings.cron) {
        Ok(cron) => cron.next_after(now),
        Err(e) => {
            debug!("cron 表达式无效，nextRunAt 置空: {}", e);
            None
        }
    }
}

/// 调度配置与运行状态存储
#[derive(Debug)]
pub struct RuntimeStateStore {
    path: PathBuf,
    crontab_path: PathBuf,
    backup_command: String,
    defaults: ScheduleSettings,
    lock: Mutex<()>,
}

impl RuntimeStateStore {
    pub fn new(path: impl Into<PathBuf>, defaults: ScheduleSettings) -> Self {
        Self {
            path: path.into(),
            crontab_path: PathBuf::from(schedule::DEFAULT_CRONTAB_PATH),
            backup_command: schedule::DEFAULT_BACKUP_COMMAND.to_string(),
            defaults,
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let defaults = ScheduleSettings {
            enabled: config.schedule.enabled,
            cron: config.schedule.cron.clone(),
            retention_days: config.schedule.retention_days,
        };
        Self::new(&config.schedule.state_path, defaults).with_crontab(
            &config.schedule.crontab_path,
            config.schedule.command.clone(),
        )
    }

    /// 设置 crontab 文件位置与调度器执行的命令
    pub fn with_crontab(mut self, path: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        self.crontab_path = path.into();
        self.backup_command = command.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_state(&self) -> PersistedState {
        PersistedState {
            schedule: self.defaults.clone(),
            runtime: RuntimeState::default(),
        }
    }

    /// 状态文件不存在时写入默认值，返回当前状态
    pub async fn ensure(&self) -> Result<StateSnapshot> {
        {
            let _guard = self.lock.lock().await;
            if !tokio::fs::try_exists(&self.path).await? {
                info!("状态文件不存在，写入默认配置: {}", self.path.display());
                self.write_unlocked(&self.default_state()).await?;
            }
        }
        self.load().await
    }

    /// 读取状态；缺失的键使用默认值补齐，未知键忽略
    pub async fn load(&self) -> Result<StateSnapshot> {
        let state = {
            let _guard = self.lock.lock().await;
            self.read_unlocked().await?
        };
        Ok(Self::snapshot(state))
    }

    /// 合并更新：只修改闭包中改动的字段，其余字段保持原值，整体落盘
    pub async fn save<F>(&self, apply: F) -> Result<StateSnapshot>
    where
        F: FnOnce(&mut PersistedState),
    {
        let state = {
            let _guard = self.lock.lock().await;
            let mut state = self.read_unlocked().await?;
            apply(&mut state);
            self.write_unlocked(&state).await?;
            state
        };
        Ok(Self::snapshot(state))
    }

    /// 只更新运行状态字段
    pub async fn update_runtime<F>(&self, apply: F) -> Result<StateSnapshot>
    where
        F: FnOnce(&mut RuntimeState),
    {
        self.save(|state| apply(&mut state.runtime)).await
    }

    /// 更新调度配置并同步 crontab
    pub async fn update_schedule(&self, settings: ScheduleSettings) -> Result<StateSnapshot> {
        if settings.retention_days < 1 {
            return Err(BackupError::invalid_schedule("retentionDays 必须大于等于 1"));
        }
        if settings.enabled && !settings.cron.trim().is_empty() {
            CronSchedule::parse(&settings.cron)?;
        }

        let snapshot = self
            .save(|state| state.schedule = settings.clone())
            .await?;
        self.apply_schedule(snapshot.schedule()).await?;
        info!(
            enabled = settings.enabled,
            cron = %settings.cron,
            retention_days = settings.retention_days,
            "调度配置已更新"
        );
        Ok(snapshot)
    }

    /// 写入 crontab：启用时写入 "{cron} {command}"，否则写入禁用标记
    pub async fn apply_schedule(&self, settings: &ScheduleSettings) -> Result<()> {
        let line = schedule_line(settings, &self.backup_command);

        if let Some(parent) = self.crontab_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.crontab_path, line).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(schedule::CRONTAB_MODE);
            tokio::fs::set_permissions(&self.crontab_path, permissions).await?;
        }

        info!("已写入调度文件: {}", self.crontab_path.display());
        Ok(())
    }

    fn snapshot(state: PersistedState) -> StateSnapshot {
        let next_run_at = compute_next_run(&state.schedule, Utc::now());
        StateSnapshot { state, next_run_at }
    }

    async fn read_unlocked(&self) -> Result<PersistedState> {
        let defaults = self.default_state();
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(defaults);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let stored: Map<String, Value> = serde_json::from_str(&content)?;

        // 以默认值为底，只覆盖已知键
        let mut merged = match serde_json::to_value(&defaults)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in stored {
            if merged.contains_key(&key) {
                merged.insert(key, value);
            }
        }

        Ok(serde_json::from_value(Value::Object(merged))?)
    }

    async fn write_unlocked(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// 生成 crontab 行
pub fn schedule_line(settings: &ScheduleSettings, command: &str) -> String {
    if settings.enabled && !settings.cron.trim().is_empty() {
        format!("{} {}\n", settings.cron.trim(), command)
    } else {
        format!("{}\n", schedule::DISABLED_MARKER)
    }
}
