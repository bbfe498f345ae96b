//! 后台任务控制器：每类任务同一时间最多一个在运行。

use crate::backup::{BackupPipeline, BackupResult};
use crate::constants::backup::DEFAULT_RETENTION_DAYS;
use crate::error::{BackupError, Result};
use crate::restore::{RestorePipeline, RestoreResult};
use crate::state::{JobStatus, RestorePhase, RuntimeStateStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Backup,
    Restore,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Restore => "restore",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务没有正常返回的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobInterruption {
    Cancelled,
    Panicked,
}

impl fmt::Display for JobInterruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobInterruption::Cancelled => f.write_str("任务已被取消"),
            JobInterruption::Panicked => f.write_str("任务异常终止 (panic)"),
        }
    }
}

#[derive(Debug)]
struct ActiveJob {
    job_id: String,
    abort: Option<AbortHandle>,
}

/// 监督任务结束时清空运行槽位
struct RunningGuard {
    slot: Arc<Mutex<Option<ActiveJob>>>,
    running: Arc<watch::Sender<bool>>,
    job_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|job| job.job_id == self.job_id) {
            *slot = None;
            self.running.send_replace(false);
        }
    }
}

/// 单任务互斥的后台执行器
#[derive(Debug)]
pub struct JobController {
    kind: JobKind,
    slot: Arc<Mutex<Option<ActiveJob>>>,
    running: Arc<watch::Sender<bool>>,
}

impl JobController {
    pub fn new(kind: JobKind) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            kind,
            slot: Arc::new(Mutex::new(None)),
            running: Arc::new(running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|job| job.job_id.clone())
    }

    /// 启动任务；已有同类任务在运行时返回 Conflict，不改变任何状态
    ///
    /// 任务被取消或 panic 时先执行 `on_interrupted`，之后才释放槽位，
    /// 因此 `wait` 返回时最终状态已经写入。
    pub fn trigger<F, Fut, H, HFut>(&self, task: F, on_interrupted: H) -> Result<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
        H: FnOnce(JobInterruption) -> HFut + Send + 'static,
        HFut: Future<Output = ()> + Send + 'static,
    {
        let guard = {
            let mut slot = self.slot.lock();
            if let Some(active) = slot.as_ref() {
                return Err(BackupError::conflict(format!(
                    "{} 任务正在运行中: {}",
                    self.kind, active.job_id
                )));
            }
            let job_id = format!("{}-{}", self.kind, Utc::now().timestamp());
            *slot = Some(ActiveJob {
                job_id: job_id.clone(),
                abort: None,
            });
            self.running.send_replace(true);
            RunningGuard {
                slot: self.slot.clone(),
                running: self.running.clone(),
                job_id,
            }
        };

        let job_id = guard.job_id.clone();
        let worker = tokio::spawn(task(job_id.clone()));
        if let Some(active) = self.slot.lock().as_mut() {
            active.abort = Some(worker.abort_handle());
        }

        let kind = self.kind;
        let supervised_id = job_id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = worker.await {
                let interruption = if e.is_panic() {
                    JobInterruption::Panicked
                } else {
                    JobInterruption::Cancelled
                };
                error!("{} 任务 {} 未正常结束: {}", kind, supervised_id, interruption);
                on_interrupted(interruption).await;
            }
        });

        info!("已启动 {} 任务: {}", self.kind, job_id);
        Ok(job_id)
    }

    /// 取消正在运行的任务（进程退出时使用），不做任何回滚
    pub fn stop(&self) -> bool {
        let abort = self
            .slot
            .lock()
            .as_ref()
            .and_then(|job| job.abort.clone());
        match abort {
            Some(abort) => {
                warn!("取消 {} 任务", self.kind);
                abort.abort();
                true
            }
            None => false,
        }
    }

    /// 等待当前任务结束
    pub async fn wait(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }
}

/// 备份任务控制器
pub struct BackupController {
    jobs: JobController,
    pipeline: Arc<BackupPipeline>,
    state: Arc<RuntimeStateStore>,
}

impl BackupController {
    pub fn new(pipeline: Arc<BackupPipeline>, state: Arc<RuntimeStateStore>) -> Self {
        Self {
            jobs: JobController::new(JobKind::Backup),
            pipeline,
            state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.jobs.is_running()
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.jobs.current_job_id()
    }

    pub fn stop(&self) -> bool {
        self.jobs.stop()
    }

    pub async fn wait(&self) {
        self.jobs.wait().await
    }

    pub fn trigger(&self, description: Option<String>) -> Result<String> {
        let pipeline = self.pipeline.clone();
        let state = self.state.clone();
        let interrupted_state = self.state.clone();
        let task = move |job_id: String| async move {
            info!(job_id = %job_id, description = ?description, "备份任务开始");
            let started_at = Utc::now();
            if let Err(e) = state
                .update_runtime(|rt| {
                    rt.last_status = JobStatus::Running;
                    rt.last_run_at = Some(started_at);
                    rt.last_backup_id = None;
                    rt.last_error = None;
                })
                .await
            {
                error!("记录备份状态失败: {}", e);
            }

            let retention_days = match state.load().await {
                Ok(snapshot) => snapshot.schedule().retention_days,
                Err(e) => {
                    warn!("读取保留天数失败，使用默认值: {}", e);
                    DEFAULT_RETENTION_DAYS
                }
            };

            let result = pipeline.run(retention_days).await;
            record_backup_result(&state, &result).await;
        };
        self.jobs.trigger(task, move |interruption| async move {
            record_backup_interrupted(&interrupted_state, interruption).await;
        })
    }
}

async fn record_backup_result(state: &RuntimeStateStore, result: &BackupResult) {
    let outcome = state
        .update_runtime(|rt| {
            rt.last_run_at = Some(result.completed_at);
            if result.success {
                rt.last_status = JobStatus::Completed;
                rt.last_backup_id = result.remote_key.clone();
                rt.last_error = None;
            } else {
                rt.last_status = JobStatus::Failed;
                rt.last_error = result.error.clone();
            }
        })
        .await;
    if let Err(e) = outcome {
        error!("记录备份结果失败: {}", e);
    }
}

async fn record_backup_interrupted(state: &RuntimeStateStore, interruption: JobInterruption) {
    let outcome = state
        .update_runtime(|rt| {
            rt.last_run_at = Some(Utc::now());
            rt.last_status = JobStatus::Failed;
            rt.last_error = Some(interruption.to_string());
        })
        .await;
    if let Err(e) = outcome {
        error!("记录备份结果失败: {}", e);
    }
}

/// 恢复任务控制器
pub struct RestoreController {
    jobs: JobController,
    pipeline: Arc<RestorePipeline>,
    state: Arc<RuntimeStateStore>,
}

impl RestoreController {
    pub fn new(pipeline: Arc<RestorePipeline>, state: Arc<RuntimeStateStore>) -> Self {
        Self {
            jobs: JobController::new(JobKind::Restore),
            pipeline,
            state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.jobs.is_running()
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.jobs.current_job_id()
    }

    pub fn stop(&self) -> bool {
        self.jobs.stop()
    }

    pub async fn wait(&self) {
        self.jobs.wait().await
    }

    /// 启动恢复；备份运行中时拒绝（只在触发时检查一次）
    pub fn trigger(&self, backup_key: &str, backups: &BackupController) -> Result<String> {
        if backups.is_running() {
            return Err(BackupError::conflict("备份进行中，无法同时恢复"));
        }

        let pipeline = self.pipeline.clone();
        let state = self.state.clone();
        let interrupted_state = self.state.clone();
        let backup_key = backup_key.to_string();
        let task = move |job_id: String| async move {
            info!(job_id = %job_id, backup_key = %backup_key, "恢复任务开始");
            let started_at = Utc::now();
            if let Err(e) = state
                .update_runtime(|rt| {
                    rt.last_restore_status = JobStatus::Running;
                    rt.restore_started_at = Some(started_at);
                    rt.restore_completed_at = None;
                    rt.last_restore_id = Some(backup_key.clone());
                    rt.last_restore_error = None;
                    rt.restore_statements_applied = None;
                    rt.restore_total_statements = None;
                    rt.restore_phase = RestorePhase::Downloading;
                    rt.restore_progress = 0;
                })
                .await
            {
                error!("记录恢复状态失败: {}", e);
            }

            let result = pipeline.run(&backup_key).await;
            record_restore_result(&state, &result).await;
        };
        self.jobs.trigger(task, move |interruption| async move {
            record_restore_interrupted(&interrupted_state, interruption).await;
        })
    }
}

async fn record_restore_result(state: &RuntimeStateStore, result: &RestoreResult) {
    let outcome = state
        .update_runtime(|rt| {
            rt.restore_completed_at = Some(result.completed_at);
            rt.restore_statements_applied = result.statements_applied;
            rt.restore_progress = result.statements_applied.unwrap_or(0);
            if result.success {
                rt.last_restore_status = JobStatus::Completed;
                rt.restore_phase = RestorePhase::Completed;
            } else {
                rt.last_restore_status = JobStatus::Failed;
                rt.restore_phase = RestorePhase::Failed;
                rt.last_restore_error = result.error.clone();
            }
        })
        .await;
    if let Err(e) = outcome {
        error!("记录恢复结果失败: {}", e);
    }
}

/// 进度停在最后一个检查点，不做回滚
async fn record_restore_interrupted(state: &RuntimeStateStore, interruption: JobInterruption) {
    let outcome = state
        .update_runtime(|rt| {
            if rt.restore_phase == RestorePhase::Replaying {
                rt.restore_statements_applied = Some(rt.restore_progress);
            }
            rt.restore_completed_at = Some(Utc::now());
            rt.last_restore_status = JobStatus::Failed;
            rt.restore_phase = RestorePhase::Failed;
            rt.last_restore_error = Some(interruption.to_string());
        })
        .await;
    if let Err(e) = outcome {
        error!("记录恢复结果失败: {}", e);
    }
}
