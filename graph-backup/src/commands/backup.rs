use crate::app::CliApp;
use crate::utils::confirm;
use graph_backup_core::{BackupError, JobStatus, Result};
use tracing::{info, warn};

/// 前台执行一次备份，失败时返回错误（进程以状态码 1 退出）
pub async fn run_backup(app: &CliApp, description: Option<String>) -> Result<()> {
    info!("💾 开始图数据库备份");
    info!("===============");

    let job_id = app.service.start_backup(description).await?;
    info!("任务 ID: {}", job_id);

    tokio::select! {
        _ = app.service.wait_backup() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("⚠️  收到中断信号，取消备份任务");
            app.service.shutdown();
            app.service.wait_backup().await;
            return Err(BackupError::job_failed("备份被中断"));
        }
    }

    let status = app.service.status().await?;
    let runtime = status.settings.runtime();
    match runtime.last_status {
        JobStatus::Completed => {
            info!(
                "✅ 备份完成: {}",
                runtime.last_backup_id.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        _ => Err(BackupError::job_failed(
            runtime
                .last_error
                .clone()
                .unwrap_or_else(|| "未知错误".to_string()),
        )),
    }
}

/// 前台执行恢复；当前数据库会被清空，默认需要确认
pub async fn run_restore(app: &CliApp, backup_key: &str, force: bool) -> Result<()> {
    if !force {
        warn!("⚠️  警告: 此操作将删除当前数据库中的所有约束、索引和数据!");
        if !confirm(&format!("请确认您要从备份 {backup_key} 恢复"))? {
            warn!("操作已取消");
            return Ok(());
        }
    }

    info!("♻️  开始从备份恢复: {}", backup_key);
    let job_id = app.service.start_restore(backup_key).await?;
    info!("任务 ID: {}", job_id);

    tokio::select! {
        _ = app.service.wait_restore() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("⚠️  收到中断信号，取消恢复任务，数据库可能只恢复了一部分");
            app.service.shutdown();
            app.service.wait_restore().await;
            return Err(BackupError::job_failed("恢复被中断"));
        }
    }

    let status = app.service.restore_status().await?;
    let applied = status.restore_statements_applied.unwrap_or(0);
    let total = status
        .restore_total_statements
        .map(|t| t.to_string())
        .unwrap_or_else(|| "?".to_string());

    match status.last_restore_status {
        JobStatus::Completed => {
            info!("✅ 恢复完成，共执行 {}/{} 条语句", applied, total);
            Ok(())
        }
        _ => {
            warn!("已执行 {}/{} 条语句后失败，已执行的语句不会回滚", applied, total);
            Err(BackupError::job_failed(
                status
                    .last_restore_error
                    .unwrap_or_else(|| "未知错误".to_string()),
            ))
        }
    }
}
