use crate::app::CliApp;
use crate::project_info::get_version_string;
use crate::utils::format_time;
use graph_backup_core::Result;
use tracing::info;

/// 显示备份/恢复运行状态
pub async fn run_status(app: &CliApp, json: bool) -> Result<()> {
    let status = app.service.status().await?;
    let restore = app.service.restore_status().await?;

    if json {
        let combined = serde_json::json!({
            "service": status,
            "restore": restore,
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    let schedule = status.settings.schedule();
    let runtime = status.settings.runtime();

    info!("📊 {} 状态", get_version_string());
    info!("==================");
    info!("📋 基本信息:");
    info!(
        "   图数据库: {}:{} ({})",
        app.config.graph.host, app.config.graph.bolt_port, app.config.graph.database
    );
    info!("   对象存储: {}/{}", app.config.storage.bucket, app.config.backup.prefix);

    info!("⏰ 调度:");
    info!("   定时备份: {}", if schedule.enabled { "已启用" } else { "已禁用" });
    info!("   cron 表达式: {} (UTC)", schedule.cron);
    info!("   保留天数: {}", schedule.retention_days);
    info!("   下一次运行: {}", format_time(status.settings.next_run_at));

    info!("💾 最近一次备份:");
    info!("   状态: {:?}", runtime.last_status);
    info!("   时间: {}", format_time(runtime.last_run_at));
    if let Some(id) = &runtime.last_backup_id {
        info!("   备份键: {}", id);
    }
    if let Some(error) = &runtime.last_error {
        info!("   错误: {}", error);
    }

    info!("♻️  最近一次恢复:");
    info!("   状态: {:?} (阶段: {:?})", restore.last_restore_status, restore.restore_phase);
    if let Some(id) = &restore.last_restore_id {
        info!("   备份键: {}", id);
    }
    info!("   开始: {}", format_time(restore.restore_started_at));
    info!("   结束: {}", format_time(restore.restore_completed_at));
    if let Some(total) = restore.restore_total_statements {
        info!("   进度: {}/{}", restore.restore_progress, total);
    }
    if let Some(error) = &restore.last_restore_error {
        info!("   错误: {}", error);
    }
    Ok(())
}
