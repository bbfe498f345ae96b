use crate::app::CliApp;
use crate::project_info::get_version_string;
use crate::utils::format_time;
use graph_backup_core::Result;
use tracing::{info, warn};

/// 服务启动时的初始化：补齐状态文件、按当前调度写入 crontab
pub async fn run_init(app: &CliApp) -> Result<()> {
    info!("🚀 {} 初始化", get_version_string());
    info!("======================");

    let missing = app.config.missing_required();
    if !missing.is_empty() {
        warn!("⚠️  以下配置缺失，备份与恢复将会失败: {}", missing.join(", "));
    }

    let snapshot = app.service.init().await?;
    let schedule = snapshot.schedule();

    info!("📋 当前调度配置:");
    info!("   状态文件: {}", app.config.schedule.state_path.display());
    info!("   调度文件: {}", app.config.schedule.crontab_path.display());
    info!("   定时备份: {}", if schedule.enabled { "已启用" } else { "已禁用" });
    info!("   cron 表达式: {}", schedule.cron);
    info!("   保留天数: {}", schedule.retention_days);
    info!("   下一次运行: {}", format_time(snapshot.next_run_at));
    info!("✅ 初始化完成");
    Ok(())
}
