use crate::app::CliApp;
use crate::utils::format_time;
use graph_backup_core::{Result, ScheduleSettings};
use tracing::info;

/// 显示当前调度配置
pub async fn show_schedule(app: &CliApp) -> Result<()> {
    let snapshot = app.service.schedule().await?;
    let schedule = snapshot.schedule();

    info!("⏰ 定时备份配置");
    info!("===============");
    info!("   状态: {}", if schedule.enabled { "✅ 已启用" } else { "❌ 已禁用" });
    info!("   cron 表达式: {} (UTC)", schedule.cron);
    info!("   保留天数: {}", schedule.retention_days);
    info!("   下一次运行: {}", format_time(snapshot.next_run_at));
    Ok(())
}

/// 在当前配置上叠加命令行指定的项
pub fn merge_schedule(
    current: &ScheduleSettings,
    enabled: Option<bool>,
    cron: Option<String>,
    retention_days: Option<u32>,
) -> ScheduleSettings {
    ScheduleSettings {
        enabled: enabled.unwrap_or(current.enabled),
        cron: cron.unwrap_or_else(|| current.cron.clone()),
        retention_days: retention_days.unwrap_or(current.retention_days),
    }
}

/// 更新调度配置并重写 crontab
pub async fn set_schedule(
    app: &CliApp,
    enabled: Option<bool>,
    cron: Option<String>,
    retention_days: Option<u32>,
) -> Result<()> {
    let current = app.service.schedule().await?;
    let settings = merge_schedule(current.schedule(), enabled, cron, retention_days);

    let snapshot = app.service.update_schedule(settings).await?;
    info!("✅ 调度配置已更新");
    info!("   下一次运行: {}", format_time(snapshot.next_run_at));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_schedule_keeps_unspecified_values() {
        let current = ScheduleSettings {
            enabled: true,
            cron: "0 2 * * *".to_string(),
            retention_days: 7,
        };

        let merged = merge_schedule(&current, None, None, Some(30));
        assert_eq!(merged.cron, "0 2 * * *");
        assert!(merged.enabled);
        assert_eq!(merged.retention_days, 30);

        let merged = merge_schedule(&current, Some(false), Some("30 4 * * 1".to_string()), None);
        assert!(!merged.enabled);
        assert_eq!(merged.cron, "30 4 * * 1");
        assert_eq!(merged.retention_days, 7);
    }
}
