use crate::app::CliApp;
use crate::utils::{confirm, format_size, format_time};
use graph_backup_core::catalog::file_name_of;
use graph_backup_core::{JobStatus, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// 列出远端备份
pub async fn run_list_backups(app: &CliApp, json: bool) -> Result<()> {
    let history = app.service.history().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        info!("📦 暂无备份记录");
        info!("💡 使用以下命令创建备份:");
        info!("   graph-backup backup");
        return Ok(());
    }

    info!("📦 备份列表 ({}/{})", app.config.storage.bucket, app.config.backup.prefix);
    info!("============");
    info!(
        "{:<10} {:<24} {:<10} {:<10} {:<10} {}",
        "状态", "时间", "大小", "节点", "关系", "备份键"
    );
    info!("{}", "-".repeat(110));

    let mut total_size = 0u64;
    for entry in &history {
        let status = match entry.status {
            JobStatus::Running => "运行中",
            _ => "已完成",
        };
        let size = entry.size_bytes.inspect(|s| total_size += s);
        info!(
            "{:<10} {:<24} {:<10} {:<10} {:<10} {}",
            status,
            format_time(Some(entry.started_at)),
            size.map(format_size).unwrap_or_else(|| "-".to_string()),
            entry
                .node_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry
                .relationship_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry.id
        );
        if let Some(labels) = &entry.labels {
            info!("{:<10} 标签: {}", "", labels.join(", "));
        }
        if let Some(types) = &entry.relationship_types {
            info!("{:<10} 关系类型: {}", "", types.join(", "));
        }
    }

    info!("{}", "-".repeat(110));
    info!("共 {} 个备份，合计 {}", history.len(), format_size(total_size));
    Ok(())
}

/// 下载单个备份
pub async fn run_download(app: &CliApp, backup_key: &str, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| PathBuf::from(file_name_of(backup_key)));
    info!("⬇️  下载备份 {} -> {}", backup_key, output.display());

    match app.service.download(backup_key, &output).await {
        Ok(size) => {
            info!("✅ 下载完成 ({})", format_size(size));
            Ok(())
        }
        Err(e) => {
            if e.is_not_found() {
                error!("❌ 备份不存在: {}", backup_key);
            }
            Err(e)
        }
    }
}

/// 删除单个备份
pub async fn run_delete(app: &CliApp, backup_key: &str, force: bool) -> Result<()> {
    if !force && !confirm(&format!("确认删除远端备份 {backup_key}"))? {
        warn!("操作已取消");
        return Ok(());
    }

    match app.service.delete(backup_key).await {
        Ok(()) => {
            info!("🗑️  已删除: {}", backup_key);
            Ok(())
        }
        Err(e) => {
            if e.is_not_found() {
                error!("❌ 备份不存在: {}", backup_key);
            }
            Err(e)
        }
    }
}
