use chrono::{DateTime, Utc};
use graph_backup_core::Result;
use std::io::Write;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

/// # Graph Backup 日志系统使用说明
///
/// 库代码只使用 `tracing` 宏，日志配置由 `main.rs` 调用 `setup_logging()` 完成。
///
/// ## 日志配置选项
/// - `-v, --verbose`：启用详细日志模式（DEBUG 级别）
/// - `RUST_LOG`：标准的 Rust 日志级别控制
/// - `GRAPH_BACKUP_LOG_FILE`：日志文件路径，设置后日志追加到文件而非终端
///
/// ```bash
/// # 定时任务中运行，输出写到容器日志
/// graph-backup backup
///
/// # 日志输出到文件
/// GRAPH_BACKUP_LOG_FILE=/var/log/graph-backup.log graph-backup backup
///
/// # 只看恢复流水线的调试日志
/// RUST_LOG=graph_backup_core::restore=debug graph-backup restore <key>
/// ```
///
/// 返回的 guard 需要保持到进程结束，否则文件日志可能丢失末尾内容。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Ok(log_file) = std::env::var("GRAPH_BACKUP_LOG_FILE") {
        // 输出到文件 - 使用详细格式便于排查
        let path = Path::new(&log_file);
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "graph-backup.log".to_string());

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        fmt()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();
        Some(guard)
    } else {
        // 输出到终端 - 使用简洁格式
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .compact()
            .init();
        None
    }
}

/// 人类可读的文件大小
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.1}GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.1}MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.1}KB", size as f64 / KB as f64)
    } else {
        format!("{size}B")
    }
}

pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// 交互式确认，只有输入 y 才返回 true
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (y/N): ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
