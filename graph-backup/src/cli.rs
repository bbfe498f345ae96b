use crate::project_info::{metadata, version_info};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 调度配置相关命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 显示当前调度配置与下一次运行时间
    Show,
    /// 更新调度配置并重写 crontab，未指定的项保持原值
    Set {
        /// 是否启用定时备份
        #[arg(long, help = "true 启用，false 禁用")]
        enabled: Option<bool>,
        /// cron 表达式，例如 "0 2 * * *" 表示每天凌晨2点（UTC）
        #[arg(long, help = "cron 表达式，例如 '0 2 * * *' 表示每天凌晨2点（UTC）")]
        cron: Option<String>,
        /// 备份保留天数
        #[arg(long, help = "备份保留天数，至少为 1")]
        retention_days: Option<u32>,
    },
}

/// Graph Backup CLI - 图数据库备份与恢复工具
#[derive(Parser, Debug)]
#[command(name = "graph-backup")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::CLI_VERSION)]
#[command(long_about = metadata::display::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径（默认依次查找 graph-backup.toml、.graph-backup.toml）
    #[arg(short, long, env = "GRAPH_BACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 服务启动时调用：补齐状态文件并按当前配置写入 crontab
    Init,
    /// 立即执行一次备份（定时任务调用的就是这个命令）
    Backup {
        /// 备份说明，仅记录到日志
        #[arg(long)]
        description: Option<String>,
    },
    /// 从远端备份恢复数据库（会先清空当前数据库）
    Restore {
        /// 远端备份键，例如 neo4j-backup/neo4j_2024-02-11_02-00-00.cypher.gz
        backup_key: String,
        /// 跳过确认
        #[arg(long)]
        force: bool,
    },
    /// 列出远端备份，最新的在前
    List {
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 下载单个备份到本地
    Download {
        /// 远端备份键
        backup_key: String,
        /// 输出文件路径（默认当前目录下与备份同名的文件）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 删除单个远端备份
    Delete {
        /// 远端备份键
        backup_key: String,
        /// 跳过确认
        #[arg(long)]
        force: bool,
    },
    /// 调度配置管理
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 显示备份/恢复运行状态
    Status {
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },
}
