use graph_backup_core::{AppConfig, BackupService, Result};
use std::path::Path;

use crate::cli::{Commands, ScheduleCommand};
use crate::commands;
use crate::init::run_init;

pub struct CliApp {
    pub config: AppConfig,
    pub service: BackupService,
}

impl CliApp {
    /// 加载配置（显式路径 -> 默认文件 -> 内置默认值，环境变量优先）并组装服务
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = AppConfig::load(config_path)?;
        let missing = config.missing_required();
        if !missing.is_empty() {
            tracing::warn!("⚠️  缺少必要配置: {}", missing.join(", "));
        }
        let service = BackupService::from_config(config.clone())?;
        Ok(Self { config, service })
    }

    /// 运行应用命令
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init => run_init(self).await,
            Commands::Backup { description } => commands::run_backup(self, description).await,
            Commands::Restore { backup_key, force } => {
                commands::run_restore(self, &backup_key, force).await
            }
            Commands::List { json } => commands::run_list_backups(self, json).await,
            Commands::Download { backup_key, output } => {
                commands::run_download(self, &backup_key, output).await
            }
            Commands::Delete { backup_key, force } => {
                commands::run_delete(self, &backup_key, force).await
            }
            Commands::Schedule(cmd) => self.run_schedule_command(cmd).await,
            Commands::Status { json } => commands::run_status(self, json).await,
        }
    }

    async fn run_schedule_command(&self, cmd: ScheduleCommand) -> Result<()> {
        match cmd {
            ScheduleCommand::Show => commands::show_schedule(self).await,
            ScheduleCommand::Set {
                enabled,
                cron,
                retention_days,
            } => commands::set_schedule(self, enabled, cron, retention_days).await,
        }
    }
}
