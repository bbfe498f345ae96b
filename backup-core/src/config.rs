use crate::constants::{backup, config, graph, schedule, storage};
use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub graph: GraphConfig,
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub schedule: ScheduleConfig,
}

/// 图数据库连接配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    pub scheme: String,
    pub host: String,
    pub bolt_port: u16,
    pub http_port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// 对象存储配置（S3 兼容，默认按 Cloudflare R2 处理）
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub account_id: String,
    /// 显式端点，设置后忽略 account_id 推导
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: Option<String>,
    /// 允许 http 端点（本地 MinIO 等）
    pub allow_http: bool,
}

/// 备份流程配置
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub work_dir: PathBuf,
    pub prefix: String,
    pub compression_enabled: bool,
}

/// 调度配置；enabled/cron/retention_days 只作为状态文件首次创建时的默认值
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub cron: String,
    pub retention_days: u32,
    pub state_path: PathBuf,
    pub crontab_path: PathBuf,
    pub command: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            scheme: graph::DEFAULT_SCHEME.to_string(),
            host: graph::DEFAULT_HOST.to_string(),
            bolt_port: graph::DEFAULT_BOLT_PORT,
            http_port: graph::DEFAULT_HTTP_PORT,
            user: graph::DEFAULT_USER.to_string(),
            password: String::new(),
            database: graph::DEFAULT_DATABASE.to_string(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            work_dir: backup::get_default_work_dir(),
            prefix: backup::DEFAULT_PREFIX.to_string(),
            compression_enabled: true,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: schedule::DEFAULT_BACKUP_CRON.to_string(),
            retention_days: backup::DEFAULT_RETENTION_DAYS,
            state_path: PathBuf::from(schedule::DEFAULT_STATE_PATH),
            crontab_path: PathBuf::from(schedule::DEFAULT_CRONTAB_PATH),
            command: schedule::DEFAULT_BACKUP_COMMAND.to_string(),
        }
    }
}

impl GraphConfig {
    /// HTTP 事务接口的基础地址
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.http_port)
    }
}

impl StorageConfig {
    /// 实际使用的端点：显式端点优先，否则由 R2 账号推导
    pub fn endpoint_url(&self) -> Option<String> {
        match &self.endpoint {
            Some(endpoint) if !endpoint.is_empty() => Some(endpoint.clone()),
            _ if !self.account_id.is_empty() => Some(storage::r2_endpoint(&self.account_id)),
            _ => None,
        }
    }
}

impl AppConfig {
    /// 加载配置：显式路径 -> 候选文件 -> 默认值，最后叠加环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::find_config_file()
                .map(|found| {
                    tracing::info!("找到配置文件: {}", found.display());
                    Self::load_from_file(&found)
                })
                .transpose()?
                .unwrap_or_default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn find_config_file() -> Option<PathBuf> {
        config::CONFIG_FILE_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// 用外部键值（通常是环境变量）覆盖配置
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key) {
                *target = value;
            }
        };

        text("NEO4J_HOST", &mut self.graph.host);
        text("NEO4J_USER", &mut self.graph.user);
        text("NEO4J_PASSWORD", &mut self.graph.password);
        text("NEO4J_DATABASE", &mut self.graph.database);
        text("NEO4J_SCHEME", &mut self.graph.scheme);
        if let Some(port) = lookup("NEO4J_BOLT_PORT").and_then(|v| v.parse().ok()) {
            self.graph.bolt_port = port;
        }
        if let Some(port) = lookup("NEO4J_HTTP_PORT").and_then(|v| v.parse().ok()) {
            self.graph.http_port = port;
        }

        text("R2_ACCOUNT_ID", &mut self.storage.account_id);
        text("R2_ACCESS_KEY_ID", &mut self.storage.access_key_id);
        text("R2_SECRET_ACCESS_KEY", &mut self.storage.secret_access_key);
        text("R2_BUCKET_NAME", &mut self.storage.bucket);
        if let Some(endpoint) = lookup("R2_ENDPOINT") {
            self.storage.endpoint = Some(endpoint);
        }

        text("BACKUP_PREFIX", &mut self.backup.prefix);
        if let Some(dir) = lookup("BACKUP_DIR") {
            self.backup.work_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup("BACKUP_COMPRESSION") {
            self.backup.compression_enabled = flag.eq_ignore_ascii_case("true");
        }

        if let Some(flag) = lookup("BACKUP_ENABLED") {
            self.schedule.enabled = !flag.eq_ignore_ascii_case("false");
        }
        text("BACKUP_SCHEDULE", &mut self.schedule.cron);
        if let Some(days) = lookup("BACKUP_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            self.schedule.retention_days = days;
        }
        if let Some(path) = lookup("BACKUP_CONFIG_PATH") {
            self.schedule.state_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("BACKUP_CRONTAB_PATH") {
            self.schedule.crontab_path = PathBuf::from(path);
        }
        text("BACKUP_COMMAND", &mut self.schedule.command);
    }

    /// 返回缺失的必要配置项（以环境变量名表示）
    pub fn missing_required(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.graph.password.is_empty() {
            missing.push("NEO4J_PASSWORD".to_string());
        }
        if self.storage.endpoint_url().is_none() {
            missing.push("R2_ACCOUNT_ID".to_string());
        }
        if self.storage.access_key_id.is_empty() {
            missing.push("R2_ACCESS_KEY_ID".to_string());
        }
        if self.storage.secret_access_key.is_empty() {
            missing.push("R2_SECRET_ACCESS_KEY".to_string());
        }
        if self.storage.bucket.is_empty() {
            missing.push("R2_BUCKET_NAME".to_string());
        }
        missing
    }

    /// 校验必要配置
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            tracing::error!("缺少必要配置: {}", missing.join(", "));
            Err(BackupError::ConfigurationInvalid { missing })
        }
    }
}
