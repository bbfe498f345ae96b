use crate::transfer::TransferError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("缺少必要配置: {}", missing.join(", "))]
    ConfigurationInvalid { missing: Vec<String> },

    #[error("对象存储不可达 (bucket: {bucket}): {source}")]
    StorageUnreachable {
        bucket: String,
        #[source]
        source: TransferError,
    },

    #[error("导出失败: {0}")]
    ExportFailed(String),

    #[error("压缩失败: {0}")]
    CompressionFailed(String),

    #[error("上传失败: {0}")]
    UploadFailed(String),

    #[error("下载失败: {0}")]
    DownloadFailed(String),

    #[error("语句回放失败 (已执行 {applied} 条): {message}")]
    ReplayFailed { applied: u64, message: String },

    #[error("{0}")]
    Conflict(String),

    #[error("任务失败: {0}")]
    JobFailed(String),

    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),

    #[error("图数据库错误: {0}")]
    Graph(String),

    #[error("对象存储错误: {0}")]
    Transfer(#[from] TransferError),

    #[error("配置文件解析错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackupError {
    pub fn export(msg: impl Into<String>) -> Self {
        Self::ExportFailed(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::CompressionFailed(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_schedule(msg: impl Into<String>) -> Self {
        Self::InvalidSchedule(msg.into())
    }

    /// 是否为单任务互斥冲突（调用方通常映射为 409）
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// 远端对象或 bucket 不存在（调用方通常映射为 404）
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transfer(e) => e.is_not_found(),
            Self::StorageUnreachable { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
