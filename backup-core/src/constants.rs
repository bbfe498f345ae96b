/// 图数据库连接相关常量
pub mod graph {
    /// 默认主机名
    pub const DEFAULT_HOST: &str = "neo4j";

    /// 默认 Bolt 端口（仅用于日志与元数据展示）
    pub const DEFAULT_BOLT_PORT: u16 = 7687;

    /// 默认 HTTP 端口（事务接口）
    pub const DEFAULT_HTTP_PORT: u16 = 7474;

    /// 默认协议
    pub const DEFAULT_SCHEME: &str = "http";

    /// 默认用户名
    pub const DEFAULT_USER: &str = "neo4j";

    /// 默认数据库名
    pub const DEFAULT_DATABASE: &str = "neo4j";

    /// 单次请求超时（秒），导出全量数据可能很慢
    pub const REQUEST_TIMEOUT_SECS: u64 = 3600;

    /// 分页读取节点/关系时的页大小
    pub const EXPORT_PAGE_SIZE: u64 = 1000;

    /// 每导出多少条记录打印一次进度
    pub const EXPORT_LOG_INTERVAL: u64 = 1000;
}

/// 对象存储相关常量
pub mod storage {
    /// R2 使用固定的 region
    pub const R2_REGION: &str = "auto";

    /// 构造 R2 端点地址
    pub fn r2_endpoint(account_id: &str) -> String {
        format!("https://{account_id}.r2.cloudflarestorage.com")
    }
}

/// 备份相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 默认远端前缀
    pub const DEFAULT_PREFIX: &str = "neo4j-backup";

    /// 导出文件扩展名
    pub const CYPHER_EXTENSION: &str = ".cypher";

    /// 压缩后的导出文件扩展名
    pub const COMPRESSED_EXTENSION: &str = ".cypher.gz";

    /// gzip 后缀
    pub const GZIP_SUFFIX: &str = ".gz";

    /// 备份文件名中的时间戳格式
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

    /// 压缩级别 (0-9)
    pub const COMPRESSION_LEVEL: u32 = 6;

    /// 图摘要中标签/关系类型的最大条数
    pub const SUMMARY_LIST_LIMIT: usize = 10;

    /// 默认保留天数
    pub const DEFAULT_RETENTION_DAYS: u32 = 7;

    /// 默认本地工作目录
    pub const DEFAULT_WORK_DIR: &str = "/backups";

    /// 获取默认本地工作目录
    pub fn get_default_work_dir() -> PathBuf {
        Path::new(DEFAULT_WORK_DIR).to_path_buf()
    }

    /// 对象元数据键
    pub mod metadata {
        pub const BACKUP_DATE: &str = "backup-date";
        pub const DATABASE: &str = "database";
        pub const HOST: &str = "host";
        pub const NODES: &str = "meta-nodes";
        pub const RELATIONSHIPS: &str = "meta-relationships";
        pub const LABELS: &str = "meta-labels";
        pub const REL_TYPES: &str = "meta-rel-types";

        /// 列表类元数据的分隔符
        pub const LIST_SEPARATOR: char = '|';
    }
}

/// 恢复相关常量
pub mod restore {
    /// 恢复临时目录名（位于备份工作目录下）
    pub const TEMP_DIR_NAME: &str = "restore-temp";

    /// 每回放多少条语句持久化一次进度
    pub const PROGRESS_CHECKPOINT_INTERVAL: u64 = 500;
}

/// 任务控制相关常量
pub mod jobs {
    /// 状态文件中的 running 超过该时长视为进程异常退出的残留
    pub const STALE_RUNNING_HOURS: i64 = 24;
}

/// 调度与运行状态相关常量
pub mod schedule {
    /// 默认自动备份cron表达式（每天凌晨2点）
    pub const DEFAULT_BACKUP_CRON: &str = "0 2 * * *";

    /// Cron表达式字段数量
    pub const CRON_FIELDS_COUNT: usize = 5;

    /// 默认状态文件路径
    pub const DEFAULT_STATE_PATH: &str = "/app/data/backup_settings.json";

    /// 默认 crontab 文件路径
    pub const DEFAULT_CRONTAB_PATH: &str = "/var/spool/cron/crontabs/root";

    /// 默认由调度器调用的备份命令
    pub const DEFAULT_BACKUP_COMMAND: &str =
        "/usr/local/bin/graph-backup backup > /proc/1/fd/1 2>&1";

    /// 禁用调度时写入的标记行
    pub const DISABLED_MARKER: &str = "# Backups disabled";

    /// crontab 文件权限（仅所有者可读写）
    pub const CRONTAB_MODE: u32 = 0o600;

    /// 向后搜索下一次触发时间的最大范围（天）
    pub const NEXT_RUN_SEARCH_DAYS: i64 = 366 * 5;
}

/// 应用配置相关常量
pub mod config {
    /// 默认配置文件名（按顺序查找）
    pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["graph-backup.toml", ".graph-backup.toml"];
}
