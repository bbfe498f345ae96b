/// Graph Backup 项目信息模块
///
/// graph-backup 是面向运维的主程序，项目元数据统一在这里定义，
/// graph-backup-core 作为内部库只提供技术性常量

/// 项目元数据（自动从 Cargo.toml 同步）
pub mod metadata {
    /// 项目名称
    pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

    /// 项目描述
    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    /// 项目作者
    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    /// 用户友好的显示名称
    pub mod display {
        pub const FRIENDLY_NAME: &str = "Graph Backup";

        /// 项目详细描述
        pub const DESCRIPTION_LONG: &str = "Neo4j 图数据库的定时备份与恢复工具：导出为 Cypher 脚本、gzip 压缩后上传到 S3 兼容存储（Cloudflare R2），按保留天数清理过期备份，并支持从任意备份整体恢复";
    }
}

/// 版本信息
pub mod version_info {
    /// CLI 版本
    pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// 获取版本信息字符串
pub fn get_version_string() -> String {
    format!(
        "{} v{}",
        metadata::display::FRIENDLY_NAME,
        version_info::CLI_VERSION
    )
}
