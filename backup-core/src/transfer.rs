//! 对象存储传输层。
//!
//! 流水线只依赖 [`TransferClient`] trait；生产环境使用基于 `object_store`
//! 的 S3 兼容实现（Cloudflare R2），测试中可以换成内存存储。

use crate::config::StorageConfig;
use crate::constants::storage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, GetOptions, ObjectStore};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// 传输错误，只区分调用方需要分支处理的几类
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("访问被拒绝: {0}")]
    AccessDenied(String),

    #[error("{0}")]
    Other(String),
}

impl TransferError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// S3 错误码，出现在响应体中
const NOT_FOUND_CODES: [&str; 2] = ["<Code>NoSuchBucket</Code>", "<Code>NoSuchKey</Code>"];
const ACCESS_DENIED_CODES: [&str; 3] = [
    "<Code>AccessDenied</Code>",
    "<Code>InvalidAccessKeyId</Code>",
    "<Code>SignatureDoesNotMatch</Code>",
];

/// HTTP 状态行，形如 `status 403 Forbidden`
const NOT_FOUND_STATUS: &str = "404 Not Found";
const ACCESS_DENIED_STATUS: [&str; 2] = ["403 Forbidden", "401 Unauthorized"];

impl TransferError {
    /// 按 S3 错误码或 HTTP 状态对通用错误文本分类
    fn classify(message: String) -> Self {
        if NOT_FOUND_CODES.iter().any(|code| message.contains(code))
            || message.contains(NOT_FOUND_STATUS)
        {
            Self::NotFound(message)
        } else if ACCESS_DENIED_CODES.iter().any(|code| message.contains(code))
            || ACCESS_DENIED_STATUS.iter().any(|status| message.contains(status))
        {
            Self::AccessDenied(message)
        } else {
            Self::Other(message)
        }
    }
}

impl From<object_store::Error> for TransferError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            object_store::Error::PermissionDenied { path, source }
            | object_store::Error::Unauthenticated { path, source } => {
                Self::AccessDenied(format!("{path}: {source}"))
            }
            other => Self::classify(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(format!("本地文件错误: {err}"))
    }
}

/// 远端对象摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// 对象存储客户端抽象
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// bucket 名称（用于日志和错误信息）
    fn bucket(&self) -> &str;

    /// 检查 bucket 是否可达
    async fn head_bucket(&self) -> TransferResult<()>;

    /// 上传本地文件，附带用户元数据
    async fn upload(
        &self,
        local: &Path,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> TransferResult<()>;

    /// 下载对象到本地文件，返回写入的字节数
    async fn download(&self, key: &str, local: &Path) -> TransferResult<u64>;

    /// 列出前缀下的全部对象
    async fn list_by_prefix(&self, prefix: &str) -> TransferResult<Vec<ObjectSummary>>;

    /// 读取对象的用户元数据
    async fn head_object(&self, key: &str) -> TransferResult<HashMap<String, String>>;

    /// 删除对象
    async fn delete(&self, key: &str) -> TransferResult<()>;
}

/// 基于 `object_store` 的实现
#[derive(Debug, Clone)]
pub struct ObjectStoreTransfer {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreTransfer {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// 按存储配置构造 S3 兼容客户端
    pub fn from_config(config: &StorageConfig) -> TransferResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(config.region.as_deref().unwrap_or(storage::R2_REGION))
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key);

        if let Some(endpoint) = config.endpoint_url() {
            debug!("对象存储端点: {}", endpoint);
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| TransferError::Other(format!("构造 S3 客户端失败: {e}")))?;
        Ok(Self::new(Arc::new(store), &config.bucket))
    }

    fn object_path(key: &str) -> TransferResult<ObjectPath> {
        ObjectPath::parse(key).map_err(|e| TransferError::Other(format!("无效的对象键 '{key}': {e}")))
    }
}

#[async_trait]
impl TransferClient for ObjectStoreTransfer {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_bucket(&self) -> TransferResult<()> {
        self.store.list_with_delimiter(None).await?;
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> TransferResult<()> {
        let mut attributes = Attributes::new();
        for (name, value) in metadata {
            attributes.insert(
                Attribute::Metadata(Cow::Owned(name.clone())),
                AttributeValue::from(value.clone()),
            );
        }

        let mut file = tokio::fs::File::open(local).await?;
        let mut writer =
            BufWriter::new(self.store.clone(), Self::object_path(key)?).with_attributes(attributes);

        let copied = match tokio::io::copy(&mut file, &mut writer).await {
            Ok(copied) => copied,
            Err(e) => {
                let _ = writer.abort().await;
                return Err(TransferError::Other(format!("上传 {key} 失败: {e}")));
            }
        };
        writer
            .shutdown()
            .await
            .map_err(|e| TransferError::Other(format!("上传 {key} 失败: {e}")))?;

        info!("已上传 {} 字节到 {}/{}", copied, self.bucket, key);
        Ok(())
    }

    async fn download(&self, key: &str, local: &Path) -> TransferResult<u64> {
        let result = self.store.get(&Self::object_path(key)?).await?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(local).await?;
        let mut stream = result.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!("已下载 {}/{} ({} 字节)", self.bucket, key, written);
        Ok(written)
    }

    async fn list_by_prefix(&self, prefix: &str) -> TransferResult<Vec<ObjectSummary>> {
        let prefix = ObjectPath::from(prefix);
        let mut stream = self.store.list(Some(&prefix));
        let mut objects = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            objects.push(ObjectSummary {
                key: meta.location.to_string(),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            });
        }
        Ok(objects)
    }

    async fn head_object(&self, key: &str) -> TransferResult<HashMap<String, String>> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self.store.get_opts(&Self::object_path(key)?, options).await?;

        let mut metadata = HashMap::new();
        for (attribute, value) in result.attributes.iter() {
            if let Attribute::Metadata(name) = attribute {
                let text: &str = value.as_ref();
                metadata.insert(name.to_string(), text.to_string());
            }
        }
        Ok(metadata)
    }

    async fn delete(&self, key: &str) -> TransferResult<()> {
        self.store.delete(&Self::object_path(key)?).await?;
        info!("已删除 {}/{}", self.bucket, key);
        Ok(())
    }
}

/// 无法构造真实客户端时的占位实现，所有操作都返回构造时的错误
#[derive(Debug, Clone)]
pub struct DisconnectedTransfer {
    bucket: String,
    reason: String,
}

impl DisconnectedTransfer {
    pub fn new(bucket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> TransferResult<T> {
        Err(TransferError::Other(self.reason.clone()))
    }
}

#[async_trait]
impl TransferClient for DisconnectedTransfer {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_bucket(&self) -> TransferResult<()> {
        self.fail()
    }

    async fn upload(&self, _: &Path, _: &str, _: &HashMap<String, String>) -> TransferResult<()> {
        self.fail()
    }

    async fn download(&self, _: &str, _: &Path) -> TransferResult<u64> {
        self.fail()
    }

    async fn list_by_prefix(&self, _: &str) -> TransferResult<Vec<ObjectSummary>> {
        self.fail()
    }

    async fn head_object(&self, _: &str) -> TransferResult<HashMap<String, String>> {
        self.fail()
    }

    async fn delete(&self, _: &str) -> TransferResult<()> {
        self.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::tempdir;

    fn memory_transfer() -> ObjectStoreTransfer {
        ObjectStoreTransfer::new(Arc::new(InMemory::new()), "test-bucket")
    }

    #[tokio::test]
    async fn test_upload_download_and_metadata() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("source.cypher");
        std::fs::write(&source, "CREATE (n:Person {name: 'a'});\n").unwrap();

        let transfer = memory_transfer();
        let metadata = HashMap::from([
            ("database".to_string(), "neo4j".to_string()),
            ("meta-nodes".to_string(), "1".to_string()),
        ]);
        transfer
            .upload(&source, "neo4j-backup/neo4j_2024-02-11_02-00-00.cypher", &metadata)
            .await
            .unwrap();

        let head = transfer
            .head_object("neo4j-backup/neo4j_2024-02-11_02-00-00.cypher")
            .await
            .unwrap();
        assert_eq!(head, metadata);

        let target = temp_dir.path().join("out").join("restored.cypher");
        let written = transfer
            .download("neo4j-backup/neo4j_2024-02-11_02-00-00.cypher", &target)
            .await
            .unwrap();
        assert_eq!(written, std::fs::metadata(&source).unwrap().len());
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            std::fs::read_to_string(&source).unwrap()
        );
    }

    #[tokio::test]
    async fn test_list_by_prefix_and_delete() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("data");
        std::fs::write(&source, "x").unwrap();

        let transfer = memory_transfer();
        let empty = HashMap::new();
        for key in ["neo4j-backup/a.cypher", "neo4j-backup/b.cypher.gz", "other/c.cypher"] {
            transfer.upload(&source, key, &empty).await.unwrap();
        }

        let mut keys: Vec<String> = transfer
            .list_by_prefix("neo4j-backup/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["neo4j-backup/a.cypher", "neo4j-backup/b.cypher.gz"]);

        transfer.delete("neo4j-backup/a.cypher").await.unwrap();
        let remaining = transfer.list_by_prefix("neo4j-backup/").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].size, 1);
    }

    #[tokio::test]
    async fn test_missing_object_maps_to_not_found() {
        let temp_dir = tempdir().unwrap();
        let transfer = memory_transfer();

        let err = transfer.head_object("neo4j-backup/missing.cypher").await.unwrap_err();
        assert!(err.is_not_found());

        let err = transfer
            .download("neo4j-backup/missing.cypher", &temp_dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_head_bucket_on_reachable_store() {
        assert!(memory_transfer().head_bucket().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnected_transfer_reports_reason() {
        let transfer = DisconnectedTransfer::new("bucket", "Missing bucket name");
        let err = transfer.head_bucket().await.unwrap_err();
        assert!(matches!(err, TransferError::Other(ref m) if m == "Missing bucket name"));
        assert_eq!(transfer.bucket(), "bucket");
    }

    #[test]
    fn test_error_message_mapping() {
        let err = TransferError::from(object_store::Error::Generic {
            store: "S3",
            source: "NoSuchBucket: the bucket does not exist".into(),
        });
        assert!(err.is_not_found());

        let err = TransferError::from(object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        });
        assert!(matches!(err, TransferError::Other(_)));
    }

    fn store_error(message: &str) -> object_store::Error {
        object_store::Error::Generic {
            store: "S3",
            source: message.to_string().into(),
        }
    }

    #[test]
    fn test_typed_errors_map_to_access_denied() {
        let denied = object_store::Error::PermissionDenied {
            path: "neo4j-backup/a.cypher".to_string(),
            source: "denied".into(),
        };
        assert!(matches!(TransferError::from(denied), TransferError::AccessDenied(_)));

        let unauthenticated = object_store::Error::Unauthenticated {
            path: "neo4j-backup/a.cypher".to_string(),
            source: "bad signature".into(),
        };
        assert!(matches!(
            TransferError::from(unauthenticated),
            TransferError::AccessDenied(_)
        ));
    }

    #[test]
    fn test_generic_errors_classified_by_code_and_status() {
        let err = TransferError::from(store_error(
            "Client error with status 403 Forbidden: <Error><Code>AccessDenied</Code></Error>",
        ));
        assert!(matches!(err, TransferError::AccessDenied(_)));

        let err = TransferError::from(store_error(
            "<Error><Code>SignatureDoesNotMatch</Code></Error>",
        ));
        assert!(matches!(err, TransferError::AccessDenied(_)));

        let err = TransferError::from(store_error(
            "Client error with status 404 Not Found: <Code>NoSuchBucket</Code>",
        ));
        assert!(err.is_not_found());

        // 键名中的数字不影响分类
        let err = TransferError::from(store_error(
            "upload neo4j-backup/neo4j_2024-04-03_02-00-00.cypher.403 failed: connection reset",
        ));
        assert!(matches!(err, TransferError::Other(_)));
    }
}
