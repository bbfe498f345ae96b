//! 测试用的内存图数据库。

use crate::config::AppConfig;
use crate::error::{BackupError, Result};
use crate::graph::{GraphConnector, GraphSession, Record};
use crate::transfer::{ObjectSummary, TransferClient, TransferError, TransferResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// 必要项齐全、所有路径都位于 `root` 下的配置
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.graph.password = "secret".to_string();
    config.storage.account_id = "account".to_string();
    config.storage.access_key_id = "key".to_string();
    config.storage.secret_access_key = "skey".to_string();
    config.storage.bucket = "test-bucket".to_string();
    config.backup.work_dir = root.join("work");
    config.schedule.state_path = root.join("state").join("backup_settings.json");
    config.schedule.crontab_path = root.join("crontabs").join("root");
    config
}

/// 可克隆的内存图；克隆之间共享执行记录
#[derive(Debug, Clone, Default)]
pub struct FakeGraph {
    nodes: Vec<(Vec<String>, Value)>,
    relationships: Vec<(String, Value)>,
    constraints: Vec<(String, String)>,
    indexes: Vec<(String, String, Option<String>, String)>,
    apoc_script: Option<String>,
    failing: Vec<String>,
    unavailable: bool,
    panic_on_run: bool,
    fail_write_at: Option<usize>,
    delay: Option<Duration>,
    runs: Arc<Mutex<Vec<String>>>,
    writes: Arc<Mutex<Vec<String>>>,
    write_attempts: Arc<Mutex<usize>>,
}

impl FakeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, labels: &[&str], props: Value) -> Self {
        self.nodes
            .push((labels.iter().map(|l| l.to_string()).collect(), props));
        self
    }

    pub fn with_relationship(mut self, rel_type: &str, props: Value) -> Self {
        self.relationships.push((rel_type.to_string(), props));
        self
    }

    pub fn with_constraint(mut self, name: &str, create: &str) -> Self {
        self.constraints.push((name.to_string(), create.to_string()));
        self
    }

    pub fn with_index(mut self, name: &str, kind: &str, owner: Option<&str>, create: &str) -> Self {
        self.indexes.push((
            name.to_string(),
            kind.to_string(),
            owner.map(str::to_string),
            create.to_string(),
        ));
        self
    }

    pub fn with_apoc_script(mut self, script: &str) -> Self {
        self.apoc_script = Some(script.to_string());
        self
    }

    /// 指定语句执行时返回错误
    pub fn failing_on(mut self, statement: &str) -> Self {
        self.failing.push(statement.to_string());
        self
    }

    /// 第 n 次写入（从 1 开始）失败
    pub fn failing_write_at(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    /// 每次查询前等待
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// 任何查询都会 panic
    pub fn panicking(mut self) -> Self {
        self.panic_on_run = true;
        self
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn into_connector(self) -> Arc<FakeGraph> {
        Arc::new(self)
    }

    fn page(statement: &str) -> (usize, usize) {
        let tokens: Vec<&str> = statement.split_whitespace().collect();
        let value_after = |keyword: &str| {
            tokens
                .iter()
                .position(|t| *t == keyword)
                .and_then(|i| tokens.get(i + 1))
                .and_then(|v| v.parse().ok())
        };
        (
            value_after("SKIP").unwrap_or(0),
            value_after("LIMIT").unwrap_or(usize::MAX),
        )
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[async_trait]
impl GraphSession for FakeGraph {
    async fn run(&self, statement: &str) -> Result<Vec<Record>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_run {
            panic!("graph driver panicked");
        }
        if self.unavailable {
            return Err(BackupError::graph("connection refused"));
        }
        self.runs.lock().push(statement.to_string());
        if self.failing.iter().any(|s| s == statement) {
            return Err(BackupError::graph(format!("failed: {statement}")));
        }

        let records = if statement.starts_with("RETURN apoc.version()") {
            match &self.apoc_script {
                Some(_) => vec![json!({"version": "5.20.0"})],
                None => return Err(BackupError::graph("Unknown function 'apoc.version'")),
            }
        } else if statement.starts_with("CALL apoc.export.cypher.all") {
            match &self.apoc_script {
                Some(script) => vec![json!({ "cypherStatements": script })],
                None => return Err(BackupError::graph("no apoc")),
            }
        } else if statement == "MATCH (n) RETURN count(n) AS count" {
            vec![json!({"count": self.nodes.len()})]
        } else if statement == "MATCH ()-[r]->() RETURN count(r) AS count" {
            vec![json!({"count": self.relationships.len()})]
        } else if statement == "CALL db.labels()" {
            let labels: BTreeSet<&String> = self.nodes.iter().flat_map(|(l, _)| l).collect();
            labels.into_iter().map(|l| json!({ "label": l })).collect()
        } else if statement == "CALL db.relationshipTypes()" {
            let types: BTreeSet<&String> = self.relationships.iter().map(|(t, _)| t).collect();
            types
                .into_iter()
                .map(|t| json!({ "relationshipType": t }))
                .collect()
        } else if statement.starts_with("SHOW CONSTRAINTS") {
            self.constraints
                .iter()
                .map(|(name, create)| json!({"name": name, "createStatement": create}))
                .collect()
        } else if statement.starts_with("SHOW INDEXES") {
            self.indexes
                .iter()
                .map(|(name, kind, owner, create)| {
                    json!({
                        "name": name,
                        "type": kind,
                        "owningConstraint": owner,
                        "createStatement": create,
                    })
                })
                .collect()
        } else if statement.starts_with("MATCH (n) RETURN labels(n)") {
            let (skip, limit) = Self::page(statement);
            self.nodes
                .iter()
                .skip(skip)
                .take(limit)
                .map(|(labels, props)| json!({"labels": labels, "props": props}))
                .collect()
        } else if statement.starts_with("MATCH ()-[r]->() RETURN type(r)") {
            let (skip, limit) = Self::page(statement);
            self.relationships
                .iter()
                .skip(skip)
                .take(limit)
                .map(|(rel_type, props)| json!({"type": rel_type, "props": props}))
                .collect()
        } else {
            Vec::new()
        };

        Ok(records.into_iter().map(Self::record).collect())
    }

    async fn execute_write(&self, statement: &str) -> Result<()> {
        if self.unavailable {
            return Err(BackupError::graph("connection refused"));
        }
        let attempt = {
            let mut attempts = self.write_attempts.lock();
            *attempts += 1;
            *attempts
        };
        if self.fail_write_at == Some(attempt) {
            return Err(BackupError::graph(format!("write {attempt} rejected")));
        }
        self.writes.lock().push(statement.to_string());
        Ok(())
    }
}

#[async_trait]
impl GraphConnector for FakeGraph {
    async fn open(&self) -> Result<Box<dyn GraphSession>> {
        Ok(Box::new(self.clone()))
    }

    fn host(&self) -> String {
        "fake-graph".to_string()
    }
}

/// 无法访问的存储：`head_bucket` 返回给定错误，记录所有调用
pub struct UnreachableStore {
    failure: fn() -> TransferError,
    calls: Mutex<Vec<&'static str>>,
}

impl UnreachableStore {
    pub fn new(failure: fn() -> TransferError) -> Self {
        Self {
            failure,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn fail<T>(&self, call: &'static str) -> TransferResult<T> {
        self.calls.lock().push(call);
        Err((self.failure)())
    }
}

#[async_trait]
impl TransferClient for UnreachableStore {
    fn bucket(&self) -> &str {
        "test-bucket"
    }

    async fn head_bucket(&self) -> TransferResult<()> {
        self.fail("head_bucket")
    }

    async fn upload(&self, _: &Path, _: &str, _: &HashMap<String, String>) -> TransferResult<()> {
        self.fail("upload")
    }

    async fn download(&self, _: &str, _: &Path) -> TransferResult<u64> {
        self.fail("download")
    }

    async fn list_by_prefix(&self, _: &str) -> TransferResult<Vec<ObjectSummary>> {
        self.fail("list_by_prefix")
    }

    async fn head_object(&self, _: &str) -> TransferResult<HashMap<String, String>> {
        self.fail("head_object")
    }

    async fn delete(&self, _: &str) -> TransferResult<()> {
        self.fail("delete")
    }
}

fn bucket_missing() -> TransferError {
    TransferError::NotFound("test-bucket".to_string())
}

fn bucket_forbidden() -> TransferError {
    TransferError::AccessDenied("403 Forbidden".to_string())
}

fn endpoint_unreachable() -> TransferError {
    TransferError::Other("dns error".to_string())
}

/// 三类存储不可达的情形及其错误文本
pub fn storage_failures() -> Vec<(fn() -> TransferError, &'static str)> {
    vec![
        (bucket_missing as fn() -> TransferError, "对象不存在"),
        (bucket_forbidden as fn() -> TransferError, "访问被拒绝"),
        (endpoint_unreachable as fn() -> TransferError, "dns error"),
    ]
}
