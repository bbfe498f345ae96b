//! 图数据库会话抽象，以及基于 Neo4j HTTP 事务接口的实现。

use crate::config::GraphConfig;
use crate::constants::graph;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// 一条查询结果记录：列名 -> 值
pub type Record = Map<String, Value>;

/// 图数据库会话
#[async_trait]
pub trait GraphSession: Send + Sync {
    /// 执行查询并返回全部记录
    async fn run(&self, statement: &str) -> Result<Vec<Record>>;

    /// 在一个写事务中执行一条语句
    async fn execute_write(&self, statement: &str) -> Result<()>;
}

/// 会话工厂；每次流水线运行打开一个新会话
#[async_trait]
pub trait GraphConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn GraphSession>>;

    /// 用于日志与元数据的目标描述
    fn host(&self) -> String;
}

/// 读取字符串列
pub fn record_str<'a>(record: &'a Record, column: &str) -> Option<&'a str> {
    record.get(column).and_then(Value::as_str)
}

/// 读取整数列
pub fn record_u64(record: &Record, column: &str) -> Option<u64> {
    record.get(column).and_then(Value::as_u64)
}

#[derive(Debug, Serialize)]
struct TxRequest<'a> {
    statements: [TxStatement<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TxStatement<'a> {
    statement: &'a str,
    result_data_contents: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// 把事务接口的响应体转换成记录列表
fn records_from_response(response: TxResponse) -> Result<Vec<Record>> {
    if let Some(err) = response.errors.first() {
        return Err(BackupError::graph(format!("{}: {}", err.code, err.message)));
    }

    let mut records = Vec::new();
    for result in response.results {
        for row in result.data {
            let record: Record = result
                .columns
                .iter()
                .cloned()
                .zip(row.row.into_iter())
                .collect();
            records.push(record);
        }
    }
    Ok(records)
}

/// 基于 HTTP 事务接口（`/db/{database}/tx/commit`）的会话
#[derive(Debug, Clone)]
pub struct HttpGraphSession {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
}

impl HttpGraphSession {
    pub fn new(client: Client, config: &GraphConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/db/{}/tx/commit", config.base_url(), config.database),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }

    async fn commit(&self, statement: &str) -> Result<Vec<Record>> {
        let body = TxRequest {
            statements: [TxStatement {
                statement,
                result_data_contents: ["row"],
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackupError::graph(format!("HTTP {status}: {text}")));
        }

        let payload: TxResponse = response.json().await?;
        records_from_response(payload)
    }
}

#[async_trait]
impl GraphSession for HttpGraphSession {
    async fn run(&self, statement: &str) -> Result<Vec<Record>> {
        debug!("执行查询: {}", statement);
        self.commit(statement).await
    }

    async fn execute_write(&self, statement: &str) -> Result<()> {
        self.commit(statement).await.map(|_| ())
    }
}

/// HTTP 会话工厂，复用同一个连接池
#[derive(Debug, Clone)]
pub struct HttpGraphConnector {
    client: Client,
    config: GraphConfig,
}

impl HttpGraphConnector {
    pub fn new(config: GraphConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(graph::REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl GraphConnector for HttpGraphConnector {
    async fn open(&self) -> Result<Box<dyn GraphSession>> {
        debug!("连接图数据库: {}", self.config.base_url());
        Ok(Box::new(HttpGraphSession::new(self.client.clone(), &self.config)))
    }

    fn host(&self) -> String {
        self.config.host.clone()
    }
}
