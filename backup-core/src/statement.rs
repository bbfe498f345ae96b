//! Cypher 语句脚本的读写。
//!
//! 读取规则：逐行读取，跳过空行和 `//` 注释行；当某行去除首尾空白后以 `;`
//! 结尾时，缓冲区构成一条语句（去掉结尾的 `;`）。文件末尾残留的缓冲内容
//! 即使没有 `;` 也作为最后一条语句。注意：引号内的 `;` 同样会结束语句。

use crate::error::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

const COMMENT_MARKER: &str = "//";

static PLAIN_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("标识符正则表达式无效"));

/// 从任意行读取器解析语句序列
pub fn parse_statements<R: BufRead>(reader: R) -> io::Result<Vec<String>> {
    let mut statements = Vec::new();
    let mut buffer = String::new();

    for line in reader.lines() {
        let line = line?;
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with(COMMENT_MARKER) {
            continue;
        }

        buffer.push_str(&line);
        buffer.push('\n');

        if stripped.ends_with(';') {
            let statement = buffer.trim();
            let statement = statement.strip_suffix(';').unwrap_or(statement).trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            buffer.clear();
        }
    }

    let rest = buffer.trim();
    if !rest.is_empty() {
        statements.push(rest.to_string());
    }

    Ok(statements)
}

/// 从文件加载语句序列
pub fn load_statements(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    Ok(parse_statements(BufReader::new(file))?)
}

/// 标识符在必要时加反引号
pub fn quote_identifier(name: &str) -> String {
    if PLAIN_IDENTIFIER.is_match(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// 把 JSON 值渲染为 Cypher 字面量
pub fn cypher_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", escape_string(s)),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(cypher_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(map) => property_map(map),
    }
}

/// 字符串字面量转义；控制字符一律转义，保证每个节点只占一行
fn escape_string(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\u{8}' => escaped.push_str("\\b"),
            '\u{c}' => escaped.push_str("\\f"),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04X}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `{k: v, ...}` 形式的属性映射
pub fn property_map(map: &Map<String, Value>) -> String {
    let entries: Vec<String> = map
        .iter()
        .map(|(key, value)| format!("{}: {}", quote_identifier(key), cypher_literal(value)))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

/// 导出脚本写入器
pub struct StatementWriter<W: Write> {
    inner: W,
    nodes_written: u64,
    relationships_written: u64,
}

impl<W: Write> StatementWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            nodes_written: 0,
            relationships_written: 0,
        }
    }

    pub fn write_header(&mut self, database: &str, exported_at: DateTime<Utc>) -> io::Result<()> {
        writeln!(self.inner, "// Neo4j Database Export")?;
        writeln!(self.inner, "// Database: {database}")?;
        writeln!(self.inner, "// Exported: {}", exported_at.to_rfc3339())?;
        writeln!(self.inner)
    }

    /// 写入一条 schema 语句（约束或索引）
    pub fn write_schema(&mut self, statement: &str) -> io::Result<()> {
        let statement = statement.trim();
        let statement = statement.strip_suffix(';').unwrap_or(statement);
        writeln!(self.inner, "{statement};")
    }

    pub fn write_section_break(&mut self) -> io::Result<()> {
        writeln!(self.inner)
    }

    pub fn write_node(&mut self, labels: &[String], properties: &Map<String, Value>) -> io::Result<()> {
        let labels: String = labels.iter().map(|l| format!(":{}", quote_identifier(l))).collect();
        if properties.is_empty() {
            writeln!(self.inner, "CREATE (n{labels});")?;
        } else {
            writeln!(self.inner, "CREATE (n{labels} {});", property_map(properties))?;
        }
        self.nodes_written += 1;
        Ok(())
    }

    /// 关系只以注释形式记录，不会生成可执行语句
    pub fn write_relationship(&mut self, rel_type: &str, properties: &Map<String, Value>) -> io::Result<()> {
        if properties.is_empty() {
            writeln!(self.inner, "// Relationship: {rel_type}")?;
        } else {
            writeln!(self.inner, "// Relationship with properties: {rel_type}")?;
        }
        self.relationships_written += 1;
        Ok(())
    }

    /// 原样写入（批量导出得到的脚本）
    pub fn write_raw(&mut self, script: &str) -> io::Result<()> {
        self.inner.write_all(script.as_bytes())?;
        if !script.ends_with('\n') {
            writeln!(self.inner)?;
        }
        Ok(())
    }

    pub fn nodes_written(&self) -> u64 {
        self.nodes_written
    }

    pub fn relationships_written(&self) -> u64 {
        self.relationships_written
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
