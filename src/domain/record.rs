// ==========================================
// 批量导入导出管道 - 行/记录模型
// ==========================================
// RawRow: 解析产物（仅存在于一次校验/导入调用内）
// StoredRecord: 记录仓储中的业务记录（外部协作者的抽象）
// ==========================================

use crate::domain::catalog;
use crate::domain::types::Module;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 规范字段名 → 类型化值
pub type RecordFields = BTreeMap<String, Value>;

// ==========================================
// RawRow - 原始行
// ==========================================
// cells 与表头同序；row_number 从 1 开始（表头为第 0 行）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub row_number: usize,
    pub cells: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(row_number: usize, cells: Vec<(String, String)>) -> Self {
        Self { row_number, cells }
    }

    /// 按列名取原始值
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }
}

// ==========================================
// StoredRecord - 已存储的业务记录
// ==========================================
// revision: 插入时为 1，每次 update 加 1（回滚时据此识别“导入后被修改”）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub module: Module,
    pub fields: RecordFields,
    pub job_tag: Option<String>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// NaturalKey - 自然键
// ==========================================
// 比较口径: 去首尾空白 + 小写
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey(String);

impl NaturalKey {
    const SEPARATOR: char = '\u{1f}';

    /// 由各键字段的值构造；任一部分为空则无自然键
    pub fn from_parts<I, S>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for part in parts {
            let p = part.as_ref().trim().to_lowercase();
            if p.is_empty() {
                return None;
            }
            normalized.push(p);
        }
        if normalized.is_empty() {
            return None;
        }
        Some(NaturalKey(normalized.join(&Self::SEPARATOR.to_string())))
    }

    /// 从记录字段中按模块自然键提取
    pub fn from_fields(module: Module, fields: &RecordFields) -> Option<Self> {
        let parts: Vec<String> = catalog::natural_key_fields(module)
            .iter()
            .map(|key| fields.get(*key).map(value_as_key_part).unwrap_or_default())
            .collect();
        Self::from_parts(parts)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 从已存储的规范化字符串恢复
    pub fn from_stored(raw: String) -> Self {
        NaturalKey(raw)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.replace(Self::SEPARATOR, "/"))
    }
}

fn value_as_key_part(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
