// ==========================================
// 批量导入导出管道 - 业务记录存储 Trait
// ==========================================
// 职责: 管道对业务记录存储的全部依赖（不假设存储的表结构或传输方式）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::record::{NaturalKey, RecordFields, StoredRecord};
use crate::domain::types::Module;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ==========================================
// TagDeletion - 按任务标签删除的结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDeletion {
    pub deleted_ids: Vec<String>,
    pub modified_ids: Vec<String>, // 已删除、且在 modified_after 之后被更新过的记录
}

// ==========================================
// RecordFilter - 查询过滤条件
// ==========================================
// 字符串比较忽略大小写与首尾空白，其余类型精确比较
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub equals: BTreeMap<String, Value>,
    #[serde(default)]
    pub job_tag: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn field_equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    pub fn matches(&self, record: &StoredRecord) -> bool {
        if let Some(tag) = &self.job_tag {
            if record.job_tag.as_deref() != Some(tag.as_str()) {
                return false;
            }
        }
        self.equals.iter().all(|(field, expected)| {
            let actual = record.fields.get(field).unwrap_or(&Value::Null);
            match (actual, expected) {
                (Value::String(a), Value::String(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
                (a, b) => a == b,
            }
        })
    }
}

/// 只保留选中的字段（fields 为空表示全部）
pub fn project_fields(record: &mut StoredRecord, fields: &[String]) {
    if fields.is_empty() {
        return;
    }
    record.fields.retain(|name, _| fields.iter().any(|f| f == name));
}

// ==========================================
// RecordStore Trait
// ==========================================
// 实现者: SqliteRecordStore（rusqlite）/ MemoryRecordStore（测试与嵌入）
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 是否支持按任务标签追溯新增记录（决定导入任务能否回滚）
    fn supports_job_tags(&self) -> bool {
        true
    }

    /// 按自然键查找记录
    async fn find_by_natural_key(
        &self,
        module: Module,
        key: &NaturalKey,
    ) -> RepositoryResult<Option<StoredRecord>>;

    /// 新增记录
    ///
    /// # 参数
    /// - job_tag: 导入任务 id（回滚依据），手工写入时为 None
    async fn insert(
        &self,
        module: Module,
        fields: RecordFields,
        job_tag: Option<&str>,
    ) -> RepositoryResult<StoredRecord>;

    /// 覆盖给定字段（含 Null），未给出的字段保持不变；revision + 1
    async fn update(
        &self,
        module: Module,
        id: &str,
        fields: RecordFields,
    ) -> RepositoryResult<StoredRecord>;

    /// 删除某任务新增的全部记录
    ///
    /// modified_after: 任务结束时间；此后仍被更新过的记录计入 modified_ids，
    /// 任务自身执行期间的更新（文件内重复键）不计入
    async fn delete_by_job_tag(
        &self,
        module: Module,
        job_tag: &str,
        modified_after: DateTime<Utc>,
    ) -> RepositoryResult<TagDeletion>;

    /// 查询记录（按创建顺序）
    async fn query(
        &self,
        module: Module,
        fields: &[String],
        filter: Option<&RecordFilter>,
    ) -> RepositoryResult<Vec<StoredRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> StoredRecord {
        let mut fields = RecordFields::new();
        fields.insert("sku".to_string(), json!("W-1"));
        fields.insert("price".to_string(), json!(9.5));
        StoredRecord {
            id: "r1".to_string(),
            module: Module::Products,
            fields,
            job_tag: Some("job-1".to_string()),
            revision: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_matches_case_insensitive_strings() {
        let r = record();
        assert!(RecordFilter::default().field_equals("sku", "w-1").matches(&r));
        assert!(RecordFilter::default().field_equals("price", 9.5).matches(&r));
        assert!(!RecordFilter::default().field_equals("price", 9.0).matches(&r));

        let tagged = RecordFilter {
            job_tag: Some("job-2".to_string()),
            ..RecordFilter::default()
        };
        assert!(!tagged.matches(&r));
    }

    #[test]
    fn test_project_fields() {
        let mut r = record();
        project_fields(&mut r, &["sku".to_string()]);
        assert_eq!(r.fields.len(), 1);
    }
}
