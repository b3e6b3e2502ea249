// ==========================================
// 批量导入导出管道 - 业务记录存储（内存实现）
// ==========================================
// 用途: 测试与嵌入式调用
// 故障注入: set_unavailable / fail_after_writes / reject_value
// ==========================================

use crate::domain::record::{NaturalKey, RecordFields, StoredRecord};
use crate::domain::types::Module;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_store::{project_fields, RecordFilter, RecordStore, TagDeletion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<StoredRecord>>,
    untagged: bool,
    unavailable: AtomicBool,
    writes_left: Mutex<Option<usize>>,
    rejected: Mutex<Vec<(String, Value)>>,
    write_count: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不记录任务标签的存储（导入任务不可回滚）
    pub fn without_job_tags() -> Self {
        Self {
            untagged: true,
            ..Self::default()
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 再成功写入 n 次之后变为不可用
    pub fn fail_after_writes(&self, n: usize) {
        if let Ok(mut left) = self.writes_left.lock() {
            *left = Some(n);
        }
    }

    /// 拒绝写入包含 field = value 的记录（非致命的行级存储错误）
    pub fn reject_value(&self, field: &str, value: Value) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.push((field.to_string(), value));
        }
    }

    /// 成功写入（insert + update）的次数
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// 全部记录的快照（不做投影）
    pub fn snapshot(&self, module: Module) -> Vec<StoredRecord> {
        self.records
            .lock()
            .map(|records| records.iter().filter(|r| r.module == module).cloned().collect())
            .unwrap_or_default()
    }

    fn lock_records(&self) -> RepositoryResult<MutexGuard<'_, Vec<StoredRecord>>> {
        self.records
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn check_available(&self) -> RepositoryResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("内存存储已标记为不可用".to_string()));
        }
        Ok(())
    }

    /// 写入前检查：可用性、写入配额、被拒绝的取值
    fn admit_write(&self, fields: &RecordFields) -> RepositoryResult<()> {
        self.check_available()?;
        {
            let mut left = self
                .writes_left
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            if let Some(n) = left.as_mut() {
                if *n == 0 {
                    self.set_unavailable(true);
                    return Err(RepositoryError::Unavailable("写入配额已用尽".to_string()));
                }
                *n -= 1;
            }
        }
        let rejected = self
            .rejected
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        for (field, value) in rejected.iter() {
            if fields.get(field) == Some(value) {
                return Err(RepositoryError::FieldValueError {
                    field: field.clone(),
                    message: format!("存储拒绝该值: {}", value),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn supports_job_tags(&self) -> bool {
        !self.untagged
    }

    async fn find_by_natural_key(
        &self,
        module: Module,
        key: &NaturalKey,
    ) -> RepositoryResult<Option<StoredRecord>> {
        self.check_available()?;
        let records = self.lock_records()?;
        Ok(records
            .iter()
            .find(|r| {
                r.module == module && NaturalKey::from_fields(module, &r.fields).as_ref() == Some(key)
            })
            .cloned())
    }

    async fn insert(
        &self,
        module: Module,
        fields: RecordFields,
        job_tag: Option<&str>,
    ) -> RepositoryResult<StoredRecord> {
        self.admit_write(&fields)?;
        let now = Utc::now();
        let record = StoredRecord {
            id: uuid::Uuid::new_v4().to_string(),
            module,
            fields,
            job_tag: if self.untagged { None } else { job_tag.map(str::to_string) },
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        self.lock_records()?.push(record.clone());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update(
        &self,
        module: Module,
        id: &str,
        fields: RecordFields,
    ) -> RepositoryResult<StoredRecord> {
        self.admit_write(&fields)?;
        let mut records = self.lock_records()?;
        let record = records
            .iter_mut()
            .find(|r| r.module == module && r.id == id)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "business_record".to_string(),
                id: id.to_string(),
            })?;
        record.fields.extend(fields);
        record.revision += 1;
        record.updated_at = Utc::now();
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }

    async fn delete_by_job_tag(
        &self,
        module: Module,
        job_tag: &str,
        modified_after: DateTime<Utc>,
    ) -> RepositoryResult<TagDeletion> {
        self.check_available()?;
        let mut records = self.lock_records()?;
        let mut deletion = TagDeletion::default();
        records.retain(|r| {
            let tagged = r.module == module && r.job_tag.as_deref() == Some(job_tag);
            if tagged {
                if r.revision > 1 && r.updated_at > modified_after {
                    deletion.modified_ids.push(r.id.clone());
                }
                deletion.deleted_ids.push(r.id.clone());
            }
            !tagged
        });
        Ok(deletion)
    }

    async fn query(
        &self,
        module: Module,
        fields: &[String],
        filter: Option<&RecordFilter>,
    ) -> RepositoryResult<Vec<StoredRecord>> {
        self.check_available()?;
        let records = self.lock_records()?;
        let limit = filter.and_then(|f| f.limit).unwrap_or(usize::MAX);
        Ok(records
            .iter()
            .filter(|r| r.module == module && filter.map_or(true, |f| f.matches(r)))
            .take(limit)
            .cloned()
            .map(|mut r| {
                project_fields(&mut r, fields);
                r
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer(email: &str) -> RecordFields {
        let mut fields = RecordFields::new();
        fields.insert("company_name".to_string(), json!("Acme"));
        fields.insert("email".to_string(), json!(email));
        fields
    }

    #[tokio::test]
    async fn test_find_by_natural_key_normalizes() {
        let store = MemoryRecordStore::new();
        store.insert(Module::Customers, customer("A@X.com"), None).await.unwrap();
        let key = NaturalKey::from_parts(["a@x.com "]).unwrap();
        assert!(store
            .find_by_natural_key(Module::Customers, &key)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_fail_after_writes_turns_unavailable() {
        let store = MemoryRecordStore::new();
        store.fail_after_writes(1);
        store.insert(Module::Customers, customer("a@x.com"), None).await.unwrap();
        let err = store
            .insert(Module::Customers, customer("b@x.com"), None)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.query(Module::Customers, &[], None).await.is_err());
    }

    #[tokio::test]
    async fn test_reject_value_is_row_level() {
        let store = MemoryRecordStore::new();
        store.reject_value("email", json!("bad@x.com"));
        let err = store
            .insert(Module::Customers, customer("bad@x.com"), None)
            .await
            .unwrap_err();
        assert!(!err.is_unavailable());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_untagged_store_drops_job_tag() {
        let store = MemoryRecordStore::without_job_tags();
        assert!(!store.supports_job_tags());
        let r = store
            .insert(Module::Customers, customer("a@x.com"), Some("job-1"))
            .await
            .unwrap();
        assert!(r.job_tag.is_none());
    }
}
