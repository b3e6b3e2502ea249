// ==========================================
// 批量导入导出管道 - 业务记录存储（SQLite 实现）
// ==========================================
// 表: business_record（字段以 JSON 保存，natural_key 列冗余存储用于查重）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::record::{NaturalKey, RecordFields, StoredRecord};
use crate::domain::types::Module;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::record_store::{project_fields, RecordFilter, RecordStore, TagDeletion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const RECORD_COLUMNS: &str =
    "id, module, fields_json, job_tag, revision, created_at, updated_at";

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn find_by_id(conn: &Connection, id: &str) -> RepositoryResult<Option<StoredRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {} FROM business_record WHERE id = ?1", RECORD_COLUMNS),
                params![id],
                map_record_row,
            )
            .optional()?;
        Ok(record)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_by_natural_key(
        &self,
        module: Module,
        key: &NaturalKey,
    ) -> RepositoryResult<Option<StoredRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM business_record WHERE module = ?1 AND natural_key = ?2 ORDER BY seq LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![module.as_str(), key.as_str()],
                map_record_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn insert(
        &self,
        module: Module,
        fields: RecordFields,
        job_tag: Option<&str>,
    ) -> RepositoryResult<StoredRecord> {
        let now = Utc::now();
        let record = StoredRecord {
            id: uuid::Uuid::new_v4().to_string(),
            module,
            fields,
            job_tag: job_tag.map(str::to_string),
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        let natural_key = NaturalKey::from_fields(module, &record.fields);

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO business_record (
                id, module, natural_key, fields_json, job_tag, revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.id,
                module.as_str(),
                natural_key.as_ref().map(|k| k.as_str()),
                serde_json::to_string(&record.fields)?,
                record.job_tag,
                record.revision,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(record)
    }

    async fn update(
        &self,
        module: Module,
        id: &str,
        fields: RecordFields,
    ) -> RepositoryResult<StoredRecord> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut record = Self::find_by_id(&tx, id)?
            .filter(|r| r.module == module)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "business_record".to_string(),
                id: id.to_string(),
            })?;

        record.fields.extend(fields);
        record.revision += 1;
        record.updated_at = Utc::now();
        let natural_key = NaturalKey::from_fields(module, &record.fields);

        tx.execute(
            r#"
            UPDATE business_record
            SET natural_key = ?1, fields_json = ?2, revision = ?3, updated_at = ?4
            WHERE id = ?5
            "#,
            params![
                natural_key.as_ref().map(|k| k.as_str()),
                serde_json::to_string(&record.fields)?,
                record.revision,
                record.updated_at,
                record.id,
            ],
        )?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(record)
    }

    async fn delete_by_job_tag(
        &self,
        module: Module,
        job_tag: &str,
        modified_after: DateTime<Utc>,
    ) -> RepositoryResult<TagDeletion> {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let tagged: Vec<(String, i64, DateTime<Utc>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, revision, updated_at FROM business_record
                 WHERE module = ?1 AND job_tag = ?2 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![module.as_str(), job_tag], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<SqliteResult<Vec<_>>>()?;
            rows
        };

        tx.execute(
            "DELETE FROM business_record WHERE module = ?1 AND job_tag = ?2",
            params![module.as_str(), job_tag],
        )?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut deletion = TagDeletion::default();
        for (id, revision, updated_at) in tagged {
            if revision > 1 && updated_at > modified_after {
                deletion.modified_ids.push(id.clone());
            }
            deletion.deleted_ids.push(id);
        }
        Ok(deletion)
    }

    async fn query(
        &self,
        module: Module,
        fields: &[String],
        filter: Option<&RecordFilter>,
    ) -> RepositoryResult<Vec<StoredRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM business_record WHERE module = ?1 ORDER BY seq",
            RECORD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![module.as_str()], map_record_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        let limit = filter.and_then(|f| f.limit).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .take(limit)
            .map(|mut r| {
                project_fields(&mut r, fields);
                r
            })
            .collect())
    }
}

fn map_record_row(row: &Row) -> SqliteResult<StoredRecord> {
    let module_raw: String = row.get(1)?;
    let fields_raw: String = row.get(2)?;
    Ok(StoredRecord {
        id: row.get(0)?,
        module: Module::from_str(&module_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?,
        fields: serde_json::from_str(&fields_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
        })?,
        job_tag: row.get(3)?,
        revision: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteRecordStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        SqliteRecordStore::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn product(sku: &str, price: f64) -> RecordFields {
        let mut fields = RecordFields::new();
        fields.insert("name".to_string(), json!("Widget"));
        fields.insert("sku".to_string(), json!(sku));
        fields.insert("price".to_string(), json!(price));
        fields
    }

    #[tokio::test]
    async fn test_insert_and_find_by_natural_key() {
        let store = store();
        store
            .insert(Module::Products, product("W-1", 9.5), Some("job-1"))
            .await
            .unwrap();

        let key = NaturalKey::from_parts(["w-1"]).unwrap();
        let found = store.find_by_natural_key(Module::Products, &key).await.unwrap();
        assert_eq!(found.unwrap().fields["price"], json!(9.5));
        assert!(store
            .find_by_natural_key(Module::Customers, &key)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_bumps_revision_and_delete_reports_modified() {
        let store = store();
        let a = store
            .insert(Module::Products, product("W-1", 1.0), Some("job-1"))
            .await
            .unwrap();
        let b = store
            .insert(Module::Products, product("W-2", 2.0), Some("job-1"))
            .await
            .unwrap();
        store
            .insert(Module::Products, product("W-3", 3.0), None)
            .await
            .unwrap();

        // 任务执行期间的更新不算“导入后被修改”
        let mut in_job = RecordFields::new();
        in_job.insert("price".to_string(), json!(2.5));
        store.update(Module::Products, &b.id, in_job).await.unwrap();
        let job_finished_at = Utc::now();

        let mut patch = RecordFields::new();
        patch.insert("price".to_string(), json!(5.0));
        let updated = store.update(Module::Products, &a.id, patch).await.unwrap();
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.fields["name"], json!("Widget"));

        let deletion = store
            .delete_by_job_tag(Module::Products, "job-1", job_finished_at)
            .await
            .unwrap();
        assert_eq!(deletion.deleted_ids.len(), 2);
        assert_eq!(deletion.modified_ids, vec![a.id]);

        let remaining = store.query(Module::Products, &[], None).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let store = store();
        let err = store
            .update(Module::Products, "nope", RecordFields::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
