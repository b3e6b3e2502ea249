// ==========================================
// 批量导入导出管道 - 任务仓储（import_job / export_job）
// ==========================================
// 职责: 任务持久化；错误列表/映射以 JSON 列保存
// 并发: 处理中的写入带 lease_id 条件（单写者），
//       其他迁移以期望状态为条件（compare-and-set）
// 返回值: UPDATE 类方法返回受影响行数，0 表示条件不满足
// ==========================================

use crate::domain::job::{ExportJob, ImportJob};
use crate::domain::types::{DuplicateHandling, JobStatus, Module};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const IMPORT_COLUMNS: &str = r#"
    id, module, file_name, file_size_bytes, total_rows,
    rows_processed, rows_imported, rows_inserted, rows_failed, rows_skipped,
    status, errors_json, warnings_json, can_rollback, rolled_back, rolled_back_at,
    mapping_json, duplicate_handling, batch_size, template_id,
    created_at, started_at, completed_at
"#;

const EXPORT_COLUMNS: &str = r#"
    id, module, file_name, fields_json, total_rows, rows_exported,
    status, file_url, warnings_json, error_message, expires_at, created_at, completed_at
"#;

/// 条件写入的约束
#[derive(Debug, Clone, Copy)]
pub enum WriteGuard<'a> {
    Lease(&'a str),        // 必须持有租约且仍在 processing
    Status(JobStatus),     // 当前状态必须等于给定状态
}

pub struct JobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl JobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== import_job =====

    pub fn insert_import(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO import_job ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                 ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                IMPORT_COLUMNS
            ),
            params![
                job.id,
                job.module.as_str(),
                job.file_name,
                job.file_size_bytes as i64,
                job.total_rows as i64,
                job.rows_processed as i64,
                job.rows_imported as i64,
                job.rows_inserted as i64,
                job.rows_failed as i64,
                job.rows_skipped as i64,
                job.status.as_str(),
                serde_json::to_string(&job.errors)?,
                serde_json::to_string(&job.warnings)?,
                job.can_rollback,
                job.rolled_back,
                job.rolled_back_at,
                serde_json::to_string(&job.mapping_used)?,
                job.duplicate_handling.as_str(),
                job.batch_size as i64,
                job.template_id,
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_import(&self, id: &str) -> RepositoryResult<Option<ImportJob>> {
        let conn = self.get_conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM import_job WHERE id = ?1", IMPORT_COLUMNS),
                params![id],
                map_import_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_imports(&self, limit: usize) -> RepositoryResult<Vec<ImportJob>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_job ORDER BY created_at DESC LIMIT ?1",
            IMPORT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![clamp_limit(limit)], map_import_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// pending → processing 并签发租约
    pub fn claim_import(
        &self,
        id: &str,
        lease_id: &str,
        started_at: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE import_job
            SET status = 'processing', lease_id = ?1, started_at = ?2
            WHERE id = ?3 AND status = 'pending'
            "#,
            params![lease_id, started_at, id],
        )?;
        Ok(rows)
    }

    /// 条件写入任务的可变字段
    pub fn write_import(&self, job: &ImportJob, guard: WriteGuard<'_>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let (condition, guard_value) = guard_clause(guard, 14);
        let sql = format!(
            r#"
            UPDATE import_job
            SET rows_processed = ?1, rows_imported = ?2, rows_inserted = ?3,
                rows_failed = ?4, rows_skipped = ?5, status = ?6,
                errors_json = ?7, warnings_json = ?8, can_rollback = ?9,
                rolled_back = ?10, rolled_back_at = ?11, completed_at = ?12,
                lease_id = CASE WHEN ?6 = 'processing' THEN lease_id ELSE NULL END
            WHERE id = ?13 AND {}
            "#,
            condition
        );
        let rows = conn.execute(
            &sql,
            params![
                job.rows_processed as i64,
                job.rows_imported as i64,
                job.rows_inserted as i64,
                job.rows_failed as i64,
                job.rows_skipped as i64,
                job.status.as_str(),
                serde_json::to_string(&job.errors)?,
                serde_json::to_string(&job.warnings)?,
                job.can_rollback,
                job.rolled_back,
                job.rolled_back_at,
                job.completed_at,
                job.id,
                guard_value,
            ],
        )?;
        Ok(rows)
    }

    // ===== export_job =====

    pub fn insert_export(&self, job: &ExportJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO export_job ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                EXPORT_COLUMNS
            ),
            params![
                job.id,
                job.module.as_str(),
                job.file_name,
                serde_json::to_string(&job.fields)?,
                job.total_rows as i64,
                job.rows_exported as i64,
                job.status.as_str(),
                job.file_url,
                serde_json::to_string(&job.warnings)?,
                job.error_message,
                job.expires_at,
                job.created_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_export(&self, id: &str) -> RepositoryResult<Option<ExportJob>> {
        let conn = self.get_conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM export_job WHERE id = ?1", EXPORT_COLUMNS),
                params![id],
                map_export_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_exports(&self, limit: usize) -> RepositoryResult<Vec<ExportJob>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM export_job ORDER BY created_at DESC LIMIT ?1",
            EXPORT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![clamp_limit(limit)], map_export_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 已过期且仍保留文件的导出任务
    pub fn list_expired_exports(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<ExportJob>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM export_job WHERE expires_at <= ?1 AND file_url IS NOT NULL",
            EXPORT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![now], map_export_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn claim_export(&self, id: &str, lease_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE export_job SET status = 'processing', lease_id = ?1 WHERE id = ?2 AND status = 'pending'",
            params![lease_id, id],
        )?;
        Ok(rows)
    }

    pub fn write_export(&self, job: &ExportJob, guard: WriteGuard<'_>) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let (condition, guard_value) = guard_clause(guard, 9);
        let sql = format!(
            r#"
            UPDATE export_job
            SET total_rows = ?1, rows_exported = ?2, status = ?3, file_url = ?4,
                warnings_json = ?5, error_message = ?6, completed_at = ?7,
                lease_id = CASE WHEN ?3 = 'processing' THEN lease_id ELSE NULL END
            WHERE id = ?8 AND {}
            "#,
            condition
        );
        let rows = conn.execute(
            &sql,
            params![
                job.total_rows as i64,
                job.rows_exported as i64,
                job.status.as_str(),
                job.file_url,
                serde_json::to_string(&job.warnings)?,
                job.error_message,
                job.completed_at,
                job.id,
                guard_value,
            ],
        )?;
        Ok(rows)
    }

    /// 清除已删除产物的 file_url
    pub fn clear_export_file(&self, id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE export_job SET file_url = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(rows)
    }
}

/// 条件子句及其参数；idx 为该参数在语句中的位置
fn guard_clause(guard: WriteGuard<'_>, idx: usize) -> (String, String) {
    match guard {
        WriteGuard::Lease(lease) => (
            format!("lease_id = ?{} AND status = 'processing'", idx),
            lease.to_string(),
        ),
        WriteGuard::Status(status) => (format!("status = ?{}", idx), status.as_str().to_string()),
    }
}

fn clamp_limit(limit: usize) -> i64 {
    if limit == 0 {
        200
    } else {
        limit.min(2000) as i64
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> SqliteResult<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn module_column(row: &Row, idx: usize) -> SqliteResult<Module> {
    let raw: String = row.get(idx)?;
    Module::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn status_column(row: &Row, idx: usize) -> SqliteResult<JobStatus> {
    let raw: String = row.get(idx)?;
    JobStatus::parse(&raw).ok_or_else(|| conversion_error(idx, format!("未知任务状态: {}", raw)))
}

fn count_column(row: &Row, idx: usize) -> SqliteResult<usize> {
    let v: i64 = row.get(idx)?;
    Ok(v.max(0) as usize)
}

fn map_import_row(row: &Row) -> SqliteResult<ImportJob> {
    let duplicate_raw: String = row.get(17)?;
    Ok(ImportJob {
        id: row.get(0)?,
        module: module_column(row, 1)?,
        file_name: row.get(2)?,
        file_size_bytes: row.get::<_, i64>(3)?.max(0) as u64,
        total_rows: count_column(row, 4)?,
        rows_processed: count_column(row, 5)?,
        rows_imported: count_column(row, 6)?,
        rows_inserted: count_column(row, 7)?,
        rows_failed: count_column(row, 8)?,
        rows_skipped: count_column(row, 9)?,
        status: status_column(row, 10)?,
        errors: json_column(row, 11)?,
        warnings: json_column(row, 12)?,
        can_rollback: row.get(13)?,
        rolled_back: row.get(14)?,
        rolled_back_at: row.get(15)?,
        mapping_used: json_column(row, 16)?,
        duplicate_handling: DuplicateHandling::from_str(&duplicate_raw)
            .map_err(|e| conversion_error(17, e))?,
        batch_size: count_column(row, 18)?,
        template_id: row.get(19)?,
        created_at: row.get(20)?,
        started_at: row.get(21)?,
        completed_at: row.get(22)?,
    })
}

fn map_export_row(row: &Row) -> SqliteResult<ExportJob> {
    Ok(ExportJob {
        id: row.get(0)?,
        module: module_column(row, 1)?,
        file_name: row.get(2)?,
        fields: json_column(row, 3)?,
        total_rows: count_column(row, 4)?,
        rows_exported: count_column(row, 5)?,
        status: status_column(row, 6)?,
        file_url: row.get(7)?,
        warnings: json_column(row, 8)?,
        error_message: row.get(9)?,
        expires_at: row.get(10)?,
        created_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}
