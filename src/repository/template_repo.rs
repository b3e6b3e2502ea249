// ==========================================
// 批量导入导出管道 - 导入模板仓储
// ==========================================
// 表: import_template
// 映射/校验规则/默认值以 JSON 列保存
// ==========================================

use crate::domain::template::ImportTemplate;
use crate::domain::types::{DateFormat, DuplicateHandling, Module};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const TEMPLATE_COLUMNS: &str = r#"
    id, name, description, module, field_mappings_json, validation_rules_json,
    default_values_json, delimiter, encoding, date_format, duplicate_handling,
    times_used, last_used, is_public, owner_id, created_at, updated_at
"#;

pub struct TemplateRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TemplateRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, template: &ImportTemplate) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO import_template ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                TEMPLATE_COLUMNS
            ),
            params![
                template.id,
                template.name,
                template.description,
                template.module.as_str(),
                serde_json::to_string(&template.field_mappings)?,
                serde_json::to_string(&template.validation_rules)?,
                serde_json::to_string(&template.default_values)?,
                template.delimiter.map(|c| c.to_string()),
                template.encoding,
                template.date_format.as_str(),
                template.duplicate_handling.as_str(),
                template.times_used as i64,
                template.last_used,
                template.is_public,
                template.owner_id,
                template.created_at,
                template.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, id: &str) -> RepositoryResult<Option<ImportTemplate>> {
        let conn = self.get_conn()?;
        let template = conn
            .query_row(
                &format!("SELECT {} FROM import_template WHERE id = ?1", TEMPLATE_COLUMNS),
                params![id],
                map_template_row,
            )
            .optional()?;
        Ok(template)
    }

    /// 覆盖可编辑内容（不含使用统计与归属）
    pub fn update(&self, template: &ImportTemplate) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE import_template
            SET name = ?1, description = ?2, field_mappings_json = ?3,
                validation_rules_json = ?4, default_values_json = ?5, delimiter = ?6,
                encoding = ?7, date_format = ?8, duplicate_handling = ?9,
                is_public = ?10, updated_at = ?11
            WHERE id = ?12
            "#,
            params![
                template.name,
                template.description,
                serde_json::to_string(&template.field_mappings)?,
                serde_json::to_string(&template.validation_rules)?,
                serde_json::to_string(&template.default_values)?,
                template.delimiter.map(|c| c.to_string()),
                template.encoding,
                template.date_format.as_str(),
                template.duplicate_handling.as_str(),
                template.is_public,
                template.updated_at,
                template.id,
            ],
        )?;
        if rows == 0 {
            return Err(not_found(&template.id));
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute("DELETE FROM import_template WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// 某模块下调用方可见的模板（自有 + 公开），最近使用在前
    pub fn list_visible(&self, module: Module, owner_id: &str) -> RepositoryResult<Vec<ImportTemplate>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM import_template
            WHERE module = ?1 AND (owner_id = ?2 OR is_public = 1)
            ORDER BY COALESCE(last_used, created_at) DESC, name
            "#,
            TEMPLATE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![module.as_str(), owner_id], map_template_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// times_used + 1，last_used = used_at
    pub fn record_usage(&self, id: &str, used_at: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE import_template SET times_used = times_used + 1, last_used = ?1 WHERE id = ?2",
            params![used_at, id],
        )?;
        if rows == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }
}

fn not_found(id: &str) -> RepositoryError {
    RepositoryError::NotFound {
        entity: "import_template".to_string(),
        id: id.to_string(),
    }
}

fn text_conversion<T, E: std::fmt::Display>(idx: usize, r: Result<T, E>) -> SqliteResult<T> {
    r.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into()))
}

fn map_template_row(row: &Row) -> SqliteResult<ImportTemplate> {
    let module: String = row.get(3)?;
    let mappings: String = row.get(4)?;
    let rules: String = row.get(5)?;
    let defaults: String = row.get(6)?;
    let delimiter: Option<String> = row.get(7)?;
    let date_format: String = row.get(9)?;
    let duplicate_handling: String = row.get(10)?;

    Ok(ImportTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        module: text_conversion(3, Module::from_str(&module))?,
        field_mappings: text_conversion(4, serde_json::from_str(&mappings))?,
        validation_rules: text_conversion(5, serde_json::from_str(&rules))?,
        default_values: text_conversion(6, serde_json::from_str(&defaults))?,
        delimiter: delimiter.and_then(|d| d.chars().next()),
        encoding: row.get(8)?,
        date_format: text_conversion(9, DateFormat::from_str(&date_format))?,
        duplicate_handling: text_conversion(10, DuplicateHandling::from_str(&duplicate_handling))?,
        times_used: row.get::<_, i64>(11)?.max(0) as u64,
        last_used: row.get(12)?,
        is_public: row.get(13)?,
        owner_id: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}
