// ==========================================
// 批量导入导出管道 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::open_sqlite_connection;
use crate::domain::types::DateFormat;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
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

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有 global 配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 读取并解析配置；缺失时返回默认值，非法时告警后返回默认值
    fn get_parsed_or_default<T: FromStr>(&self, key: &str, default: T) -> RepositoryResult<T> {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(key = key, value = %raw, "配置值非法，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    fn get_positive_or_default(&self, key: &str, default: usize) -> RepositoryResult<usize> {
        let value = self.get_parsed_or_default(key, default)?;
        if value == 0 {
            warn!(key = key, "配置值必须大于 0，使用默认值");
            return Ok(default);
        }
        Ok(value)
    }
}

/// 默认导出目录: <用户数据目录>/bulk-io/exports（取不到时使用临时目录）
pub fn default_export_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("bulk-io")
        .join("exports")
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_batch_size(&self) -> RepositoryResult<usize> {
        self.get_positive_or_default(config_keys::IMPORT_BATCH_SIZE, defaults::BATCH_SIZE)
    }

    async fn get_worker_count(&self) -> RepositoryResult<usize> {
        self.get_positive_or_default(config_keys::IMPORT_WORKER_COUNT, defaults::WORKER_COUNT)
    }

    async fn get_import_date_format(&self) -> RepositoryResult<DateFormat> {
        self.get_parsed_or_default(config_keys::IMPORT_DATE_FORMAT, DateFormat::IsoDate)
    }

    async fn get_export_date_format(&self) -> RepositoryResult<DateFormat> {
        self.get_parsed_or_default(config_keys::EXPORT_DATE_FORMAT, DateFormat::UsSlash)
    }

    async fn get_currency_symbol(&self) -> RepositoryResult<String> {
        Ok(self
            .get_global_config_value(config_keys::EXPORT_CURRENCY_SYMBOL)?
            .unwrap_or_else(|| defaults::CURRENCY_SYMBOL.to_string()))
    }

    async fn get_export_expiry_hours(&self) -> RepositoryResult<i64> {
        let hours = self.get_parsed_or_default(config_keys::EXPORT_EXPIRY_HOURS, defaults::EXPIRY_HOURS)?;
        if hours <= 0 {
            warn!(hours = hours, "导出保留时长必须大于 0，使用默认值");
            return Ok(defaults::EXPIRY_HOURS);
        }
        Ok(hours)
    }

    async fn get_export_output_dir(&self) -> RepositoryResult<PathBuf> {
        Ok(self
            .get_global_config_value(config_keys::EXPORT_OUTPUT_DIR)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_export_dir))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 导入
    pub const IMPORT_BATCH_SIZE: &str = "import.batch_size";
    pub const IMPORT_WORKER_COUNT: &str = "import.worker_count";
    pub const IMPORT_DATE_FORMAT: &str = "import.date_format";

    // 导出
    pub const EXPORT_DATE_FORMAT: &str = "export.date_format";
    pub const EXPORT_CURRENCY_SYMBOL: &str = "export.currency_symbol";
    pub const EXPORT_EXPIRY_HOURS: &str = "export.expiry_hours";
    pub const EXPORT_OUTPUT_DIR: &str = "export.output_dir";
}

pub mod defaults {
    pub const BATCH_SIZE: usize = 50;
    pub const WORKER_COUNT: usize = 4;
    pub const CURRENCY_SYMBOL: &str = "$";
    pub const EXPIRY_HOURS: i64 = 24;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_missing() {
        let cfg = manager();
        assert_eq!(cfg.get_batch_size().await.unwrap(), 50);
        assert_eq!(cfg.get_worker_count().await.unwrap(), 4);
        assert_eq!(cfg.get_import_date_format().await.unwrap(), DateFormat::IsoDate);
        assert_eq!(cfg.get_export_date_format().await.unwrap(), DateFormat::UsSlash);
        assert_eq!(cfg.get_currency_symbol().await.unwrap(), "$");
        assert_eq!(cfg.get_export_expiry_hours().await.unwrap(), 24);
    }

    #[tokio::test]
    async fn test_overrides_and_invalid_values() {
        let cfg = manager();
        cfg.set_global_config_value(config_keys::IMPORT_BATCH_SIZE, "10").unwrap();
        cfg.set_global_config_value(config_keys::IMPORT_WORKER_COUNT, "0").unwrap();
        cfg.set_global_config_value(config_keys::EXPORT_DATE_FORMAT, "dd.mm.yyyy").unwrap();
        cfg.set_global_config_value(config_keys::EXPORT_EXPIRY_HOURS, "soon").unwrap();

        assert_eq!(cfg.get_batch_size().await.unwrap(), 10);
        assert_eq!(cfg.get_worker_count().await.unwrap(), 4);
        assert_eq!(cfg.get_export_date_format().await.unwrap(), DateFormat::EuDot);
        assert_eq!(cfg.get_export_expiry_hours().await.unwrap(), 24);

        let snapshot = cfg.get_config_snapshot().unwrap();
        assert!(snapshot.contains("import.batch_size"));
    }
}
