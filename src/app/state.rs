// ==========================================
// 批量导入导出管道 - 应用状态
// ==========================================
// 职责: 组装共享连接、仓储、任务跟踪与各 API 实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{ExportApi, ImportApi, TemplateApi};
use crate::config::config_manager::ConfigManager;
use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::JobTracker;
use crate::exporter::ExportGenerator;
use crate::repository::{JobRepository, RecordStore, SqliteRecordStore, TemplateRepository};

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 配置管理器
    pub config: Arc<ConfigManager>,

    /// 任务跟踪器
    pub tracker: Arc<JobTracker>,

    /// 业务记录存储
    pub store: Arc<dyn RecordStore>,

    /// 导入API
    pub import_api: Arc<ImportApi>,

    /// 导出API
    pub export_api: Arc<ExportApi>,

    /// 模板API
    pub template_api: Arc<TemplateApi>,
}

impl AppState {
    /// 创建新的AppState实例（业务记录存于同一 SQLite 库）
    ///
    /// # 返回
    /// - Ok(AppState): 成功创建
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        Self::build(db_path, None)
    }

    /// 使用外部记录存储创建（任务与模板仍存于 SQLite）
    pub fn with_store(db_path: String, store: Arc<dyn RecordStore>) -> Result<Self, String> {
        Self::build(db_path, Some(store))
    }

    fn build(db_path: String, store: Option<Arc<dyn RecordStore>>) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        // 创建数据库连接（共享连接）
        let conn = open_sqlite_connection(&db_path).map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let config = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let job_repo = Arc::new(JobRepository::new(conn.clone()));
        let template_repo = Arc::new(TemplateRepository::new(conn.clone()));
        let store = store
            .unwrap_or_else(|| Arc::new(SqliteRecordStore::from_connection(conn.clone())));

        // ==========================================
        // 初始化Engine层与API层
        // ==========================================
        let tracker = Arc::new(JobTracker::new(job_repo));
        let config_reader: Arc<dyn ImportConfigReader> = config.clone();

        let template_api = Arc::new(TemplateApi::new(template_repo));
        let import_api = Arc::new(ImportApi::new(
            store.clone(),
            tracker.clone(),
            template_api.clone(),
            config_reader.clone(),
        ));
        let export_api = Arc::new(ExportApi::new(
            Arc::new(ExportGenerator::new(store.clone())),
            tracker.clone(),
            config_reader,
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            config,
            tracker,
            store,
            import_api,
            export_api,
            template_api,
        })
    }
}

/// 获取默认数据库路径
///
/// 优先级: BULK_IO_DB_PATH 环境变量 > <用户数据目录>/bulk-io/bulk_io.db > ./bulk_io.db
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("BULK_IO_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    match dirs::data_dir() {
        Some(data_dir) => {
            let dir = data_dir.join("bulk-io");
            // 目录创建失败时交由打开数据库时报错
            std::fs::create_dir_all(&dir).ok();
            dir.join("bulk_io.db").to_string_lossy().to_string()
        }
        None => "./bulk_io.db".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_new_initializes_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db").to_string_lossy().to_string();
        let state = AppState::new(db_path).unwrap();
        assert!(state.tracker.list_jobs(None, 10).unwrap().is_empty());
        assert!(state.store.supports_job_tags());
    }
}
