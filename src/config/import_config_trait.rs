// ==========================================
// 批量导入导出管道 - 管道配置读取 Trait
// ==========================================
// 职责: 定义导入/导出所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// 约定: 配置缺失或非法时返回默认值，不返回错误
// ==========================================

use crate::domain::types::DateFormat;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use std::path::PathBuf;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 导入执行 =====

    /// 每批处理的行数
    ///
    /// # 默认值
    /// - 50
    async fn get_batch_size(&self) -> RepositoryResult<usize>;

    /// 批内并发写入的工作者数量
    ///
    /// # 默认值
    /// - 4
    async fn get_worker_count(&self) -> RepositoryResult<usize>;

    /// 导入时解析日期使用的格式
    ///
    /// # 默认值
    /// - YYYY-MM-DD
    async fn get_import_date_format(&self) -> RepositoryResult<DateFormat>;

    // ===== 导出 =====

    /// 导出日期格式
    ///
    /// # 默认值
    /// - MM/DD/YYYY
    async fn get_export_date_format(&self) -> RepositoryResult<DateFormat>;

    /// 货币符号
    ///
    /// # 默认值
    /// - "$"
    async fn get_currency_symbol(&self) -> RepositoryResult<String>;

    /// 导出文件保留时长（小时）
    ///
    /// # 默认值
    /// - 24
    async fn get_export_expiry_hours(&self) -> RepositoryResult<i64>;

    /// 导出文件目录
    ///
    /// # 默认值
    /// - <用户数据目录>/bulk-io/exports
    async fn get_export_output_dir(&self) -> RepositoryResult<PathBuf>;
}
