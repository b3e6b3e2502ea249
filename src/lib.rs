// ==========================================
// 批量导入导出管道 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 业务模块（客户/供应商/产品/库存/订单/报价）的 CSV 批量导入导出
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型、字段目录
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 任务生命周期
pub mod engine;

// 导入层 - 解析/映射/校验/执行/回滚
pub mod importer;

// 导出层 - CSV 生成
pub mod exporter;

// 配置层 - 管道配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 服务边界
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    DataType, DuplicateHandling, ExportJob, FieldMapping, ImportJob, ImportTemplate, JobKind,
    JobStatus, Module, ValidationResult,
};

pub use api::{ApiError, ApiResult, ExportApi, ImportApi, TemplateApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "批量导入导出管道";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
