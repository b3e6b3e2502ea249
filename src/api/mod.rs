// ==========================================
// 批量导入导出管道 - API 层
// ==========================================
// 职责: 对外服务边界（导入 / 导出 / 模板）
// ==========================================

pub mod error;
pub mod export_api;
pub mod import_api;
pub mod template_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use export_api::ExportApi;
pub use import_api::{ImportApi, ImportOptions, ImportPreview, ImportRequest, DEFAULT_OWNER};
pub use template_api::TemplateApi;
