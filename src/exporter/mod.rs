// ==========================================
// 批量导入导出管道 - 导出层
// ==========================================
// 职责: 按模块查询记录并生成 CSV
// ==========================================

pub mod error;
pub mod export_generator;

pub use error::{ExportError, ExportResult};
pub use export_generator::{
    format_currency, format_value, write_export_file, ExportGenerator, ExportOptions, ExportOutput,
};
