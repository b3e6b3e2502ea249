// ==========================================
// 批量导入导出管道 - 导入层
// ==========================================
// 职责: CSV 解析 → 字段映射 → 转换 → 校验 → 执行 → 回滚
// ==========================================

// 模块声明
pub mod conflict_handler;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod import_executor;
pub mod record_builder;
pub mod rollback;
pub mod transform;
pub mod validator;

// 重导出核心类型
pub use conflict_handler::{ConflictHandler, ExistingConflict, InFileDuplicate};
pub use error::{
    ExecutionError, FatalExecutionError, ImportError, ImportResult, MappingError, NotEligibleReason,
    ParseError, RollbackError,
};
pub use field_mapper::{FieldMapper, TargetOption};
pub use file_parser::{detect_delimiter, CsvParser, ParseOptions, ParsedCsv};
pub use import_executor::ImportExecutor;
pub use record_builder::RecordBuilder;
pub use rollback::RollbackManager;
pub use transform::{apply_transform, TransformKind};
pub use validator::{ValidationContext, Validator};
