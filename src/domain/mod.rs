// ==========================================
// 批量导入导出管道 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、静态字段目录
// 红线: 不含数据访问逻辑,不含导入执行逻辑
// ==========================================

pub mod catalog;
pub mod field;
pub mod job;
pub mod record;
pub mod template;
pub mod types;
pub mod validation;

// 重导出核心类型
pub use field::{FieldDefinition, FieldMapping, ResolvedRules};
pub use job::{ExportJob, ImportJob, ImportRowError, JobKind};
pub use record::{NaturalKey, RawRow, RecordFields, StoredRecord};
pub use template::{ImportTemplate, RuleKind, TemplateBundle, ValidationRule};
pub use types::{DataType, DateFormat, DuplicateHandling, JobStatus, Module, Severity};
pub use validation::{ValidationIssue, ValidationResult};
