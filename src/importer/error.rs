// ==========================================
// 批量导入导出管道 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 传播约定:
//   ParseError / MappingError  → 立即同步返回，阻断后续步骤
//   校验问题                    → 作为数据返回（ValidationResult），不是错误
//   ExecutionError              → 行级，记入 ImportJob.errors，任务继续
//   FatalExecutionError         → 终止剩余行，任务置为 failed
//   RollbackError               → 不满足回滚条件 / 部分回滚
// ==========================================

use crate::domain::job::ImportRowError;
use crate::domain::types::{JobStatus, Module};
use crate::engine::error::JobError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

// ==========================================
// ParseError - CSV 解析错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("CSV 内容为空或缺少表头")]
    Empty,

    #[error("文件编码错误: {0}（仅支持 UTF-8）")]
    Encoding(String),

    #[error("表头重复: {0}")]
    DuplicateHeader(String),

    #[error("表头为空 (第 {0} 列)")]
    EmptyHeader(usize),

    #[error("CSV 格式错误 (行 {row}): {message}")]
    Malformed { row: usize, message: String },
}

// ==========================================
// MappingError - 映射状态错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("未知字段: {module}.{field}")]
    UnknownField { module: Module, field: String },

    #[error("字段 {field} 被多个列映射: {first} / {second}")]
    DuplicateTarget {
        field: String,
        first: String,
        second: String,
    },

    #[error("列重复映射: {0}")]
    DuplicateColumn(String),

    #[error("列不存在: {0}")]
    UnknownColumn(String),

    #[error("模块不匹配: 期望 {expected}, 实际 {actual}")]
    ModuleMismatch { expected: Module, actual: Module },
}

// ==========================================
// ExecutionError - 行级执行错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("类型转换失败 (行 {row}, 字段 {field}): {message}")]
    TypeConversion {
        row: usize,
        field: String,
        column: String,
        value: String,
        message: String,
    },

    #[error("字段值不合法 (行 {row}, 字段 {field}): {message}")]
    InvalidValue {
        row: usize,
        field: String,
        column: String,
        value: String,
        message: String,
    },

    #[error("必填字段为空 (行 {row}, 字段 {field})")]
    MissingRequired {
        row: usize,
        field: String,
        column: String,
    },

    #[error("写入失败 (行 {row}): {message}")]
    Store { row: usize, message: String },
}

impl ExecutionError {
    pub fn row(&self) -> usize {
        match self {
            ExecutionError::TypeConversion { row, .. }
            | ExecutionError::InvalidValue { row, .. }
            | ExecutionError::MissingRequired { row, .. }
            | ExecutionError::Store { row, .. } => *row,
        }
    }

    /// 转换为任务中保存的行错误
    pub fn to_row_error(&self) -> ImportRowError {
        match self {
            ExecutionError::TypeConversion {
                row, column, value, ..
            }
            | ExecutionError::InvalidValue {
                row, column, value, ..
            } => ImportRowError::new(*row, Some(column.clone()), self.to_string())
                .with_value(Some(value.clone())),
            ExecutionError::MissingRequired { row, column, .. } => {
                ImportRowError::new(*row, Some(column.clone()), self.to_string())
            }
            ExecutionError::Store { row, .. } => ImportRowError::new(*row, None, self.to_string()),
        }
    }
}

// ==========================================
// FatalExecutionError - 致命执行错误
// ==========================================
#[derive(Error, Debug)]
pub enum FatalExecutionError {
    #[error("存储不可用 (行 {row}): {message}")]
    StoreUnavailable { row: usize, message: String },

    #[error("任务状态写入失败: {0}")]
    Job(#[from] JobError),
}

// ==========================================
// RollbackError - 回滚错误
// ==========================================
#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("导入任务不存在: {0}")]
    NotFound(String),

    #[error("任务 {job_id} 不可回滚: {reason}")]
    NotEligible { job_id: String, reason: NotEligibleReason },

    #[error(
        "任务 {job_id} 部分回滚: 已删除 {deleted} 条, 缺失 {missing} 条, 导入后被修改 {} 条",
        modified_ids.len()
    )]
    Partial {
        job_id: String,
        deleted: usize,
        missing: usize,
        modified_ids: Vec<String>,
    },

    #[error("回滚时存储错误: {0}")]
    Store(#[from] RepositoryError),

    #[error("回滚时任务状态写入失败: {0}")]
    Job(#[from] JobError),
}

/// 不可回滚的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotEligibleReason {
    NotCompleted(JobStatus),
    AlreadyRolledBack,
    NothingToRollBack,
    NotAnImportJob,
}

impl std::fmt::Display for NotEligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotEligibleReason::NotCompleted(status) => write!(f, "状态为 {}，仅 completed 可回滚", status),
            NotEligibleReason::AlreadyRolledBack => write!(f, "已回滚"),
            NotEligibleReason::NothingToRollBack => write!(f, "无可回滚的新增记录"),
            NotEligibleReason::NotAnImportJob => write!(f, "不是导入任务"),
        }
    }
}

// ==========================================
// ImportError - 导入层聚合错误
// ==========================================
#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Fatal(#[from] FatalExecutionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_conversion_keeps_column_and_value() {
        let err = ExecutionError::TypeConversion {
            row: 3,
            field: "price".to_string(),
            column: "Price".to_string(),
            value: "abc".to_string(),
            message: "不是有效数字".to_string(),
        };
        let row_error = err.to_row_error();
        assert_eq!(row_error.row, 3);
        assert_eq!(row_error.column.as_deref(), Some("Price"));
        assert_eq!(row_error.value.as_deref(), Some("abc"));
    }

    #[test]
    fn test_partial_rollback_message_counts() {
        let err = RollbackError::Partial {
            job_id: "j1".to_string(),
            deleted: 3,
            missing: 1,
            modified_ids: vec!["r2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("已删除 3"));
        assert!(msg.contains("缺失 1"));
        assert!(msg.contains("被修改 1"));
    }
}
