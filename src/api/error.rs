// ==========================================
// 批量导入导出管道 - API层错误类型
// ==========================================
// 职责: 汇总各层错误，转换为调用方可理解的错误消息
// 约定: 校验未通过时携带完整 ValidationResult，便于定位到行/列
// ==========================================

use crate::domain::validation::ValidationResult;
use crate::engine::error::JobError;
use crate::exporter::error::ExportError;
use crate::importer::error::{FatalExecutionError, ImportError, MappingError, ParseError, RollbackError};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无权操作: {0}")]
    Forbidden(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 导入管道错误
    // ==========================================
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// 校验存在 error 级问题，导入被拒绝
    #[error("数据校验未通过: {} 个错误", .0.error_count())]
    ValidationFailed(ValidationResult),

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error("导入执行失败: {0}")]
    ImportFailed(String),

    #[error("导出失败: {0}")]
    ExportFailed(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::Unavailable(msg) => ApiError::StoreUnavailable(msg),
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::InvalidInput(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::SerializationError(msg) | RepositoryError::InternalError(msg) => {
                ApiError::InternalError(msg)
            }
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::NotFound(format!("任务(id={})不存在", id)),
            JobError::InvalidTransition { from, to, .. } => ApiError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            JobError::LeaseLost(id) => {
                ApiError::ImportFailed(format!("任务 {} 已被其他执行者接管或取消", id))
            }
            JobError::Repository(e) => e.into(),
        }
    }
}

impl From<FatalExecutionError> for ApiError {
    fn from(err: FatalExecutionError) -> Self {
        match err {
            FatalExecutionError::Job(e) => e.into(),
            other => ApiError::ImportFailed(other.to_string()),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Parse(e) => ApiError::Parse(e),
            ImportError::Mapping(e) => ApiError::Mapping(e),
            ImportError::Fatal(e) => e.into(),
            ImportError::Repository(e) => e.into(),
            ImportError::Job(e) => e.into(),
            ImportError::Other(e) => ApiError::Other(e),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Mapping(e) => ApiError::Mapping(e),
            ExportError::Repository(e) => e.into(),
            ExportError::Job(e) => e.into(),
            other => ApiError::ExportFailed(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
