// ==========================================
// 批量导入导出管道 - 任务跟踪错误类型
// ==========================================

use crate::domain::types::JobStatus;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("任务不存在: {0}")]
    NotFound(String),

    #[error("非法状态迁移 (job_id={job_id}): {from} → {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    // 另一个执行者已接管，或任务已被取消
    #[error("任务租约已失效 (job_id={0})")]
    LeaseLost(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type JobResult<T> = Result<T, JobError>;
