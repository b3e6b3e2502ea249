// ==========================================
// 批量导入导出管道 - 导出模块错误类型
// ==========================================

use crate::engine::error::JobError;
use crate::importer::error::MappingError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    // 选择了目录中不存在的字段
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("CSV 写入失败: {0}")]
    Csv(#[from] csv::Error),

    #[error("导出文件写入失败: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Job(#[from] JobError),
}

pub type ExportResult<T> = Result<T, ExportError>;
