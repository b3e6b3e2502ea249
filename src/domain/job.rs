// ==========================================
// 批量导入导出管道 - 任务模型
// ==========================================
// ImportJob / ExportJob 在提交时创建，处理中仅由执行器修改，
// 终态后不可变（唯一例外: completed → rolled_back）
// ==========================================

use crate::domain::field::FieldMapping;
use crate::domain::types::{DuplicateHandling, JobStatus, Module};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ImportRowError - 行级错误/警告
// ==========================================
// row=0 表示任务级（非行）消息，例如致命错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRowError {
    pub row: usize,
    pub column: Option<String>,
    pub message: String,
    pub value: Option<String>,
}

impl ImportRowError {
    pub fn new(row: usize, column: Option<String>, message: impl Into<String>) -> Self {
        Self {
            row,
            column,
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: Option<String>) -> Self {
        self.value = value;
        self
    }
}

// ==========================================
// ImportJob - 导入任务
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub module: Module,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub total_rows: usize,
    pub rows_processed: usize,
    pub rows_imported: usize,
    pub rows_inserted: usize, // rows_imported 中真正新建的行（回滚依据）
    pub rows_failed: usize,
    pub rows_skipped: usize,
    pub status: JobStatus,
    pub errors: Vec<ImportRowError>,
    pub warnings: Vec<ImportRowError>,
    pub can_rollback: bool,
    pub rolled_back: bool,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub mapping_used: Vec<FieldMapping>,
    pub duplicate_handling: DuplicateHandling,
    pub batch_size: usize,
    pub template_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        module: Module,
        file_name: impl Into<String>,
        file_size_bytes: u64,
        total_rows: usize,
        mapping_used: Vec<FieldMapping>,
        duplicate_handling: DuplicateHandling,
        batch_size: usize,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            module,
            file_name: file_name.into(),
            file_size_bytes,
            total_rows,
            rows_processed: 0,
            rows_imported: 0,
            rows_inserted: 0,
            rows_failed: 0,
            rows_skipped: 0,
            status: JobStatus::Pending,
            errors: Vec::new(),
            warnings: Vec::new(),
            can_rollback: false,
            rolled_back: false,
            rolled_back_at: None,
            mapping_used,
            duplicate_handling,
            batch_size,
            template_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 进度 = rows_processed / total_rows
    pub fn progress(&self) -> f64 {
        if self.total_rows == 0 {
            return if self.status.is_terminal() { 1.0 } else { 0.0 };
        }
        self.rows_processed as f64 / self.total_rows as f64
    }

    /// rows_processed == imported + failed + skipped
    pub fn counters_balanced(&self) -> bool {
        self.rows_processed == self.rows_imported + self.rows_failed + self.rows_skipped
    }

    /// 是否满足回滚条件
    pub fn is_rollback_eligible(&self) -> bool {
        self.status == JobStatus::Completed && self.can_rollback && !self.rolled_back
    }
}

// ==========================================
// ExportJob - 导出任务
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: String,
    pub module: Module,
    pub file_name: String,
    pub fields: Vec<String>,
    pub total_rows: usize,
    pub rows_exported: usize,
    pub status: JobStatus,
    pub file_url: Option<String>,
    pub warnings: Vec<String>,
    pub error_message: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    pub fn new(
        module: Module,
        file_name: impl Into<String>,
        fields: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            module,
            file_name: file_name.into(),
            fields,
            total_rows: 0,
            rows_exported: 0,
            status: JobStatus::Pending,
            file_url: None,
            warnings: Vec::new(),
            error_message: None,
            expires_at,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ==========================================
// JobKind - 任务种类（显式标签）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    Import(ImportJob),
    Export(ExportJob),
}

impl JobKind {
    pub fn id(&self) -> &str {
        match self {
            JobKind::Import(job) => &job.id,
            JobKind::Export(job) => &job.id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobKind::Import(job) => job.status,
            JobKind::Export(job) => job.status,
        }
    }

    pub fn into_import(self) -> Option<ImportJob> {
        match self {
            JobKind::Import(job) => Some(job),
            JobKind::Export(_) => None,
        }
    }

    pub fn into_export(self) -> Option<ExportJob> {
        match self {
            JobKind::Export(job) => Some(job),
            JobKind::Import(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> ImportJob {
        ImportJob::new(
            Module::Products,
            "products.csv",
            128,
            4,
            vec![],
            DuplicateHandling::Skip,
            50,
        )
    }

    #[test]
    fn test_new_import_job_is_pending() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.counters_balanced());
        assert!(!job.is_rollback_eligible());
        assert_eq!(job.progress(), 0.0);
    }

    #[test]
    fn test_progress_ratio() {
        let mut job = sample_job();
        job.rows_processed = 2;
        job.rows_imported = 1;
        job.rows_skipped = 1;
        assert!((job.progress() - 0.5).abs() < f64::EPSILON);
        assert!(job.counters_balanced());
    }

    #[test]
    fn test_job_kind_is_tagged() {
        let kind = JobKind::Import(sample_job());
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "import");
        assert_eq!(kind.status(), JobStatus::Pending);
    }
}
