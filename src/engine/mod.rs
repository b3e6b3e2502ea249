// ==========================================
// 批量导入导出管道 - 引擎层
// ==========================================
// 职责: 任务生命周期管理,不拼业务 SQL
// ==========================================

pub mod error;
pub mod job_tracker;

pub use error::{JobError, JobResult};
pub use job_tracker::{JobKindFilter, JobLease, JobTracker};
