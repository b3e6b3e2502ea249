// ==========================================
// 批量导入导出管道 - 任务跟踪器
// ==========================================
// 职责: 任务生命周期（pending → processing → 终态 [→ rolled_back]）
// 并发: begin_* 以 CAS 签发租约，处理中的写入必须持有租约；
//       取消通过协作式标志位在批次之间生效
// ==========================================

use crate::domain::job::{ExportJob, ImportJob, JobKind};
use crate::domain::types::JobStatus;
use crate::engine::error::{JobError, JobResult};
use crate::repository::job_repo::{JobRepository, WriteGuard};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

// ==========================================
// JobLease - 处理中任务的写入凭证
// ==========================================
#[derive(Debug, Clone)]
pub struct JobLease {
    job_id: String,
    lease_id: String,
    cancel_flag: Arc<AtomicBool>,
}

impl JobLease {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }
}

/// list_jobs 的种类过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKindFilter {
    Import,
    Export,
}

// ==========================================
// JobTracker
// ==========================================
pub struct JobTracker {
    repo: Arc<JobRepository>,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl JobTracker {
    pub fn new(repo: Arc<JobRepository>) -> Self {
        Self {
            repo,
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    // ===== 创建 =====

    pub fn create_import(&self, job: &ImportJob) -> JobResult<()> {
        self.repo.insert_import(job)?;
        info!(job_id = %job.id, module = %job.module, total_rows = job.total_rows, "导入任务已创建");
        Ok(())
    }

    pub fn create_export(&self, job: &ExportJob) -> JobResult<()> {
        self.repo.insert_export(job)?;
        info!(job_id = %job.id, module = %job.module, "导出任务已创建");
        Ok(())
    }

    // ===== 查询 =====

    pub fn get(&self, id: &str) -> JobResult<JobKind> {
        if let Some(job) = self.repo.find_import(id)? {
            return Ok(JobKind::Import(job));
        }
        if let Some(job) = self.repo.find_export(id)? {
            return Ok(JobKind::Export(job));
        }
        Err(JobError::NotFound(id.to_string()))
    }

    pub fn get_import(&self, id: &str) -> JobResult<ImportJob> {
        self.repo
            .find_import(id)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub fn get_export(&self, id: &str) -> JobResult<ExportJob> {
        self.repo
            .find_export(id)?
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// 最近的任务（按创建时间倒序）
    ///
    /// # 参数
    /// - kind: None 表示两类都要
    /// - limit: 0 表示使用仓储默认上限
    pub fn list_jobs(&self, kind: Option<JobKindFilter>, limit: usize) -> JobResult<Vec<JobKind>> {
        let mut jobs = Vec::new();
        if kind != Some(JobKindFilter::Export) {
            jobs.extend(self.repo.list_imports(limit)?.into_iter().map(JobKind::Import));
        }
        if kind != Some(JobKindFilter::Import) {
            jobs.extend(self.repo.list_exports(limit)?.into_iter().map(JobKind::Export));
        }
        jobs.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
        if limit > 0 {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    // ===== 处理 =====

    /// pending → processing，返回租约
    pub fn begin_import(&self, id: &str) -> JobResult<(ImportJob, JobLease)> {
        let lease_id = uuid::Uuid::new_v4().to_string();
        let claimed = self.repo.claim_import(id, &lease_id, Utc::now())?;
        let job = self.get_import(id)?;
        if claimed == 0 {
            return Err(JobError::InvalidTransition {
                job_id: id.to_string(),
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        debug!(job_id = id, "导入任务已开始处理");
        Ok((job, self.register_lease(id, lease_id)))
    }

    pub fn begin_export(&self, id: &str) -> JobResult<(ExportJob, JobLease)> {
        let lease_id = uuid::Uuid::new_v4().to_string();
        let claimed = self.repo.claim_export(id, &lease_id)?;
        let job = self.get_export(id)?;
        if claimed == 0 {
            return Err(JobError::InvalidTransition {
                job_id: id.to_string(),
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        Ok((job, self.register_lease(id, lease_id)))
    }

    /// 持久化处理中的计数与错误列表
    pub fn save_progress(&self, lease: &JobLease, job: &ImportJob) -> JobResult<()> {
        if job.status != JobStatus::Processing {
            return Err(JobError::InvalidTransition {
                job_id: job.id.clone(),
                from: JobStatus::Processing,
                to: job.status,
            });
        }
        let rows = self.repo.write_import(job, WriteGuard::Lease(lease.lease_id()))?;
        if rows == 0 {
            return Err(JobError::LeaseLost(job.id.clone()));
        }
        Ok(())
    }

    /// 写入终态（job.status 必须是 processing 可迁移到的状态）
    pub fn finish_import(&self, lease: &JobLease, job: &mut ImportJob) -> JobResult<()> {
        check_transition(&job.id, JobStatus::Processing, job.status)?;
        job.completed_at = Some(Utc::now());
        let rows = self.repo.write_import(job, WriteGuard::Lease(lease.lease_id()))?;
        self.release(lease);
        if rows == 0 {
            return Err(JobError::LeaseLost(job.id.clone()));
        }
        info!(
            job_id = %job.id,
            status = %job.status,
            rows_imported = job.rows_imported,
            rows_failed = job.rows_failed,
            rows_skipped = job.rows_skipped,
            "导入任务结束"
        );
        Ok(())
    }

    pub fn finish_export(&self, lease: &JobLease, job: &mut ExportJob) -> JobResult<()> {
        check_transition(&job.id, JobStatus::Processing, job.status)?;
        job.completed_at = Some(Utc::now());
        let rows = self.repo.write_export(job, WriteGuard::Lease(lease.lease_id()))?;
        self.release(lease);
        if rows == 0 {
            return Err(JobError::LeaseLost(job.id.clone()));
        }
        info!(job_id = %job.id, status = %job.status, rows_exported = job.rows_exported, "导出任务结束");
        Ok(())
    }

    // ===== 取消 =====

    /// 取消任务
    ///
    /// # 返回
    /// - pending 任务: 直接置为 cancelled
    /// - 本进程处理中的任务: 置取消标志，由执行者在批次之间收尾
    /// - 无人持有的 processing 任务（执行者已退出）: 直接置为 cancelled
    pub fn request_cancel(&self, id: &str) -> JobResult<JobKind> {
        match self.get(id)? {
            JobKind::Import(mut job) => {
                if job.status == JobStatus::Processing && self.raise_flag(id) {
                    return Ok(JobKind::Import(job));
                }
                let expected = job.status;
                check_transition(id, expected, JobStatus::Cancelled)?;
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                if self.repo.write_import(&job, WriteGuard::Status(expected))? == 0 {
                    return self.request_cancel(id);
                }
                info!(job_id = id, "导入任务已取消");
                Ok(JobKind::Import(job))
            }
            JobKind::Export(mut job) => {
                if job.status == JobStatus::Processing && self.raise_flag(id) {
                    return Ok(JobKind::Export(job));
                }
                let expected = job.status;
                check_transition(id, expected, JobStatus::Cancelled)?;
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                if self.repo.write_export(&job, WriteGuard::Status(expected))? == 0 {
                    return self.request_cancel(id);
                }
                info!(job_id = id, "导出任务已取消");
                Ok(JobKind::Export(job))
            }
        }
    }

    // ===== 回滚 =====

    /// completed → rolled_back
    pub fn mark_rolled_back(&self, job: &mut ImportJob) -> JobResult<()> {
        check_transition(&job.id, job.status, JobStatus::RolledBack)?;
        let expected = job.status;
        job.status = JobStatus::RolledBack;
        job.rolled_back = true;
        job.rolled_back_at = Some(Utc::now());
        job.can_rollback = false;
        if self.repo.write_import(job, WriteGuard::Status(expected))? == 0 {
            let current = self.get_import(&job.id)?;
            return Err(JobError::InvalidTransition {
                job_id: job.id.clone(),
                from: current.status,
                to: JobStatus::RolledBack,
            });
        }
        Ok(())
    }

    // ===== 导出产物 =====

    /// 截至 now 已过期且仍有产物的导出任务
    pub fn expired_exports(&self, now: DateTime<Utc>) -> JobResult<Vec<ExportJob>> {
        Ok(self.repo.list_expired_exports(now)?)
    }

    pub fn clear_export_file(&self, id: &str) -> JobResult<()> {
        self.repo.clear_export_file(id)?;
        Ok(())
    }

    fn register_lease(&self, id: &str, lease_id: String) -> JobLease {
        let flag = Arc::new(AtomicBool::new(false));
        match self.cancel_flags.lock() {
            Ok(mut flags) => {
                flags.insert(id.to_string(), flag.clone());
            }
            Err(e) => warn!(job_id = id, error = %e, "取消标志表锁已中毒，任务将无法被协作取消"),
        }
        JobLease {
            job_id: id.to_string(),
            lease_id,
            cancel_flag: flag,
        }
    }

    fn raise_flag(&self, id: &str) -> bool {
        match self.cancel_flags.lock() {
            Ok(flags) => match flags.get(id) {
                Some(flag) => {
                    flag.store(true, Ordering::SeqCst);
                    info!(job_id = id, "已请求取消处理中的任务");
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn release(&self, lease: &JobLease) {
        if let Ok(mut flags) = self.cancel_flags.lock() {
            flags.remove(lease.job_id());
        }
    }
}

fn check_transition(job_id: &str, from: JobStatus, to: JobStatus) -> JobResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(JobError::InvalidTransition {
            job_id: job_id.to_string(),
            from,
            to,
        })
    }
}

fn created_at(job: &JobKind) -> chrono::DateTime<Utc> {
    match job {
        JobKind::Import(j) => j.created_at,
        JobKind::Export(j) => j.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DuplicateHandling, Module};
    use rusqlite::Connection;

    fn tracker() -> JobTracker {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        JobTracker::new(Arc::new(JobRepository::new(Arc::new(Mutex::new(conn)))))
    }

    fn import_job() -> ImportJob {
        ImportJob::new(Module::Orders, "orders.csv", 10, 2, vec![], DuplicateHandling::Skip, 50)
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let tracker = tracker();
        let job = import_job();
        tracker.create_import(&job).unwrap();
        tracker.begin_import(&job.id).unwrap();
        let err = tracker.begin_import(&job.id).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { from: JobStatus::Processing, .. }));
    }

    #[test]
    fn test_progress_requires_live_lease() {
        let tracker = tracker();
        let job = import_job();
        tracker.create_import(&job).unwrap();
        let (mut running, lease) = tracker.begin_import(&job.id).unwrap();

        let forged = JobLease {
            job_id: job.id.clone(),
            lease_id: "forged".to_string(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        };
        running.rows_processed = 1;
        running.rows_imported = 1;
        assert!(matches!(
            tracker.save_progress(&forged, &running),
            Err(JobError::LeaseLost(_))
        ));
        tracker.save_progress(&lease, &running).unwrap();

        running.status = JobStatus::Completed;
        tracker.finish_import(&lease, &mut running).unwrap();
        assert!(tracker.save_progress(&lease, &running).is_err());
        assert_eq!(tracker.get_import(&job.id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_cancel_pending_and_processing() {
        let tracker = tracker();
        let pending = import_job();
        tracker.create_import(&pending).unwrap();
        let cancelled = tracker.request_cancel(&pending.id).unwrap();
        assert_eq!(cancelled.status(), JobStatus::Cancelled);

        let running = import_job();
        tracker.create_import(&running).unwrap();
        let (_, lease) = tracker.begin_import(&running.id).unwrap();
        assert!(!lease.is_cancel_requested());
        tracker.request_cancel(&running.id).unwrap();
        assert!(lease.is_cancel_requested());

        assert!(matches!(
            tracker.request_cancel(&pending.id),
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_rolled_back_only_from_completed() {
        let tracker = tracker();
        let job = import_job();
        tracker.create_import(&job).unwrap();
        let mut loaded = tracker.get_import(&job.id).unwrap();
        assert!(tracker.mark_rolled_back(&mut loaded).is_err());

        let (mut running, lease) = tracker.begin_import(&job.id).unwrap();
        running.status = JobStatus::Completed;
        tracker.finish_import(&lease, &mut running).unwrap();
        tracker.mark_rolled_back(&mut running).unwrap();

        let stored = tracker.get_import(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::RolledBack);
        assert!(stored.rolled_back && !stored.can_rollback);
    }

    #[test]
    fn test_list_jobs_filters_kind() {
        let tracker = tracker();
        tracker.create_import(&import_job()).unwrap();
        let export = ExportJob::new(Module::Orders, "orders.csv", vec![], Utc::now());
        tracker.create_export(&export).unwrap();

        assert_eq!(tracker.list_jobs(None, 0).unwrap().len(), 2);
        let exports = tracker.list_jobs(Some(JobKindFilter::Export), 10).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].id(), export.id);
    }
}
