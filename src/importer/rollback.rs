// ==========================================
// 批量导入导出管道 - 回滚管理器
// ==========================================
// 条件: status == completed && can_rollback && !rolled_back
// 行为: 删除该任务新增的全部记录（按任务标签追溯）；
//       只要删除已执行，任务即迁移到 rolled_back；
//       缺失/任务结束后被修改的记录以 RollbackError::Partial 报告，
//       已完成的删除不会撤销
// ==========================================

use crate::domain::job::ImportJob;
use crate::domain::types::JobStatus;
use crate::engine::error::JobError;
use crate::engine::job_tracker::JobTracker;
use crate::importer::error::{NotEligibleReason, RollbackError};
use crate::repository::record_store::RecordStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct RollbackManager {
    store: Arc<dyn RecordStore>,
    tracker: Arc<JobTracker>,
}

impl RollbackManager {
    pub fn new(store: Arc<dyn RecordStore>, tracker: Arc<JobTracker>) -> Self {
        Self { store, tracker }
    }

    /// 回滚一个导入任务
    ///
    /// # 返回
    /// - Ok(job): 全部新增记录已删除，任务为 rolled_back
    /// - Err(Partial): 任务已为 rolled_back，但存在缺失或被修改的记录
    /// - Err(NotEligible / NotFound): 未做任何修改
    #[instrument(skip(self))]
    pub async fn rollback(&self, job_id: &str) -> Result<ImportJob, RollbackError> {
        let mut job = match self.tracker.get(job_id) {
            Ok(kind) => kind.into_import().ok_or_else(|| RollbackError::NotEligible {
                job_id: job_id.to_string(),
                reason: NotEligibleReason::NotAnImportJob,
            })?,
            Err(JobError::NotFound(_)) => return Err(RollbackError::NotFound(job_id.to_string())),
            Err(e) => return Err(e.into()),
        };

        check_eligible(&job)?;

        let finished_at = job.completed_at.unwrap_or(job.created_at);
        let deletion = self
            .store
            .delete_by_job_tag(job.module, &job.id, finished_at)
            .await?;
        let deleted = deletion.deleted_ids.len();
        let missing = job.rows_inserted.saturating_sub(deleted);

        self.tracker.mark_rolled_back(&mut job)?;

        if missing > 0 || !deletion.modified_ids.is_empty() {
            warn!(
                job_id = job_id,
                deleted = deleted,
                missing = missing,
                modified = deletion.modified_ids.len(),
                "部分回滚"
            );
            return Err(RollbackError::Partial {
                job_id: job.id,
                deleted,
                missing,
                modified_ids: deletion.modified_ids,
            });
        }

        info!(job_id = job_id, deleted = deleted, "回滚完成");
        Ok(job)
    }
}

fn check_eligible(job: &ImportJob) -> Result<(), RollbackError> {
    let reason = if job.rolled_back || job.status == JobStatus::RolledBack {
        NotEligibleReason::AlreadyRolledBack
    } else if job.status != JobStatus::Completed {
        NotEligibleReason::NotCompleted(job.status)
    } else if !job.can_rollback {
        NotEligibleReason::NothingToRollBack
    } else {
        return Ok(());
    };
    Err(RollbackError::NotEligible {
        job_id: job.id.clone(),
        reason,
    })
}
