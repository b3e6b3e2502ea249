// ==========================================
// 批量导入导出管道 - 导入执行器
// ==========================================
// 流程: 领取任务租约 → 分批 → 批内有界并发写入 → 每批持久化进度
//       → 批次之间检查取消 → 写入终态
// 并发: 同一自然键由异步锁串行化（跨任务共享）；
//       计数器在一把 std Mutex 下按行结果原子更新
// 失败: 行级错误记入 errors 后继续；存储不可用为致命错误，
//       在途批次完成后停止，任务置为 failed
// ==========================================

use crate::domain::job::{ImportJob, ImportRowError};
use crate::domain::record::{NaturalKey, RawRow, RecordFields};
use crate::domain::types::{DuplicateHandling, JobStatus, Module};
use crate::engine::error::JobError;
use crate::engine::job_tracker::{JobLease, JobTracker};
use crate::importer::error::{ExecutionError, FatalExecutionError};
use crate::importer::record_builder::RecordBuilder;
use crate::repository::error::RepositoryError;
use crate::repository::record_store::RecordStore;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

/// 单行处理结果
#[derive(Debug)]
enum RowOutcome {
    Inserted,
    Updated,
    Skipped(Option<ImportRowError>),
    Failed(ExecutionError),
    Fatal { row: usize, message: String },
}

// ==========================================
// KeyLocks - 自然键锁表
// ==========================================
#[derive(Default)]
struct KeyLocks {
    inner: Mutex<HashMap<NaturalKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    fn table(&self) -> MutexGuard<'_, HashMap<NaturalKey, Arc<AsyncMutex<()>>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn acquire(&self, key: &NaturalKey) -> OwnedMutexGuard<()> {
        let lock = self.table().entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// 无人等待时移除条目
    fn release(&self, key: &NaturalKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut table = self.table();
        if table.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(key);
        }
    }
}

// ==========================================
// ImportExecutor
// ==========================================
pub struct ImportExecutor {
    store: Arc<dyn RecordStore>,
    tracker: Arc<JobTracker>,
    key_locks: KeyLocks,
}

impl ImportExecutor {
    pub fn new(store: Arc<dyn RecordStore>, tracker: Arc<JobTracker>) -> Self {
        Self {
            store,
            tracker,
            key_locks: KeyLocks::default(),
        }
    }

    /// 执行一个 pending 导入任务
    ///
    /// # 参数
    /// - job_id: 已创建的任务（状态必须为 pending）
    /// - builder: 由任务映射构造的记录构造器
    /// - rows: 解析后的数据行
    /// - worker_count: 批内并发度（最小为 1）
    ///
    /// # 返回
    /// - Ok(job): 终态任务（completed / failed / cancelled）
    /// - Err(StoreUnavailable): 存储不可用，任务已置为 failed
    /// - Err(Job): 任务无法领取或租约丢失
    #[instrument(skip(self, builder, rows), fields(module = %builder.module(), rows = rows.len()))]
    pub async fn execute(
        &self,
        job_id: &str,
        builder: &RecordBuilder,
        rows: &[RawRow],
        worker_count: usize,
    ) -> Result<ImportJob, FatalExecutionError> {
        let (job, lease) = self.tracker.begin_import(job_id)?;
        let batch_size = job.batch_size.max(1);
        let workers = worker_count.max(1);
        let policy = job.duplicate_handling;
        info!(
            job_id = job_id,
            total_rows = job.total_rows,
            batch_size = batch_size,
            workers = workers,
            policy = %policy,
            "开始执行导入"
        );

        let state = Mutex::new(job);
        let mut fatal: Option<(usize, String)> = None;
        let mut cancelled = false;

        for (batch_no, batch) in rows.chunks(batch_size).enumerate() {
            if lease.is_cancel_requested() {
                info!(job_id = job_id, batch = batch_no, "收到取消请求，停止后续批次");
                cancelled = true;
                break;
            }

            // 先收集为具体的 future 列表，再交给有界并发执行
            let row_tasks: Vec<_> = batch
                .iter()
                .map(|row| async move {
                    let outcome = self.process_row(builder, row, policy, job_id).await;
                    (row.row_number, outcome)
                })
                .collect();
            let outcomes: Vec<(usize, RowOutcome)> = stream::iter(row_tasks)
                .buffer_unordered(workers)
                .collect()
                .await;

            for (row, outcome) in outcomes {
                if let RowOutcome::Fatal { row, message } = &outcome {
                    if fatal.as_ref().map_or(true, |(first, _)| row < first) {
                        fatal = Some((*row, message.clone()));
                    }
                    continue;
                }
                apply_outcome(&mut lock_state(&state), row, outcome);
            }

            let snapshot = lock_state(&state).clone();
            debug!(
                job_id = job_id,
                batch = batch_no,
                rows_processed = snapshot.rows_processed,
                rows_failed = snapshot.rows_failed,
                "批次完成"
            );
            self.persist_progress(&lease, &snapshot)?;

            if fatal.is_some() {
                break;
            }
        }

        let mut job = state.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        job.errors.sort_by_key(|e| e.row);
        job.warnings.sort_by_key(|w| w.row);

        let fatal_error = fatal.map(|(row, message)| {
            let err = FatalExecutionError::StoreUnavailable { row, message };
            error!(job_id = job_id, error = %err, "导入因致命错误终止");
            job.errors.push(ImportRowError::new(0, None, err.to_string()));
            err
        });

        job.status = final_status(&job, fatal_error.is_some(), cancelled);
        job.can_rollback = job.rows_inserted > 0 && self.store.supports_job_tags();
        self.tracker.finish_import(&lease, &mut job)?;

        match fatal_error {
            Some(err) => Err(err),
            None => Ok(job),
        }
    }

    fn persist_progress(&self, lease: &JobLease, job: &ImportJob) -> Result<(), FatalExecutionError> {
        match self.tracker.save_progress(lease, job) {
            Ok(()) => Ok(()),
            Err(e @ JobError::LeaseLost(_)) | Err(e @ JobError::InvalidTransition { .. }) => {
                Err(e.into())
            }
            Err(e) => {
                // 进度仅用于轮询，写入失败不影响导入结果
                warn!(job_id = %job.id, error = %e, "进度持久化失败");
                Ok(())
            }
        }
    }

    async fn process_row(
        &self,
        builder: &RecordBuilder,
        row: &RawRow,
        policy: DuplicateHandling,
        job_id: &str,
    ) -> RowOutcome {
        let module = builder.module();
        let fields = match builder.build(row) {
            Ok(fields) => fields,
            Err(e) => return RowOutcome::Failed(e),
        };

        let key = match policy {
            DuplicateHandling::CreateNew => None,
            _ => NaturalKey::from_fields(module, &fields),
        };
        let Some(key) = key else {
            return self.insert(module, row.row_number, fields, job_id).await;
        };

        let guard = self.key_locks.acquire(&key).await;
        let outcome = self
            .write_keyed(module, row.row_number, &key, fields, policy, job_id)
            .await;
        self.key_locks.release(&key, guard);
        outcome
    }

    async fn write_keyed(
        &self,
        module: Module,
        row: usize,
        key: &NaturalKey,
        mut fields: RecordFields,
        policy: DuplicateHandling,
        job_id: &str,
    ) -> RowOutcome {
        let existing = match self.store.find_by_natural_key(module, key).await {
            Ok(existing) => existing,
            Err(e) => return store_failure(row, e),
        };
        let Some(existing) = existing else {
            return self.insert(module, row, fields, job_id).await;
        };

        match policy {
            DuplicateHandling::Skip => RowOutcome::Skipped(Some(ImportRowError::new(
                row,
                None,
                format!("自然键 {} 已存在，按 skip 策略跳过", key),
            ))),
            DuplicateHandling::Merge => {
                fields.retain(|_, value| !value.is_null());
                if fields.is_empty() {
                    return RowOutcome::Skipped(Some(ImportRowError::new(
                        row,
                        None,
                        format!("自然键 {} 已存在且无可合并的非空值", key),
                    )));
                }
                self.update(module, row, &existing.id, fields).await
            }
            DuplicateHandling::Update | DuplicateHandling::CreateNew => {
                self.update(module, row, &existing.id, fields).await
            }
        }
    }

    async fn insert(&self, module: Module, row: usize, fields: RecordFields, job_id: &str) -> RowOutcome {
        match self.store.insert(module, fields, Some(job_id)).await {
            Ok(_) => RowOutcome::Inserted,
            Err(e) => store_failure(row, e),
        }
    }

    async fn update(&self, module: Module, row: usize, id: &str, fields: RecordFields) -> RowOutcome {
        match self.store.update(module, id, fields).await {
            Ok(_) => RowOutcome::Updated,
            Err(e) => store_failure(row, e),
        }
    }
}

fn lock_state(state: &Mutex<ImportJob>) -> MutexGuard<'_, ImportJob> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn store_failure(row: usize, err: RepositoryError) -> RowOutcome {
    if err.is_unavailable() {
        RowOutcome::Fatal {
            row,
            message: err.to_string(),
        }
    } else {
        RowOutcome::Failed(ExecutionError::Store {
            row,
            message: err.to_string(),
        })
    }
}

/// 计数器与错误列表一起更新，保证 processed = imported + failed + skipped
fn apply_outcome(job: &mut ImportJob, row: usize, outcome: RowOutcome) {
    match outcome {
        RowOutcome::Inserted => {
            job.rows_imported += 1;
            job.rows_inserted += 1;
        }
        RowOutcome::Updated => job.rows_imported += 1,
        RowOutcome::Skipped(warning) => {
            job.rows_skipped += 1;
            job.warnings.extend(warning);
        }
        RowOutcome::Failed(err) => {
            warn!(job_id = %job.id, row = row, error = %err, "行导入失败");
            job.rows_failed += 1;
            job.errors.push(err.to_row_error());
        }
        RowOutcome::Fatal { .. } => return,
    }
    job.rows_processed += 1;
}

/// 终态: 致命错误 → failed；取消 → cancelled；全部失败 → failed；否则 completed
fn final_status(job: &ImportJob, fatal: bool, cancelled: bool) -> JobStatus {
    if fatal {
        JobStatus::Failed
    } else if cancelled {
        JobStatus::Cancelled
    } else if job.rows_processed > 0 && job.rows_failed == job.rows_processed {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DuplicateHandling;

    fn job() -> ImportJob {
        ImportJob::new(Module::Products, "p.csv", 0, 3, vec![], DuplicateHandling::Skip, 50)
    }

    #[test]
    fn test_apply_outcome_keeps_counters_balanced() {
        let mut job = job();
        apply_outcome(&mut job, 1, RowOutcome::Inserted);
        apply_outcome(&mut job, 2, RowOutcome::Updated);
        apply_outcome(&mut job, 3, RowOutcome::Skipped(None));
        apply_outcome(
            &mut job,
            4,
            RowOutcome::Failed(ExecutionError::Store {
                row: 4,
                message: "boom".to_string(),
            }),
        );
        assert_eq!(job.rows_processed, 4);
        assert_eq!(job.rows_imported, 2);
        assert_eq!(job.rows_inserted, 1);
        assert!(job.counters_balanced());
        assert_eq!(job.errors[0].row, 4);
    }

    #[test]
    fn test_final_status_threshold() {
        let mut job = job();
        assert_eq!(final_status(&job, false, false), JobStatus::Completed);

        job.rows_processed = 2;
        job.rows_failed = 2;
        assert_eq!(final_status(&job, false, false), JobStatus::Failed);

        job.rows_processed = 3;
        job.rows_imported = 1;
        assert_eq!(final_status(&job, false, false), JobStatus::Completed);
        assert_eq!(final_status(&job, false, true), JobStatus::Cancelled);
        assert_eq!(final_status(&job, true, true), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_key_locks_are_cleaned_up() {
        let locks = KeyLocks::default();
        let key = NaturalKey::from_parts(["w-1"]).unwrap();
        let guard = locks.acquire(&key).await;
        assert_eq!(locks.table().len(), 1);
        locks.release(&key, guard);
        assert!(locks.table().is_empty());
    }
}
