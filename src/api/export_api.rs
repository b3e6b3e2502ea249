// ==========================================
// 批量导入导出管道 - 导出API
// ==========================================
// 职责: 同步导出 / 后台导出任务 / 过期产物清理
// 产物: 写入配置的导出目录，file_url 为本地路径；过期后删除
// ==========================================

use crate::api::error::ApiResult;
use crate::config::import_config_trait::ImportConfigReader;
use crate::domain::job::ExportJob;
use crate::domain::types::{JobStatus, Module};
use crate::engine::job_tracker::{JobLease, JobTracker};
use crate::exporter::error::ExportResult;
use crate::exporter::export_generator::{write_export_file, ExportGenerator, ExportOptions, ExportOutput};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// 导出API
pub struct ExportApi {
    generator: Arc<ExportGenerator>,
    tracker: Arc<JobTracker>,
    config: Arc<dyn ImportConfigReader>,
}

impl ExportApi {
    pub fn new(
        generator: Arc<ExportGenerator>,
        tracker: Arc<JobTracker>,
        config: Arc<dyn ImportConfigReader>,
    ) -> Self {
        Self {
            generator,
            tracker,
            config,
        }
    }

    /// 按配置生成默认导出选项（日期格式、货币符号）
    pub async fn default_options(&self) -> ApiResult<ExportOptions> {
        Ok(ExportOptions {
            date_format: self.config.get_export_date_format().await?,
            currency_symbol: self.config.get_currency_symbol().await?,
            ..ExportOptions::default()
        })
    }

    /// 同步导出，直接返回 CSV 内容
    pub async fn export(
        &self,
        module: Module,
        fields: &[String],
        options: &ExportOptions,
    ) -> ApiResult<ExportOutput> {
        Ok(self.generator.generate(module, fields, options).await?)
    }

    /// 提交后台导出任务，返回 pending 任务；调用方按 id 轮询
    #[instrument(skip(self, fields, options), fields(module = %module))]
    pub async fn submit_export(
        &self,
        module: Module,
        fields: Vec<String>,
        options: Option<ExportOptions>,
    ) -> ApiResult<ExportJob> {
        let options = match options {
            Some(options) => options,
            None => self.default_options().await?,
        };
        let expiry_hours = self.config.get_export_expiry_hours().await?;
        let output_dir = self.config.get_export_output_dir().await?;

        let file_name = format!("{}_export_{}.csv", module, Utc::now().format("%Y%m%d_%H%M%S"));
        let job = ExportJob::new(module, file_name, fields, Utc::now() + Duration::hours(expiry_hours));
        self.tracker.create_export(&job)?;
        info!(job_id = %job.id, module = %module, "导出任务已创建");

        let generator = self.generator.clone();
        let tracker = self.tracker.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = run_export_job(&generator, &tracker, &job_id, &options, output_dir).await {
                error!(job_id = %job_id, error = %e, "后台导出失败");
            }
        });
        Ok(job)
    }

    /// 删除已过期的导出产物，返回清理数量
    pub fn purge_expired_exports(&self) -> ApiResult<usize> {
        self.purge_exports_expired_at(Utc::now())
    }

    /// 删除截至 now 已过期的导出产物
    pub fn purge_exports_expired_at(&self, now: DateTime<Utc>) -> ApiResult<usize> {
        let expired = self.tracker.expired_exports(now)?;
        let mut purged = 0;
        for job in expired {
            if let Some(path) = &job.file_url {
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(job_id = %job.id, path = %path, error = %e, "过期导出文件删除失败");
                        continue;
                    }
                }
            }
            self.tracker.clear_export_file(&job.id)?;
            purged += 1;
        }
        if purged > 0 {
            info!(purged = purged, "过期导出产物已清理");
        }
        Ok(purged)
    }
}

/// 执行一个已创建的导出任务直到终态
async fn run_export_job(
    generator: &ExportGenerator,
    tracker: &JobTracker,
    job_id: &str,
    options: &ExportOptions,
    output_dir: PathBuf,
) -> ExportResult<ExportJob> {
    let (mut job, lease) = tracker.begin_export(job_id)?;

    match generator.generate(job.module, &job.fields, options).await {
        Ok(output) => {
            job.total_rows = output.record_count + output.warnings.len();
            job.rows_exported = output.record_count;
            job.warnings = output.warnings.clone();
            settle_output(&mut job, &lease, &output, &output_dir);
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.error_message = Some(e.to_string());
        }
    }

    tracker.finish_export(&lease, &mut job)?;
    Ok(job)
}

/// 写文件并确定终态（生成期间被取消则不落盘）
fn settle_output(job: &mut ExportJob, lease: &JobLease, output: &ExportOutput, output_dir: &std::path::Path) {
    if lease.is_cancel_requested() {
        job.status = JobStatus::Cancelled;
        return;
    }
    let disk_name = format!("{}_{}", job.id, job.file_name);
    match write_export_file(output_dir, &disk_name, &output.bytes) {
        Ok(path) => {
            job.file_url = Some(path.display().to_string());
            job.status = JobStatus::Completed;
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.error_message = Some(e.to_string());
        }
    }
}
