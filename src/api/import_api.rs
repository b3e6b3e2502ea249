// ==========================================
// 批量导入导出管道 - 导入API
// ==========================================
// 职责: 预览 / 校验 / 提交导入 / 取消 / 回滚 / 任务查询
// 流程: 解析 → 映射（显式 > 模板 > 自动建议）→ 校验 → 建任务 → 执行
// 约定: 校验存在 error 时拒绝提交（ApiError::ValidationFailed）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::template_api::TemplateApi;
use crate::config::import_config_trait::ImportConfigReader;
use crate::domain::field::FieldMapping;
use crate::domain::job::{ImportJob, ImportRowError, JobKind};
use crate::domain::record::RawRow;
use crate::domain::template::ImportTemplate;
use crate::domain::types::{DuplicateHandling, Module};
use crate::domain::validation::ValidationResult;
use crate::engine::job_tracker::{JobKindFilter, JobTracker};
use crate::importer::error::{MappingError, RollbackError};
use crate::importer::field_mapper::{FieldMapper, TargetOption};
use crate::importer::file_parser::{CsvParser, ParseOptions, ParsedCsv};
use crate::importer::import_executor::ImportExecutor;
use crate::importer::record_builder::RecordBuilder;
use crate::importer::rollback::RollbackManager;
use crate::importer::validator::{ValidationContext, Validator};
use crate::repository::record_store::RecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// 未指定调用方时使用的身份（本地操作员）
pub const DEFAULT_OWNER: &str = "local";

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

fn default_true() -> bool {
    true
}

/// 导入选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// 分隔符（None = 模板设置或自动识别）
    #[serde(default)]
    pub delimiter: Option<u8>,
    #[serde(default = "default_true")]
    pub has_headers: bool,
    #[serde(default)]
    pub template_id: Option<String>,
    /// 重复处理策略（None = 模板设置或 skip）
    #[serde(default)]
    pub duplicate_handling: Option<DuplicateHandling>,
    #[serde(default = "default_owner")]
    pub owner_id: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            has_headers: true,
            template_id: None,
            duplicate_handling: None,
            owner_id: default_owner(),
        }
    }
}

/// 导入请求
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub module: Module,
    pub file_name: String,
    pub raw: Vec<u8>,
    /// 为空时由模板或自动建议生成
    pub mappings: Vec<FieldMapping>,
    pub options: ImportOptions,
}

/// 导入预览（向导映射步骤所需数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPreview {
    pub headers: Vec<String>,
    pub delimiter: char,
    pub row_count: usize,
    pub sample_rows: Vec<RawRow>,
    pub mappings: Vec<FieldMapping>,
    /// 缺少有效映射的必填字段
    pub missing_required: Vec<String>,
}

/// 解析 + 映射 + 校验上下文
struct Prepared {
    parsed: ParsedCsv,
    mappings: Vec<FieldMapping>,
    ctx: ValidationContext,
    template: Option<ImportTemplate>,
    seeded_by_template: bool,
}

/// 导入API
pub struct ImportApi {
    store: Arc<dyn RecordStore>,
    tracker: Arc<JobTracker>,
    executor: Arc<ImportExecutor>,
    rollback: RollbackManager,
    templates: Arc<TemplateApi>,
    config: Arc<dyn ImportConfigReader>,
}

impl ImportApi {
    pub fn new(
        store: Arc<dyn RecordStore>,
        tracker: Arc<JobTracker>,
        templates: Arc<TemplateApi>,
        config: Arc<dyn ImportConfigReader>,
    ) -> Self {
        Self {
            executor: Arc::new(ImportExecutor::new(store.clone(), tracker.clone())),
            rollback: RollbackManager::new(store.clone(), tracker.clone()),
            store,
            tracker,
            templates,
            config,
        }
    }

    /// 解析文件并给出初始映射
    pub async fn preview(
        &self,
        raw: &[u8],
        module: Module,
        options: &ImportOptions,
    ) -> ApiResult<ImportPreview> {
        let prepared = self.prepare(raw, module, Vec::new(), options).await?;
        let missing_required = FieldMapper::new(module)
            .required_coverage(&prepared.mappings)
            .into_iter()
            .map(|d| d.field.to_string())
            .collect();
        Ok(ImportPreview {
            headers: prepared.parsed.headers.clone(),
            delimiter: prepared.parsed.delimiter as char,
            row_count: prepared.parsed.rows.len(),
            sample_rows: prepared
                .parsed
                .rows
                .iter()
                .take(ValidationResult::SAMPLE_SIZE)
                .cloned()
                .collect(),
            mappings: prepared.mappings,
            missing_required,
        })
    }

    /// 某列可选的目标字段（已被其他列占用的标记为 disabled）
    pub fn available_targets(
        &self,
        module: Module,
        mappings: &[FieldMapping],
        for_column: &str,
    ) -> Vec<TargetOption> {
        FieldMapper::new(module).available_targets(mappings, for_column)
    }

    /// 校验（不写入）
    ///
    /// # 返回
    /// - Ok(result): 校验问题作为数据返回，调用方须检查 is_valid
    /// - Err(Parse / Mapping): 文件无法解析或映射状态非法
    #[instrument(skip(self, raw, mappings, options), fields(module = %module, bytes = raw.len()))]
    pub async fn validate(
        &self,
        raw: &[u8],
        mappings: Vec<FieldMapping>,
        module: Module,
        options: &ImportOptions,
    ) -> ApiResult<ValidationResult> {
        let prepared = self.prepare(raw, module, mappings, options).await?;
        let result = Validator::new(module)
            .validate_against_store(
                &prepared.parsed,
                &prepared.mappings,
                &prepared.ctx,
                self.store.as_ref(),
            )
            .await?;
        Ok(result)
    }

    /// 提交导入（后台执行），返回 pending 任务；调用方按 id 轮询
    #[instrument(skip(self, request), fields(module = %request.module, file_name = %request.file_name))]
    pub async fn submit_import(&self, request: ImportRequest) -> ApiResult<ImportJob> {
        let (job, builder, rows, workers) = self.create_job(request).await?;
        let executor = self.executor.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            match executor.execute(&job_id, &builder, &rows, workers).await {
                Ok(done) => info!(job_id = %job_id, status = %done.status, "后台导入结束"),
                Err(e) => error!(job_id = %job_id, error = %e, "后台导入失败"),
            }
        });
        Ok(job)
    }

    /// 导入并等待结束（命令行使用）
    pub async fn import_and_wait(&self, request: ImportRequest) -> ApiResult<ImportJob> {
        let (job, builder, rows, workers) = self.create_job(request).await?;
        Ok(self.executor.execute(&job.id, &builder, &rows, workers).await?)
    }

    pub async fn rollback(&self, job_id: &str) -> Result<ImportJob, RollbackError> {
        self.rollback.rollback(job_id).await
    }

    pub fn cancel(&self, job_id: &str) -> ApiResult<JobKind> {
        Ok(self.tracker.request_cancel(job_id)?)
    }

    pub fn get_job(&self, job_id: &str) -> ApiResult<JobKind> {
        Ok(self.tracker.get(job_id)?)
    }

    pub fn list_jobs(&self, kind: Option<JobKindFilter>, limit: usize) -> ApiResult<Vec<JobKind>> {
        Ok(self.tracker.list_jobs(kind, limit)?)
    }

    /// 校验通过后创建 pending 任务
    async fn create_job(
        &self,
        request: ImportRequest,
    ) -> ApiResult<(ImportJob, RecordBuilder, Vec<RawRow>, usize)> {
        let ImportRequest {
            module,
            file_name,
            raw,
            mappings,
            options,
        } = request;

        let prepared = self.prepare(&raw, module, mappings, &options).await?;
        let result = Validator::new(module)
            .validate_against_store(
                &prepared.parsed,
                &prepared.mappings,
                &prepared.ctx,
                self.store.as_ref(),
            )
            .await?;
        if !result.is_valid {
            return Err(ApiError::ValidationFailed(result));
        }

        let builder = RecordBuilder::new(
            module,
            &prepared.mappings,
            prepared.ctx.date_format,
            &prepared.ctx.default_values,
        )?;
        let batch_size = self.config.get_batch_size().await?;
        let workers = self.config.get_worker_count().await?;
        let policy = options
            .duplicate_handling
            .or_else(|| prepared.template.as_ref().map(|t| t.duplicate_handling))
            .unwrap_or_default();

        let mut job = ImportJob::new(
            module,
            file_name,
            raw.len() as u64,
            prepared.parsed.rows.len(),
            prepared.mappings,
            policy,
            batch_size,
        );
        job.template_id = prepared.template.as_ref().map(|t| t.id.clone());
        job.warnings = result
            .warnings()
            .map(|w| {
                ImportRowError::new(w.row.unwrap_or(0), Some(w.column.clone()), w.message.clone())
                    .with_value(w.value.clone())
            })
            .collect();
        self.tracker.create_import(&job)?;

        if let Some(t) = prepared.template.as_ref().filter(|_| prepared.seeded_by_template) {
            // 任务已创建，统计失败不影响导入
            if let Err(e) = self.templates.record_usage(&t.id) {
                warn!(template_id = %t.id, error = %e, "模板使用统计更新失败");
            }
        }

        Ok((job, builder, prepared.parsed.rows, workers))
    }

    async fn prepare(
        &self,
        raw: &[u8],
        module: Module,
        mappings: Vec<FieldMapping>,
        options: &ImportOptions,
    ) -> ApiResult<Prepared> {
        let template = match &options.template_id {
            Some(id) => {
                let template = self.templates.get(id, &options.owner_id)?;
                if template.module != module {
                    return Err(MappingError::ModuleMismatch {
                        expected: module,
                        actual: template.module,
                    }
                    .into());
                }
                Some(template)
            }
            None => None,
        };

        let delimiter = options.delimiter.or_else(|| {
            template
                .as_ref()
                .and_then(|t| t.delimiter)
                .filter(char::is_ascii)
                .map(|c| c as u8)
        });
        let parsed = CsvParser::new(ParseOptions {
            delimiter,
            has_headers: options.has_headers,
            max_rows: None,
        })
        .parse_bytes(raw)?;

        let mut seeded_by_template = false;
        let mappings = if !mappings.is_empty() {
            mappings
        } else if let Some(t) = &template {
            seeded_by_template = true;
            FieldMapper::new(module).mappings_from_template(t, &parsed.headers)?
        } else {
            FieldMapper::new(module).suggest_mappings(&parsed.headers)
        };

        let ctx = match &template {
            Some(t) => ValidationContext::from_template(t),
            None => ValidationContext::new(self.config.get_import_date_format().await?),
        };

        Ok(Prepared {
            parsed,
            mappings,
            ctx,
            template,
            seeded_by_template,
        })
    }
}
