// ==========================================
// 批量导入导出管道 - 导入模板API
// ==========================================
// 职责: 模板 CRUD / 复制 / 导出导入 / 用模板生成映射
// 可见性: 自有模板 + 公开模板；修改与删除仅限所有者
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::field::FieldMapping;
use crate::domain::template::{ImportTemplate, RuleKind, TemplateBundle};
use crate::domain::types::Module;
use crate::importer::field_mapper::FieldMapper;
use crate::repository::template_repo::TemplateRepository;
use chrono::Utc;
use regex::Regex;
use std::sync::Arc;
use tracing::info;

/// 模板API
pub struct TemplateApi {
    repo: Arc<TemplateRepository>,
}

impl TemplateApi {
    pub fn new(repo: Arc<TemplateRepository>) -> Self {
        Self { repo }
    }

    /// 创建模板
    pub fn create(&self, template: ImportTemplate) -> ApiResult<ImportTemplate> {
        check_template(&template)?;
        self.repo.insert(&template)?;
        info!(template_id = %template.id, module = %template.module, "模板已创建");
        Ok(template)
    }

    /// 读取模板（不可见视为不存在）
    pub fn get(&self, id: &str, owner_id: &str) -> ApiResult<ImportTemplate> {
        self.repo
            .find_by_id(id)?
            .filter(|t| t.visible_to(owner_id))
            .ok_or_else(|| ApiError::NotFound(format!("模板(id={})不存在", id)))
    }

    /// 更新模板内容；使用统计与归属保持不变
    pub fn update(&self, mut template: ImportTemplate, owner_id: &str) -> ApiResult<ImportTemplate> {
        let current = self.owned(&template.id, owner_id)?;
        if current.module != template.module {
            return Err(ApiError::InvalidInput("模板所属模块不可修改".to_string()));
        }
        check_template(&template)?;
        template.owner_id = current.owner_id;
        template.times_used = current.times_used;
        template.last_used = current.last_used;
        template.created_at = current.created_at;
        template.updated_at = Utc::now();
        self.repo.update(&template)?;
        Ok(template)
    }

    pub fn delete(&self, id: &str, owner_id: &str) -> ApiResult<()> {
        self.owned(id, owner_id)?;
        self.repo.delete(id)?;
        info!(template_id = id, "模板已删除");
        Ok(())
    }

    pub fn list(&self, module: Module, owner_id: &str) -> ApiResult<Vec<ImportTemplate>> {
        Ok(self.repo.list_visible(module, owner_id)?)
    }

    /// 复制为调用方的私有模板
    pub fn duplicate(&self, id: &str, owner_id: &str) -> ApiResult<ImportTemplate> {
        let copy = self.get(id, owner_id)?.duplicate_for(owner_id);
        self.repo.insert(&copy)?;
        Ok(copy)
    }

    /// 导出为可移植 JSON（不含使用统计）
    pub fn export_bundle(&self, id: &str, owner_id: &str) -> ApiResult<String> {
        let bundle = self.get(id, owner_id)?.to_bundle();
        serde_json::to_string_pretty(&bundle).map_err(|e| ApiError::InternalError(e.to_string()))
    }

    /// 从 JSON 导入为调用方的新模板
    pub fn import_bundle(&self, json: &str, owner_id: &str) -> ApiResult<ImportTemplate> {
        let bundle: TemplateBundle = serde_json::from_str(json)
            .map_err(|e| ApiError::InvalidInput(format!("模板文件格式错误: {}", e)))?;
        if bundle.format_version > TemplateBundle::FORMAT_VERSION {
            return Err(ApiError::InvalidInput(format!(
                "不支持的模板版本: {}（当前支持 {}）",
                bundle.format_version,
                TemplateBundle::FORMAT_VERSION
            )));
        }
        self.create(bundle.into_template(owner_id))
    }

    /// 用模板为给定表头生成映射（不计使用次数）
    pub fn seed_mappings(
        &self,
        id: &str,
        owner_id: &str,
        headers: &[String],
    ) -> ApiResult<Vec<FieldMapping>> {
        let template = self.get(id, owner_id)?;
        Ok(FieldMapper::new(template.module).mappings_from_template(&template, headers)?)
    }

    /// 模板为一个导入任务提供了映射: times_used + 1，last_used = now
    pub fn record_usage(&self, id: &str) -> ApiResult<()> {
        self.repo.record_usage(id, Utc::now())?;
        Ok(())
    }

    fn owned(&self, id: &str, owner_id: &str) -> ApiResult<ImportTemplate> {
        let template = self.get(id, owner_id)?;
        if template.owner_id != owner_id {
            return Err(ApiError::Forbidden(format!("模板 {} 不属于 {}", id, owner_id)));
        }
        Ok(template)
    }
}

/// 模板自身的一致性检查
fn check_template(template: &ImportTemplate) -> ApiResult<()> {
    if template.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("模板名称不能为空".to_string()));
    }
    if !template.encoding.eq_ignore_ascii_case(ImportTemplate::DEFAULT_ENCODING) {
        return Err(ApiError::InvalidInput(format!("仅支持 UTF-8 编码: {}", template.encoding)));
    }
    if let Some(d) = template.delimiter {
        if !d.is_ascii() || d == '"' || d == '\n' || d == '\r' {
            return Err(ApiError::InvalidInput(format!("无效分隔符: {:?}", d)));
        }
    }
    FieldMapper::new(template.module).check_mappings(&template.field_mappings)?;
    for rule in &template.validation_rules {
        if let RuleKind::Pattern(pattern) = &rule.rule {
            Regex::new(pattern)
                .map_err(|e| ApiError::InvalidInput(format!("规则正则无效 ({}): {}", rule.field, e)))?;
        }
    }
    Ok(())
}
