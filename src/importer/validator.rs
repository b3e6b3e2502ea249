// ==========================================
// 批量导入导出管道 - 校验引擎
// ==========================================
// 职责: 对整份文件按映射规则逐行校验，返回 ValidationResult
// 约定:
//   - 映射状态非法 → Err(MappingError)，在任何行之前检查
//   - 校验问题作为数据返回；只有 error 影响 is_valid
//   - 问题顺序: 全局问题 → 行号升序 → 行内按映射顺序（可重复、逐位一致）
// ==========================================

use crate::domain::field::FieldMapping;
use crate::domain::record::NaturalKey;
use crate::domain::template::{ImportTemplate, RuleKind, ValidationRule};
use crate::domain::types::{DateFormat, Module};
use crate::domain::validation::{ValidationIssue, ValidationResult};
use crate::importer::conflict_handler::{ConflictHandler, ExistingConflict};
use crate::importer::error::{ImportResult, MappingError};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::file_parser::{CsvParser, ParseOptions, ParsedCsv};
use crate::importer::record_builder::RecordBuilder;
use crate::repository::record_store::RecordStore;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument};

// ==========================================
// ValidationContext - 校验上下文
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub date_format: DateFormat,
    pub default_values: BTreeMap<String, String>, // 模板级默认值
    pub rules: Vec<ValidationRule>,               // 模板级附加规则
}

impl ValidationContext {
    pub fn new(date_format: DateFormat) -> Self {
        Self {
            date_format,
            ..Self::default()
        }
    }

    pub fn from_template(template: &ImportTemplate) -> Self {
        Self {
            date_format: template.date_format,
            default_values: template.default_values.clone(),
            rules: template.validation_rules.clone(),
        }
    }
}

pub struct Validator {
    module: Module,
}

impl Validator {
    pub fn new(module: Module) -> Self {
        Self { module }
    }

    /// 解析 + 校验
    pub fn validate_raw(
        &self,
        raw: &[u8],
        parse_options: ParseOptions,
        mappings: &[FieldMapping],
        ctx: &ValidationContext,
    ) -> ImportResult<ValidationResult> {
        let parsed = CsvParser::new(parse_options).parse_bytes(raw)?;
        Ok(self.validate_parsed(&parsed, mappings, ctx)?)
    }

    /// 校验已解析的文件（不访问存储）
    pub fn validate_parsed(
        &self,
        parsed: &ParsedCsv,
        mappings: &[FieldMapping],
        ctx: &ValidationContext,
    ) -> Result<ValidationResult, MappingError> {
        let builder = self.builder(mappings, ctx)?;
        Ok(self.collect(parsed, mappings, ctx, &builder, &[]))
    }

    /// 校验并检查与存储中已有记录的自然键冲突（冲突为 warning）
    #[instrument(skip(self, parsed, mappings, ctx, store), fields(module = %self.module))]
    pub async fn validate_against_store(
        &self,
        parsed: &ParsedCsv,
        mappings: &[FieldMapping],
        ctx: &ValidationContext,
        store: &dyn RecordStore,
    ) -> ImportResult<ValidationResult> {
        let builder = self.builder(mappings, ctx)?;
        let keyed = keyed_rows(&builder, parsed);
        let existing = ConflictHandler
            .detect_existing(store, self.module, &keyed)
            .await?;
        Ok(self.collect(parsed, mappings, ctx, &builder, &existing))
    }

    fn builder(
        &self,
        mappings: &[FieldMapping],
        ctx: &ValidationContext,
    ) -> Result<RecordBuilder, MappingError> {
        RecordBuilder::new(self.module, mappings, ctx.date_format, &ctx.default_values)
    }

    fn collect(
        &self,
        parsed: &ParsedCsv,
        mappings: &[FieldMapping],
        ctx: &ValidationContext,
        builder: &RecordBuilder,
        existing: &[ExistingConflict],
    ) -> ValidationResult {
        let mut issues = Vec::new();

        // ===== 全局问题 =====
        let mapper = FieldMapper::new(self.module);
        let missing = mapper.required_coverage(mappings);
        for definition in &missing {
            issues.push(ValidationIssue::error(
                None,
                definition.field,
                format!("必填字段 {} 未映射", definition.label),
            ));
        }

        let patterns: Vec<Option<Regex>> = ctx
            .rules
            .iter()
            .map(|rule| match &rule.rule {
                RuleKind::Pattern(p) => Regex::new(p).ok(),
                _ => None,
            })
            .collect();

        for (rule, compiled) in ctx.rules.iter().zip(&patterns) {
            let mapped = builder.binding_for_field(&rule.field).is_some();
            match &rule.rule {
                RuleKind::Required if !mapped && !missing.iter().any(|d| d.field == rule.field) => {
                    issues.push(ValidationIssue::error(
                        None,
                        rule.field.clone(),
                        format!("模板要求字段 {} 必填，但未映射", rule.field),
                    ));
                }
                RuleKind::Pattern(p) if compiled.is_none() => {
                    issues.push(ValidationIssue::error(
                        None,
                        rule.field.clone(),
                        format!("模板规则中的正则无效: {}", p),
                    ));
                }
                _ => {}
            }
        }

        // ===== 行级问题 =====
        let keyed = keyed_rows(builder, parsed);
        let in_file: HashMap<usize, usize> = ConflictHandler
            .detect_in_file(&keyed)
            .into_iter()
            .map(|d| (d.row, d.first_row))
            .collect();
        let existing: HashMap<usize, &ExistingConflict> =
            existing.iter().map(|c| (c.row, c)).collect();

        for row in &parsed.rows {
            for binding in builder.bindings() {
                let value = builder.prepare(binding, row);
                if let Err(problem) = builder.check(&binding.rules, &value) {
                    let mut issue = ValidationIssue::error(
                        Some(row.row_number),
                        binding.column.clone(),
                        problem.message(binding.rules.field),
                    );
                    if !value.trim().is_empty() {
                        issue = issue.with_value(value);
                    }
                    issues.push(issue);
                }
            }

            for (rule, compiled) in ctx.rules.iter().zip(&patterns) {
                let Some(binding) = builder.binding_for_field(&rule.field) else {
                    continue;
                };
                let value = builder.prepare(binding, row);
                if let Some(message) = check_rule(&rule.rule, compiled.as_ref(), value.trim()) {
                    let mut issue = ValidationIssue::error(
                        Some(row.row_number),
                        binding.column.clone(),
                        format!("{}: {}", rule.field, message),
                    );
                    if !value.trim().is_empty() {
                        issue = issue.with_value(value);
                    }
                    issues.push(issue);
                }
            }

            if let Some(first_row) = in_file.get(&row.row_number) {
                issues.push(ValidationIssue::warning(
                    Some(row.row_number),
                    key_column(builder),
                    format!("与第 {} 行的自然键重复", first_row),
                ));
            }
            if let Some(conflict) = existing.get(&row.row_number) {
                issues.push(
                    ValidationIssue::warning(
                        Some(row.row_number),
                        key_column(builder),
                        format!("记录已存在 (id={})，将按重复处理策略执行", conflict.existing_id),
                    )
                    .with_value(conflict.key.to_string()),
                );
            }
        }

        let result = ValidationResult::new(issues, parsed.headers.clone(), &parsed.rows);
        info!(
            module = %self.module,
            rows = result.row_count,
            errors = result.error_count(),
            warnings = result.warning_count(),
            is_valid = result.is_valid,
            "校验完成"
        );
        result
    }
}

/// 每一行的自然键（无法构造键的行不参与重复检测）
pub(crate) fn keyed_rows(builder: &RecordBuilder, parsed: &ParsedCsv) -> Vec<(usize, NaturalKey)> {
    parsed
        .rows
        .iter()
        .filter_map(|row| builder.natural_key(row).map(|key| (row.row_number, key)))
        .collect()
}

/// 自然键首字段对应的 CSV 列名
fn key_column(builder: &RecordBuilder) -> String {
    crate::domain::catalog::natural_key_fields(builder.module())
        .first()
        .and_then(|field| builder.binding_for_field(field))
        .map(|b| b.column.clone())
        .unwrap_or_default()
}

/// 模板附加规则；返回失败信息
fn check_rule(rule: &RuleKind, compiled: Option<&Regex>, value: &str) -> Option<String> {
    match rule {
        RuleKind::Required => value.is_empty().then(|| "不能为空".to_string()),
        _ if value.is_empty() => None,
        RuleKind::MaxLength(max) => {
            let actual = value.chars().count();
            (actual > *max).then(|| format!("长度 {} 超过上限 {}", actual, max))
        }
        RuleKind::OneOf(values) => (!values.iter().any(|v| v.trim().eq_ignore_ascii_case(value)))
            .then(|| format!("取值必须为: {}", values.join(", "))),
        RuleKind::Pattern(p) => match compiled {
            Some(re) if !re.is_match(value) => Some(format!("不匹配格式 {}", p)),
            _ => None,
        },
    }
}
