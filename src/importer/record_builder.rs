// ==========================================
// 批量导入导出管道 - 行记录构造器
// ==========================================
// 职责: 映射 + 转换 + 默认值 + 类型转换 → 候选记录
// 校验引擎与导入执行器共用同一套取值/检查逻辑，保证
// “校验通过”与“可写入”口径一致
// ==========================================

use crate::domain::catalog;
use crate::domain::field::{FieldMapping, ResolvedRules};
use crate::domain::record::{NaturalKey, RawRow, RecordFields};
use crate::domain::types::{DataType, DateFormat, Module};
use crate::importer::error::{ExecutionError, MappingError};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::transform::{apply_transform, digits_only, parse_boolean, parse_currency, parse_number};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
const PHONE_MIN_DIGITS: usize = 10;
const PHONE_MAX_DIGITS: usize = 15;

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

// ==========================================
// Binding - 一条活动映射及其生效规则
// ==========================================
#[derive(Debug, Clone)]
pub struct Binding {
    pub column: String,
    pub rules: ResolvedRules,
}

// ==========================================
// ValueProblem - 单值检查失败原因
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum ValueProblem {
    Required,
    TooLong { max: usize, actual: usize },
    NotAllowed { allowed: Vec<String> },
    InvalidType { data_type: DataType },
}

impl ValueProblem {
    pub fn message(&self, field: &str) -> String {
        match self {
            ValueProblem::Required => format!("必填字段 {} 为空", field),
            ValueProblem::TooLong { max, actual } => {
                format!("{} 长度 {} 超过上限 {}", field, actual, max)
            }
            ValueProblem::NotAllowed { allowed } => {
                format!("{} 取值不在允许范围内: {}", field, allowed.join(", "))
            }
            ValueProblem::InvalidType { data_type } => match data_type {
                DataType::Email => format!("{} 不是有效的邮箱地址", field),
                DataType::Phone => format!(
                    "{} 不是有效的电话号码（需 {}-{} 位数字）",
                    field, PHONE_MIN_DIGITS, PHONE_MAX_DIGITS
                ),
                DataType::Number => format!("{} 不是有效数字", field),
                DataType::Currency => format!("{} 不是有效金额", field),
                DataType::Boolean => format!("{} 不是可识别的布尔值", field),
                DataType::Date => format!("{} 不是有效日期", field),
                DataType::String => format!("{} 不是有效文本", field),
            },
        }
    }
}

// ==========================================
// RecordBuilder
// ==========================================
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    module: Module,
    bindings: Vec<Binding>,
    date_format: DateFormat,
}

impl RecordBuilder {
    /// # 参数
    /// - mappings: 完整映射（未映射/跳过的列被忽略）
    /// - template_defaults: 模板级默认值（优先级最低）
    pub fn new(
        module: Module,
        mappings: &[FieldMapping],
        date_format: DateFormat,
        template_defaults: &BTreeMap<String, String>,
    ) -> Result<Self, MappingError> {
        FieldMapper::new(module).check_mappings(mappings)?;

        let mut bindings = Vec::new();
        for mapping in mappings.iter().filter(|m| m.is_active()) {
            let field = mapping.db_field.as_deref().unwrap_or_default();
            let definition =
                catalog::find_field(module, field).ok_or_else(|| MappingError::UnknownField {
                    module,
                    field: field.to_string(),
                })?;
            let mut rules = mapping.resolve(definition);
            if rules.default_value.is_none() {
                rules.default_value = template_defaults.get(field).cloned();
            }
            bindings.push(Binding {
                column: mapping.csv_column.clone(),
                rules,
            });
        }

        Ok(Self {
            module,
            bindings,
            date_format,
        })
    }

    pub fn module(&self) -> Module {
        self.module
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn binding_for_field(&self, field: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.rules.field == field)
    }

    /// 取值: 原始值 → 转换 → 为空时代入默认值
    pub fn prepare(&self, binding: &Binding, row: &RawRow) -> String {
        let raw = row.get(&binding.column).unwrap_or_default();
        let value = apply_transform(binding.rules.transform.as_deref(), raw);
        if value.trim().is_empty() {
            binding.rules.default_value.clone().unwrap_or_default()
        } else {
            value
        }
    }

    /// 检查并转换为类型化值
    ///
    /// 顺序: 必填 → 最大长度 → 枚举 → 数据类型；空的非必填值直接返回 Null
    pub fn check(&self, rules: &ResolvedRules, value: &str) -> Result<Value, ValueProblem> {
        let value = value.trim();
        if value.is_empty() {
            return if rules.required {
                Err(ValueProblem::Required)
            } else {
                Ok(Value::Null)
            };
        }

        if let Some(max) = rules.max_length {
            let actual = value.chars().count();
            if actual > max {
                return Err(ValueProblem::TooLong { max, actual });
            }
        }

        let value = match &rules.valid_values {
            Some(allowed) => rules
                .canonical_valid_value(value)
                .ok_or_else(|| ValueProblem::NotAllowed {
                    allowed: allowed.clone(),
                })?,
            None => value,
        };

        convert_typed(rules.data_type, value, self.date_format)
            .ok_or(ValueProblem::InvalidType {
                data_type: rules.data_type,
            })
    }

    /// 构造候选记录；第一个不合法的值即为该行的执行错误
    pub fn build(&self, row: &RawRow) -> Result<RecordFields, ExecutionError> {
        let mut fields = RecordFields::new();
        for binding in &self.bindings {
            let value = self.prepare(binding, row);
            let field = binding.rules.field;
            match self.check(&binding.rules, &value) {
                Ok(typed) => {
                    fields.insert(field.to_string(), typed);
                }
                Err(ValueProblem::Required) => {
                    return Err(ExecutionError::MissingRequired {
                        row: row.row_number,
                        field: field.to_string(),
                        column: binding.column.clone(),
                    })
                }
                Err(problem @ ValueProblem::InvalidType { .. }) => {
                    return Err(ExecutionError::TypeConversion {
                        row: row.row_number,
                        field: field.to_string(),
                        column: binding.column.clone(),
                        value,
                        message: problem.message(field),
                    })
                }
                Err(problem) => {
                    return Err(ExecutionError::InvalidValue {
                        row: row.row_number,
                        field: field.to_string(),
                        column: binding.column.clone(),
                        value,
                        message: problem.message(field),
                    })
                }
            }
        }
        Ok(fields)
    }

    /// 行的自然键（键字段未映射或为空时为 None）
    pub fn natural_key(&self, row: &RawRow) -> Option<NaturalKey> {
        let mut parts = Vec::new();
        for key in catalog::natural_key_fields(self.module) {
            let binding = self.binding_for_field(key)?;
            parts.push(self.prepare(binding, row));
        }
        NaturalKey::from_parts(parts)
    }
}

/// 按数据类型转换；失败返回 None
pub fn convert_typed(data_type: DataType, value: &str, date_format: DateFormat) -> Option<Value> {
    match data_type {
        DataType::String => Some(Value::String(value.to_string())),
        DataType::Email => email_regex()
            .filter(|re| re.is_match(value))
            .map(|_| Value::String(value.to_string())),
        DataType::Phone => {
            let digits = digits_only(value).len();
            (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS)
                .contains(&digits)
                .then(|| Value::String(value.to_string()))
        }
        DataType::Number => parse_number(value).map(number_value),
        DataType::Currency => parse_currency(value).map(number_value),
        DataType::Boolean => parse_boolean(value).map(Value::Bool),
        DataType::Date => date_format
            .parse_date(value)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
    }
}

/// 整数值存为整型，其余存为浮点
pub fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        Value::from(number as i64)
    } else {
        serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
