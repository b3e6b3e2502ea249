// ==========================================
// 批量导入导出管道 - 导入模板
// ==========================================
// 模板保存可复用的映射与导入设置；times_used 仅在模板被用于
// 生成任务映射时递增，模板不会被隐式删除
// ==========================================

use crate::domain::field::FieldMapping;
use crate::domain::types::{DateFormat, DuplicateHandling, Module};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// ValidationRule - 模板级附加校验规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    pub rule: RuleKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arg", rename_all = "snake_case")]
pub enum RuleKind {
    Required,
    MaxLength(usize),
    OneOf(Vec<String>),
    Pattern(String),
}

impl ValidationRule {
    pub fn new(field: impl Into<String>, rule: RuleKind) -> Self {
        Self {
            field: field.into(),
            rule,
        }
    }
}

// ==========================================
// ImportTemplate - 导入模板
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportTemplate {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub module: Module,
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub default_values: BTreeMap<String, String>, // 规范字段名 → 默认值
    pub delimiter: Option<char>,                  // None = 自动识别
    pub encoding: String,
    pub date_format: DateFormat,
    pub duplicate_handling: DuplicateHandling,
    pub times_used: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub is_public: bool,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportTemplate {
    pub const DEFAULT_ENCODING: &'static str = "utf-8";

    pub fn new(
        name: impl Into<String>,
        module: Module,
        owner_id: impl Into<String>,
        field_mappings: Vec<FieldMapping>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            module,
            field_mappings,
            validation_rules: Vec::new(),
            default_values: BTreeMap::new(),
            delimiter: None,
            encoding: Self::DEFAULT_ENCODING.to_string(),
            date_format: DateFormat::default(),
            duplicate_handling: DuplicateHandling::default(),
            times_used: 0,
            last_used: None,
            is_public: false,
            owner_id: owner_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 复制模板: 新 id，名称追加 "(copy)"，使用统计清零，设为私有
    pub fn duplicate_for(&self, owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("{} (copy)", self.name),
            times_used: 0,
            last_used: None,
            is_public: false,
            owner_id: owner_id.into(),
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    /// 调用方是否可见（自有 或 公开）
    pub fn visible_to(&self, owner_id: &str) -> bool {
        self.is_public || self.owner_id == owner_id
    }

    pub fn to_bundle(&self) -> TemplateBundle {
        TemplateBundle {
            format_version: TemplateBundle::FORMAT_VERSION,
            name: self.name.clone(),
            description: self.description.clone(),
            module: self.module,
            field_mappings: self.field_mappings.clone(),
            validation_rules: self.validation_rules.clone(),
            default_values: self.default_values.clone(),
            delimiter: self.delimiter,
            encoding: self.encoding.clone(),
            date_format: self.date_format,
            duplicate_handling: self.duplicate_handling,
        }
    }
}

// ==========================================
// TemplateBundle - 可移植的模板导出格式
// ==========================================
// 不含 id / owner / 使用统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateBundle {
    pub format_version: u32,
    pub name: String,
    pub description: Option<String>,
    pub module: Module,
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub default_values: BTreeMap<String, String>,
    pub delimiter: Option<char>,
    pub encoding: String,
    pub date_format: DateFormat,
    pub duplicate_handling: DuplicateHandling,
}

impl TemplateBundle {
    pub const FORMAT_VERSION: u32 = 1;

    /// 以调用方身份创建新模板
    pub fn into_template(self, owner_id: impl Into<String>) -> ImportTemplate {
        let mut template = ImportTemplate::new(self.name, self.module, owner_id, self.field_mappings);
        template.description = self.description;
        template.validation_rules = self.validation_rules;
        template.default_values = self.default_values;
        template.delimiter = self.delimiter;
        template.encoding = self.encoding;
        template.date_format = self.date_format;
        template.duplicate_handling = self.duplicate_handling;
        template
    }
}
