// ==========================================
// 批量导入导出管道 - 字段定义与字段映射
// ==========================================
// FieldDefinition: 模块的规范字段（静态目录，见 domain::catalog）
// FieldMapping: CSV 列 → 规范字段 的绑定（可覆写目录中的规则）
// ==========================================

use crate::domain::types::DataType;
use serde::{Deserialize, Serialize};

// ==========================================
// FieldDefinition - 规范字段定义
// ==========================================
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldDefinition {
    pub field: &'static str,                             // 规范字段名
    pub label: &'static str,                             // 显示名
    pub required: bool,                                  // 是否必填
    pub data_type: DataType,                             // 数据类型
    pub max_length: Option<usize>,                       // 最大长度（字符）
    pub valid_values: Option<&'static [&'static str]>,   // 枚举取值
    pub default_value: Option<&'static str>,             // 默认值
    #[serde(skip)]
    pub patterns: &'static [&'static str],               // 自动匹配用的表头子串（小写）
}

impl FieldDefinition {
    pub fn matches_header(&self, lowered_header: &str) -> bool {
        self.patterns.iter().any(|p| lowered_header.contains(p))
    }
}

// ==========================================
// FieldMapping - 字段映射
// ==========================================
// db_field 为空表示该列未映射；skip=true 表示用户显式排除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub csv_column: String,
    #[serde(default)]
    pub db_field: Option<String>,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub valid_values: Option<Vec<String>>,
    #[serde(default)]
    pub skip: bool,
}

impl FieldMapping {
    /// 未映射的列
    pub fn unmapped(csv_column: impl Into<String>) -> Self {
        Self {
            csv_column: csv_column.into(),
            db_field: None,
            required: None,
            data_type: None,
            transform: None,
            default_value: None,
            max_length: None,
            valid_values: None,
            skip: false,
        }
    }

    /// 绑定到规范字段，并从定义中复制规则
    pub fn bound(csv_column: impl Into<String>, definition: &FieldDefinition) -> Self {
        Self {
            csv_column: csv_column.into(),
            db_field: Some(definition.field.to_string()),
            required: Some(definition.required),
            data_type: Some(definition.data_type),
            transform: None,
            default_value: definition.default_value.map(str::to_string),
            max_length: definition.max_length,
            valid_values: definition
                .valid_values
                .map(|values| values.iter().map(|v| v.to_string()).collect()),
            skip: false,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    /// 参与校验/导入的映射
    pub fn is_active(&self) -> bool {
        !self.skip && self.db_field.is_some()
    }

    /// 结合字段定义得到最终生效的规则
    pub fn resolve(&self, definition: &'static FieldDefinition) -> ResolvedRules {
        ResolvedRules {
            field: definition.field,
            required: self.required.unwrap_or(definition.required),
            data_type: self.data_type.unwrap_or(definition.data_type),
            max_length: self.max_length.or(definition.max_length),
            valid_values: self.valid_values.clone().or_else(|| {
                definition
                    .valid_values
                    .map(|values| values.iter().map(|v| v.to_string()).collect())
            }),
            default_value: self
                .default_value
                .clone()
                .or_else(|| definition.default_value.map(str::to_string)),
            transform: self.transform.clone(),
        }
    }
}

// ==========================================
// ResolvedRules - 最终生效规则
// ==========================================
// 优先级: 映射覆写 > 字段定义
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRules {
    pub field: &'static str,
    pub required: bool,
    pub data_type: DataType,
    pub max_length: Option<usize>,
    pub valid_values: Option<Vec<String>>,
    pub default_value: Option<String>,
    pub transform: Option<String>,
}

impl ResolvedRules {
    /// 在枚举集合中查找（忽略大小写），返回规范写法
    pub fn canonical_valid_value(&self, value: &str) -> Option<&str> {
        let values = self.valid_values.as_ref()?;
        let needle = value.trim();
        values
            .iter()
            .find(|v| v.trim().eq_ignore_ascii_case(needle))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: FieldDefinition = FieldDefinition {
        field: "status",
        label: "Status",
        required: false,
        data_type: DataType::String,
        max_length: Some(20),
        valid_values: Some(&["active", "inactive"]),
        default_value: Some("active"),
        patterns: &["status"],
    };

    static STATUS_DEF: FieldDefinition = STATUS;

    #[test]
    fn test_bound_copies_definition_rules() {
        let mapping = FieldMapping::bound("Status", &STATUS);
        assert_eq!(mapping.db_field.as_deref(), Some("status"));
        assert_eq!(mapping.max_length, Some(20));
        assert_eq!(mapping.default_value.as_deref(), Some("active"));
        assert!(mapping.is_active());
    }

    #[test]
    fn test_resolve_prefers_mapping_overrides() {
        let mut mapping = FieldMapping::bound("Status", &STATUS);
        mapping.required = Some(true);
        mapping.max_length = Some(5);

        let rules = mapping.resolve(&STATUS_DEF);
        assert!(rules.required);
        assert_eq!(rules.max_length, Some(5));
    }

    #[test]
    fn test_canonical_valid_value_is_case_insensitive() {
        let rules = FieldMapping::bound("Status", &STATUS).resolve(&STATUS_DEF);
        assert_eq!(rules.canonical_valid_value("ACTIVE"), Some("active"));
        assert_eq!(rules.canonical_valid_value(" inactive "), Some("inactive"));
        assert_eq!(rules.canonical_valid_value("archived"), None);
    }

    #[test]
    fn test_skipped_mapping_is_inactive() {
        let mut mapping = FieldMapping::bound("Status", &STATUS);
        mapping.skip = true;
        assert!(!mapping.is_active());
        assert!(!FieldMapping::unmapped("Notes").is_active());
    }
}
