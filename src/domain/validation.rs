// ==========================================
// 批量导入导出管道 - 校验结果模型
// ==========================================
// 校验问题以数据形式返回，不抛出；调用方据 is_valid 决定是否允许导入
// ==========================================

use crate::domain::record::RawRow;
use crate::domain::types::Severity;
use serde::{Deserialize, Serialize};

// ==========================================
// ValidationIssue - 校验问题
// ==========================================
// row 为空表示全局（配置级）问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub row: Option<usize>,
    pub column: String,
    pub message: String,
    pub value: Option<String>,
}

impl ValidationIssue {
    pub fn error(row: Option<usize>, column: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            row,
            column: column.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn warning(row: Option<usize>, column: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            row,
            column: column.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

// ==========================================
// ValidationResult - 校验结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub row_count: usize,
    pub column_count: usize,
    pub headers: Vec<String>,
    pub sample_rows: Vec<RawRow>,
}

impl ValidationResult {
    /// 样例行数量
    pub const SAMPLE_SIZE: usize = 5;

    pub fn new(
        issues: Vec<ValidationIssue>,
        headers: Vec<String>,
        rows: &[RawRow],
    ) -> Self {
        let is_valid = !issues.iter().any(ValidationIssue::is_error);
        Self {
            is_valid,
            issues,
            row_count: rows.len(),
            column_count: headers.len(),
            headers,
            sample_rows: rows.iter().take(Self::SAMPLE_SIZE).cloned().collect(),
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_never_block() {
        let issues = vec![ValidationIssue::warning(Some(1), "Email", "重复记录")];
        let result = ValidationResult::new(issues, vec!["Email".to_string()], &[]);
        assert!(result.is_valid);
        assert_eq!(result.warning_count(), 1);
        assert_eq!(result.error_count(), 0);
    }

    #[test]
    fn test_single_error_blocks() {
        let issues = vec![
            ValidationIssue::warning(Some(1), "Email", "重复记录"),
            ValidationIssue::error(None, "company_name", "必填字段未映射"),
        ];
        let result = ValidationResult::new(issues, vec![], &[]);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_sample_rows_are_capped() {
        let rows: Vec<RawRow> = (1..=8).map(|n| RawRow::new(n, vec![])).collect();
        let result = ValidationResult::new(vec![], vec![], &rows);
        assert_eq!(result.row_count, 8);
        assert_eq!(result.sample_rows.len(), ValidationResult::SAMPLE_SIZE);
    }
}
