// ==========================================
// 批量导入导出管道 - 导出生成器
// ==========================================
// 职责: 查询记录 → 按字段类型格式化 → 序列化为 CSV
// 格式化:
//   - currency: "$1,234.50"（两位小数、千分位、负数 "-$"）
//   - boolean:  Yes / No
//   - date:     按导出日期格式（默认 MM/DD/YYYY）
//   - 其他:     字符串化；null 为空
// 无法格式化的记录整条跳过并记 warning
// ==========================================

use crate::domain::catalog;
use crate::domain::field::FieldDefinition;
use crate::domain::record::StoredRecord;
use crate::domain::types::{DataType, DateFormat, Module};
use crate::exporter::error::ExportResult;
use crate::importer::error::MappingError;
use crate::importer::transform::{parse_boolean, parse_currency, parse_number};
use crate::repository::record_store::{RecordFilter, RecordStore};
use chrono::NaiveDate;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 记录中日期字段的存储格式
const STORED_DATE_PATTERN: &str = "%Y-%m-%d";

/// 可被 f64 精确表示的最大分值（2^53）
const MAX_EXACT_CENTS: f64 = 9_007_199_254_740_992.0;

// ==========================================
// ExportOptions - 导出选项
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    pub delimiter: u8,
    pub include_headers: bool,
    #[serde(default)]
    pub filter: Option<RecordFilter>,
    pub date_format: DateFormat,
    pub currency_symbol: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            include_headers: true,
            filter: None,
            date_format: DateFormat::UsSlash,
            currency_symbol: "$".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutput {
    pub bytes: Vec<u8>,
    pub record_count: usize,
    pub warnings: Vec<String>,
}

// ==========================================
// ExportGenerator
// ==========================================
pub struct ExportGenerator {
    store: Arc<dyn RecordStore>,
}

impl ExportGenerator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// 生成 CSV
    ///
    /// # 参数
    /// - fields: 有序的规范字段名；为空时导出目录中的全部字段
    #[instrument(skip(self, fields, options), fields(module = %module, field_count = fields.len()))]
    pub async fn generate(
        &self,
        module: Module,
        fields: &[String],
        options: &ExportOptions,
    ) -> ExportResult<ExportOutput> {
        let definitions = resolve_fields(module, fields)?;
        let names: Vec<String> = definitions.iter().map(|d| d.field.to_string()).collect();
        let records = self
            .store
            .query(module, &names, options.filter.as_ref())
            .await?;

        let mut writer = WriterBuilder::new()
            .delimiter(options.delimiter)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        if options.include_headers {
            writer.write_record(definitions.iter().map(|d| d.label))?;
        }

        let mut warnings = Vec::new();
        let mut record_count = 0;
        for record in &records {
            match format_record(record, &definitions, options) {
                Ok(cells) => {
                    writer.write_record(&cells)?;
                    record_count += 1;
                }
                Err(message) => {
                    warn!(record_id = %record.id, message = %message, "记录无法格式化，已跳过");
                    warnings.push(format!("记录 {} 已跳过: {}", record.id, message));
                }
            }
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        info!(
            module = %module,
            record_count = record_count,
            skipped = warnings.len(),
            "导出生成完成"
        );
        Ok(ExportOutput {
            bytes,
            record_count,
            warnings,
        })
    }
}

/// 将导出内容写入目录，返回文件路径
pub fn write_export_file(dir: &Path, file_name: &str, bytes: &[u8]) -> ExportResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "导出文件已写入");
    Ok(path)
}

fn resolve_fields(
    module: Module,
    fields: &[String],
) -> Result<Vec<&'static FieldDefinition>, MappingError> {
    if fields.is_empty() {
        return Ok(catalog::fields(module).iter().collect());
    }
    fields
        .iter()
        .map(|field| {
            catalog::find_field(module, field).ok_or_else(|| MappingError::UnknownField {
                module,
                field: field.clone(),
            })
        })
        .collect()
}

fn format_record(
    record: &StoredRecord,
    definitions: &[&'static FieldDefinition],
    options: &ExportOptions,
) -> Result<Vec<String>, String> {
    definitions
        .iter()
        .map(|definition| {
            let value = record.fields.get(definition.field).unwrap_or(&Value::Null);
            format_value(definition.data_type, value, options)
                .map_err(|reason| format!("字段 {} {}", definition.field, reason))
        })
        .collect()
}

/// 单值格式化；失败返回原因
pub fn format_value(data_type: DataType, value: &Value, options: &ExportOptions) -> Result<String, String> {
    if value.is_null() {
        return Ok(String::new());
    }
    match data_type {
        DataType::Currency => {
            let amount = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) if s.trim().is_empty() => return Ok(String::new()),
                Value::String(s) => parse_currency(s),
                _ => None,
            };
            let amount = amount.ok_or_else(|| format!("不是合法金额: {}", value))?;
            format_currency(amount, &options.currency_symbol)
        }
        DataType::Boolean => {
            let flag = match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => parse_boolean(s),
                Value::Number(n) => parse_boolean(&n.to_string()),
                _ => None,
            };
            flag.map(|b| if b { "Yes" } else { "No" }.to_string())
                .ok_or_else(|| format!("不是合法布尔值: {}", value))
        }
        DataType::Date => match value {
            Value::String(s) if s.trim().is_empty() => Ok(String::new()),
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), STORED_DATE_PATTERN)
                .map(|d| d.format(options.date_format.chrono_pattern()).to_string())
                .map_err(|_| format!("不是合法日期: {}", s)),
            other => Err(format!("不是合法日期: {}", other)),
        },
        DataType::Number => match value {
            Value::Number(n) => Ok(n.to_string()),
            Value::String(s) if s.trim().is_empty() || parse_number(s).is_some() => {
                Ok(s.trim().to_string())
            }
            other => Err(format!("不是合法数字: {}", other)),
        },
        DataType::String | DataType::Email | DataType::Phone => Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    }
}

/// 金额格式: 符号 + 千分位 + 两位小数
///
/// 非有限值或超出精确表示范围的金额返回 Err（整条记录跳过）
pub fn format_currency(amount: f64, symbol: &str) -> Result<String, String> {
    let scaled = (amount.abs() * 100.0).round();
    if !scaled.is_finite() || scaled > MAX_EXACT_CENTS {
        return Err(format!("金额超出可导出范围: {}", amount));
    }
    let cents = scaled as u64;
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    Ok(format!(
        "{}{}{}.{:02}",
        sign,
        symbol,
        group_thousands(cents / 100),
        cents % 100
    ))
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory_store::MemoryRecordStore;
    use crate::domain::record::RecordFields;
    use serde_json::json;

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(1234.5, "$").unwrap(), "$1,234.50");
        assert_eq!(format_currency(-1234.5, "$").unwrap(), "-$1,234.50");
        assert_eq!(format_currency(0.0, "€").unwrap(), "€0.00");
        assert_eq!(format_currency(1_000_000.0, "$").unwrap(), "$1,000,000.00");
        assert_eq!(format_currency(999.999, "$").unwrap(), "$1,000.00");
    }

    #[test]
    fn test_format_currency_rejects_out_of_range() {
        assert!(format_currency(1.0e17, "$").is_err());
        assert!(format_currency(-2.0e20, "$").is_err());
        assert!(format_currency(f64::INFINITY, "$").is_err());
        assert!(format_currency(f64::NAN, "$").is_err());
        assert_eq!(
            format_currency(12_345_678_901.25, "$").unwrap(),
            "$12,345,678,901.25"
        );
        assert!(format_value(DataType::Currency, &json!(1.0e300), &ExportOptions::default()).is_err());
    }

    #[test]
    fn test_format_value_by_type() {
        let opts = ExportOptions::default();
        assert_eq!(format_value(DataType::Boolean, &json!(true), &opts).unwrap(), "Yes");
        assert_eq!(format_value(DataType::Boolean, &json!("no"), &opts).unwrap(), "No");
        assert_eq!(
            format_value(DataType::Date, &json!("2025-01-20"), &opts).unwrap(),
            "01/20/2025"
        );
        assert_eq!(format_value(DataType::Number, &json!(12), &opts).unwrap(), "12");
        assert_eq!(format_value(DataType::String, &Value::Null, &opts).unwrap(), "");
        assert!(format_value(DataType::Currency, &json!("lots"), &opts).is_err());
    }

    async fn seeded_store() -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::new());
        for (name, sku, price) in [("Widget, large", "W-1", json!(1234.5)), ("Gadget", "G-1", json!("n/a"))] {
            let mut fields = RecordFields::new();
            fields.insert("name".to_string(), json!(name));
            fields.insert("sku".to_string(), json!(sku));
            fields.insert("price".to_string(), price);
            store.insert(Module::Products, fields, None).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_generate_quotes_and_skips_unformattable() {
        let store = seeded_store().await;
        let generator = ExportGenerator::new(store);
        let fields = vec!["name".to_string(), "sku".to_string(), "price".to_string()];
        let output = generator
            .generate(Module::Products, &fields, &ExportOptions::default())
            .await
            .unwrap();

        let text = String::from_utf8(output.bytes).unwrap();
        assert_eq!(text, "Product Name,SKU,Price\n\"Widget, large\",W-1,\"$1,234.50\"\n");
        assert_eq!(output.record_count, 1);
        assert_eq!(output.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_field_is_mapping_error() {
        let generator = ExportGenerator::new(seeded_store().await);
        let err = generator
            .generate(Module::Products, &["colour".to_string()], &ExportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::exporter::error::ExportError::Mapping(MappingError::UnknownField { .. })
        ));
    }
}
