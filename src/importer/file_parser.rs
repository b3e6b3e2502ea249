// ==========================================
// 批量导入导出管道 - CSV 解析器 / 分隔符识别
// ==========================================
// 输入: 原始字节（仅 UTF-8，自动去除 BOM）
// 输出: 表头 + RawRow 列表 + 实际使用的分隔符
// 行号: 表头为第 0 行，数据从第 1 行开始；空白行跳过但占用行号
// ==========================================

use crate::domain::record::RawRow;
use crate::importer::error::ParseError;
use csv::{ReaderBuilder, Trim};
use std::collections::HashSet;
use tracing::debug;

const UTF8_BOM: &str = "\u{feff}";

/// 候选分隔符（按平局优先级排序）
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

// ==========================================
// ParseOptions - 解析选项
// ==========================================
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub delimiter: Option<u8>, // None = 自动识别
    pub has_headers: bool,
    pub max_rows: Option<usize>, // 只解析前 N 条数据行（预览用）
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            has_headers: true,
            max_rows: None,
        }
    }
}

// ==========================================
// ParsedCsv - 解析结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    pub delimiter: u8,
}

/// 分隔符识别: 统计表头行中各候选字符出现次数，最多者胜出
///
/// 平局按 逗号 > 分号 > 制表符 > 竖线；全部为 0 时回落到逗号
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0usize;
    for candidate in CANDIDATE_DELIMITERS {
        let count = header_line.bytes().filter(|b| *b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

// ==========================================
// CsvParser
// ==========================================
pub struct CsvParser {
    options: ParseOptions,
}

impl CsvParser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    /// 解析原始字节
    pub fn parse_bytes(&self, raw: &[u8]) -> Result<ParsedCsv, ParseError> {
        let text = std::str::from_utf8(raw).map_err(|e| {
            ParseError::Encoding(format!("第 {} 字节处出现非 UTF-8 内容", e.valid_up_to()))
        })?;
        self.parse_str(text)
    }

    /// 解析文本
    pub fn parse_str(&self, text: &str) -> Result<ParsedCsv, ParseError> {
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let header_line = text.lines().next().unwrap_or_default();
        let delimiter = self
            .options
            .delimiter
            .unwrap_or_else(|| detect_delimiter(header_line));

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .trim(Trim::None)
            .from_reader(text.as_bytes());

        let mut records = reader.records();

        let headers = if self.options.has_headers {
            let header_record = match records.next() {
                Some(record) => record.map_err(|e| malformed(0, e))?,
                None => return Err(ParseError::Empty),
            };
            let headers: Vec<String> = header_record.iter().map(|h| h.trim().to_string()).collect();
            check_headers(&headers)?;
            headers
        } else {
            Vec::new()
        };

        let mut headers = headers;
        let mut rows = Vec::new();
        let mut row_number = 0usize;

        for result in records {
            row_number += 1;
            let record = result.map_err(|e| malformed(row_number, e))?;

            // 无表头: 以首条记录的列数生成 "Column N"
            if headers.is_empty() {
                headers = (1..=record.len()).map(|i| format!("Column {}", i)).collect();
            }

            // 短行补空，超出表头的单元格丢弃
            let cells: Vec<(String, String)> = headers
                .iter()
                .enumerate()
                .map(|(idx, header)| {
                    (header.clone(), record.get(idx).unwrap_or_default().to_string())
                })
                .collect();

            let row = RawRow::new(row_number, cells);
            if row.is_blank() {
                continue;
            }
            rows.push(row);

            if let Some(max) = self.options.max_rows {
                if rows.len() >= max {
                    break;
                }
            }
        }

        if headers.is_empty() {
            return Err(ParseError::Empty);
        }

        debug!(
            delimiter = %(delimiter as char).escape_default(),
            columns = headers.len(),
            rows = rows.len(),
            "CSV 解析完成"
        );

        Ok(ParsedCsv {
            headers,
            rows,
            delimiter,
        })
    }
}

impl Default for CsvParser {
    fn default() -> Self {
        Self::new(ParseOptions::default())
    }
}

fn check_headers(headers: &[String]) -> Result<(), ParseError> {
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(ParseError::Empty);
    }
    let mut seen = HashSet::new();
    for (idx, header) in headers.iter().enumerate() {
        if header.is_empty() {
            return Err(ParseError::EmptyHeader(idx + 1));
        }
        if !seen.insert(header.as_str()) {
            return Err(ParseError::DuplicateHeader(header.clone()));
        }
    }
    Ok(())
}

fn malformed(row: usize, err: csv::Error) -> ParseError {
    ParseError::Malformed {
        row,
        message: err.to_string(),
    }
}
