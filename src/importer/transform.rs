// ==========================================
// 批量导入导出管道 - 值转换管道
// ==========================================
// 职责: 映射上声明的单值转换（按 id 选择）
// 约定: 转换永不失败；无法处理时原样返回；未知/空 id 为空操作
// ==========================================

use serde::{Deserialize, Serialize};

/// 转换类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Uppercase,
    Lowercase,
    Trim,
    NumbersOnly,
    PhoneNormalize,
    CurrencyToNumber,
    BooleanYesNo,
}

impl TransformKind {
    pub fn all() -> &'static [TransformKind] {
        &[
            TransformKind::Uppercase,
            TransformKind::Lowercase,
            TransformKind::Trim,
            TransformKind::NumbersOnly,
            TransformKind::PhoneNormalize,
            TransformKind::CurrencyToNumber,
            TransformKind::BooleanYesNo,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            TransformKind::Uppercase => "uppercase",
            TransformKind::Lowercase => "lowercase",
            TransformKind::Trim => "trim",
            TransformKind::NumbersOnly => "numbers_only",
            TransformKind::PhoneNormalize => "phone_normalize",
            TransformKind::CurrencyToNumber => "currency_to_number",
            TransformKind::BooleanYesNo => "boolean_yes_no",
        }
    }

    pub fn from_id(id: &str) -> Option<TransformKind> {
        let id = id.trim();
        Self::all().iter().copied().find(|k| k.id() == id)
    }

    pub fn apply(&self, value: &str) -> String {
        match self {
            TransformKind::Uppercase => value.to_uppercase(),
            TransformKind::Lowercase => value.to_lowercase(),
            TransformKind::Trim => value.trim().to_string(),
            TransformKind::NumbersOnly => digits_only(value),
            TransformKind::PhoneNormalize => {
                let digits = digits_only(value);
                if digits.len() == 10 {
                    format!("({}) {}-{}", &digits[0..3], &digits[3..6], &digits[6..10])
                } else {
                    value.to_string()
                }
            }
            TransformKind::CurrencyToNumber => match parse_currency(value) {
                Some(number) => format_decimal(number),
                None => value.to_string(),
            },
            TransformKind::BooleanYesNo => match parse_boolean(value) {
                Some(b) => b.to_string(),
                None => value.to_string(),
            },
        }
    }
}

/// 按 id 应用转换；None / 未知 id 原样返回
pub fn apply_transform(transform: Option<&str>, value: &str) -> String {
    match transform.and_then(TransformKind::from_id) {
        Some(kind) => kind.apply(value),
        None => value.to_string(),
    }
}

// ==========================================
// 值解析工具（校验与执行共用）
// ==========================================

pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 十进制数解析（允许首尾空白）
pub fn parse_number(value: &str) -> Option<f64> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// 货币解析: 去除货币符号、千分位和空白后按十进制解析
///
/// 支持 "(123.45)" 形式的负数
pub fn parse_currency(value: &str) -> Option<f64> {
    let v = value.trim();
    let (negative_paren, v) = match v.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, v),
    };
    let cleaned: String = v
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let number = parse_number(&cleaned)?;
    Some(if negative_paren { -number } else { number })
}

/// 布尔值识别: yes/y/true/1 与 no/n/false/0（忽略大小写）
pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Some(true),
        "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// 规范十进制表示（去除多余的尾随 0）
pub fn format_decimal(number: f64) -> String {
    format!("{}", number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_trim_transforms() {
        assert_eq!(apply_transform(Some("uppercase"), "acme"), "ACME");
        assert_eq!(apply_transform(Some("lowercase"), "A@X.COM"), "a@x.com");
        assert_eq!(apply_transform(Some("trim"), "  x  "), "x");
    }

    #[test]
    fn test_unknown_or_missing_transform_is_noop() {
        assert_eq!(apply_transform(None, " raw "), " raw ");
        assert_eq!(apply_transform(Some(""), " raw "), " raw ");
        assert_eq!(apply_transform(Some("reverse"), "abc"), "abc");
    }

    #[test]
    fn test_phone_normalize() {
        assert_eq!(apply_transform(Some("phone_normalize"), "555.123.4567"), "(555) 123-4567");
        // 非 10 位保持原样
        assert_eq!(apply_transform(Some("phone_normalize"), "+44 20 7946 0958"), "+44 20 7946 0958");
        assert_eq!(apply_transform(Some("numbers_only"), "A-12/3"), "123");
    }

    #[test]
    fn test_currency_to_number() {
        assert_eq!(apply_transform(Some("currency_to_number"), "$1,234.50"), "1234.5");
        assert_eq!(apply_transform(Some("currency_to_number"), "(10.00)"), "-10");
        assert_eq!(apply_transform(Some("currency_to_number"), "free"), "free");
    }

    #[test]
    fn test_boolean_yes_no() {
        assert_eq!(apply_transform(Some("boolean_yes_no"), "Yes"), "true");
        assert_eq!(apply_transform(Some("boolean_yes_no"), "N"), "false");
        assert_eq!(apply_transform(Some("boolean_yes_no"), "0"), "false");
        assert_eq!(apply_transform(Some("boolean_yes_no"), "maybe"), "maybe");
    }

    #[test]
    fn test_all_ids_round_trip() {
        for kind in TransformKind::all() {
            assert_eq!(TransformKind::from_id(kind.id()), Some(*kind));
        }
    }
}
