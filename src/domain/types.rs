// ==========================================
// 批量导入导出管道 - 领域类型定义
// ==========================================
// 职责: 模块/数据类型/重复处理策略/任务状态等枚举
// 序列化格式: snake_case（与数据库、前端契约一致）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 业务模块 (Module)
// ==========================================
// 每个模块对应一份静态字段目录（见 domain::catalog）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Customers,
    Vendors,
    Products,
    Inventory,
    Orders,
    Estimates,
}

impl Module {
    pub const ALL: [Module; 6] = [
        Module::Customers,
        Module::Vendors,
        Module::Products,
        Module::Inventory,
        Module::Orders,
        Module::Estimates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Customers => "customers",
            Module::Vendors => "vendors",
            Module::Products => "products",
            Module::Inventory => "inventory",
            Module::Orders => "orders",
            Module::Estimates => "estimates",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Module {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customers" => Ok(Module::Customers),
            "vendors" => Ok(Module::Vendors),
            "products" => Ok(Module::Products),
            "inventory" => Ok(Module::Inventory),
            "orders" => Ok(Module::Orders),
            "estimates" => Ok(Module::Estimates),
            other => Err(format!("未知模块: {}", other)),
        }
    }
}

// ==========================================
// 字段数据类型 (DataType)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Date,
    Email,
    Phone,
    Currency,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Email => "email",
            DataType::Phone => "phone",
            DataType::Currency => "currency",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 重复记录处理策略 (DuplicateHandling)
// ==========================================
// 自然键命中已有记录时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHandling {
    #[default]
    Skip,      // 跳过，不写入
    Update,    // 覆盖已映射字段
    CreateNew, // 始终新建
    Merge,     // 仅写入非空值
}

impl DuplicateHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateHandling::Skip => "skip",
            DuplicateHandling::Update => "update",
            DuplicateHandling::CreateNew => "create_new",
            DuplicateHandling::Merge => "merge",
        }
    }
}

impl fmt::Display for DuplicateHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DuplicateHandling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "skip" => Ok(DuplicateHandling::Skip),
            "update" => Ok(DuplicateHandling::Update),
            "create_new" => Ok(DuplicateHandling::CreateNew),
            "merge" => Ok(DuplicateHandling::Merge),
            other => Err(format!("未知重复处理策略: {}", other)),
        }
    }
}

// ==========================================
// 任务状态 (JobStatus)
// ==========================================
// 生命周期: pending → processing → {completed | failed | cancelled} [→ rolled_back]
// 终态之间不可迁移，唯一例外是 completed → rolled_back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s.trim() {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "rolled_back" => Some(JobStatus::RolledBack),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::RolledBack
        )
    }

    /// 状态迁移是否合法（单调）
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::{Cancelled, Completed, Failed, Pending, Processing, RolledBack};
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Completed, RolledBack)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 校验问题级别 (Severity)
// ==========================================
// warning 永远不阻断导入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

// ==========================================
// 日期格式 (DateFormat)
// ==========================================
// 模板/配置中以 "YYYY-MM-DD" 形式保存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DateFormat {
    #[default]
    #[serde(rename = "YYYY-MM-DD")]
    IsoDate,
    #[serde(rename = "MM/DD/YYYY")]
    UsSlash,
    #[serde(rename = "DD/MM/YYYY")]
    EuSlash,
    #[serde(rename = "DD.MM.YYYY")]
    EuDot,
    #[serde(rename = "YYYYMMDD")]
    Compact,
}

impl DateFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateFormat::IsoDate => "YYYY-MM-DD",
            DateFormat::UsSlash => "MM/DD/YYYY",
            DateFormat::EuSlash => "DD/MM/YYYY",
            DateFormat::EuDot => "DD.MM.YYYY",
            DateFormat::Compact => "YYYYMMDD",
        }
    }

    /// chrono 格式串
    pub fn chrono_pattern(&self) -> &'static str {
        match self {
            DateFormat::IsoDate => "%Y-%m-%d",
            DateFormat::UsSlash => "%m/%d/%Y",
            DateFormat::EuSlash => "%d/%m/%Y",
            DateFormat::EuDot => "%d.%m.%Y",
            DateFormat::Compact => "%Y%m%d",
        }
    }

    pub fn parse_date(&self, value: &str) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::parse_from_str(value.trim(), self.chrono_pattern()).ok()
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DateFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "YYYY-MM-DD" => Ok(DateFormat::IsoDate),
            "MM/DD/YYYY" => Ok(DateFormat::UsSlash),
            "DD/MM/YYYY" => Ok(DateFormat::EuSlash),
            "DD.MM.YYYY" => Ok(DateFormat::EuDot),
            "YYYYMMDD" => Ok(DateFormat::Compact),
            other => Err(format!("不支持的日期格式: {}", other)),
        }
    }
}
