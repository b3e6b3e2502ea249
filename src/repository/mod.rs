// ==========================================
// 批量导入导出管道 - 数据仓储层
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 红线: Repository 不含业务逻辑
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod error;
pub mod job_repo;
pub mod memory_store;
pub mod record_store;
pub mod record_store_impl;
pub mod template_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use job_repo::{JobRepository, WriteGuard};
pub use memory_store::MemoryRecordStore;
pub use record_store::{project_fields, RecordFilter, RecordStore, TagDeletion};
pub use record_store_impl::SqliteRecordStore;
pub use template_repo::TemplateRepository;
