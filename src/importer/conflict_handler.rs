// ==========================================
// 批量导入导出管道 - 重复记录检测
// ==========================================
// 职责: 检测文件内重复自然键 / 与存储中已有记录的自然键冲突
// 结果只用于提示（warning），是否写入由重复处理策略决定
// ==========================================

use crate::domain::record::NaturalKey;
use crate::domain::types::Module;
use crate::repository::error::RepositoryResult;
use crate::repository::record_store::RecordStore;
use std::collections::{BTreeMap, HashMap};

/// 文件内重复: 当前行号 + 自然键 + 首次出现的行号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFileDuplicate {
    pub row: usize,
    pub key: NaturalKey,
    pub first_row: usize,
}

/// 与已有记录冲突: 行号 + 自然键 + 已有记录 id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingConflict {
    pub row: usize,
    pub key: NaturalKey,
    pub existing_id: String,
}

pub struct ConflictHandler;

impl ConflictHandler {
    /// 检测文件内重复自然键
    ///
    /// # 返回
    /// - 重复行列表（不包括第一次出现），按输入顺序
    pub fn detect_in_file(&self, keyed_rows: &[(usize, NaturalKey)]) -> Vec<InFileDuplicate> {
        let mut first_occurrence: HashMap<&NaturalKey, usize> = HashMap::new();
        let mut duplicates = Vec::new();

        for (row, key) in keyed_rows {
            match first_occurrence.get(key) {
                Some(first_row) => duplicates.push(InFileDuplicate {
                    row: *row,
                    key: key.clone(),
                    first_row: *first_row,
                }),
                None => {
                    first_occurrence.insert(key, *row);
                }
            }
        }

        duplicates
    }

    /// 检测与存储中已有记录的冲突（每个自然键只查询一次）
    pub async fn detect_existing(
        &self,
        store: &dyn RecordStore,
        module: Module,
        keyed_rows: &[(usize, NaturalKey)],
    ) -> RepositoryResult<Vec<ExistingConflict>> {
        let mut lookups: BTreeMap<&NaturalKey, Option<String>> = BTreeMap::new();
        for (_, key) in keyed_rows {
            if lookups.contains_key(key) {
                continue;
            }
            let existing = store.find_by_natural_key(module, key).await?;
            lookups.insert(key, existing.map(|r| r.id));
        }

        Ok(keyed_rows
            .iter()
            .filter_map(|(row, key)| {
                lookups
                    .get(key)
                    .and_then(|id| id.clone())
                    .map(|existing_id| ExistingConflict {
                        row: *row,
                        key: key.clone(),
                        existing_id,
                    })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> NaturalKey {
        NaturalKey::from_parts([s]).unwrap()
    }

    #[test]
    fn test_detect_in_file_reports_later_rows() {
        let handler = ConflictHandler;
        let rows = vec![(1, key("A")), (2, key("b")), (3, key("a")), (5, key("A "))];
        let dups = handler.detect_in_file(&rows);
        assert_eq!(dups.len(), 2);
        assert_eq!(dups[0].row, 3);
        assert_eq!(dups[0].first_row, 1);
        assert_eq!(dups[1].row, 5);
    }

    #[test]
    fn test_no_duplicates() {
        let handler = ConflictHandler;
        assert!(handler.detect_in_file(&[(1, key("x")), (2, key("y"))]).is_empty());
    }
}
