// ==========================================
// 批量导入导出管道 - 字段映射引擎
// ==========================================
// 职责: CSV 列 → 规范字段 的自动建议 / 模板套用 / 手工编辑
// 不变量:
//   1. db_field 必须是模块目录中存在的字段
//   2. 活动映射中同一 db_field 至多出现一次
//   3. 每个 CSV 列至多一条映射
// ==========================================

use crate::domain::catalog;
use crate::domain::field::{FieldDefinition, FieldMapping};
use crate::domain::template::ImportTemplate;
use crate::domain::types::{DataType, Module};
use crate::importer::error::MappingError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

// ==========================================
// TargetOption - 可选目标字段（下拉框契约）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOption {
    pub field: &'static str,
    pub label: &'static str,
    pub required: bool,
    pub data_type: DataType,
    pub disabled: bool, // 已被其他列占用
}

pub struct FieldMapper {
    module: Module,
}

impl FieldMapper {
    pub fn new(module: Module) -> Self {
        Self { module }
    }

    pub fn module(&self) -> Module {
        self.module
    }

    /// 自动建议映射
    ///
    /// 表头转小写后，按目录顺序取第一个模式子串命中且尚未被占用的字段；
    /// 未命中的表头保持未映射。每个表头恰好返回一条映射。
    pub fn suggest_mappings(&self, headers: &[String]) -> Vec<FieldMapping> {
        let definitions = catalog::fields(self.module);
        let mut bound: HashSet<&'static str> = HashSet::new();

        let mappings: Vec<FieldMapping> = headers
            .iter()
            .map(|header| {
                let lowered = header.to_lowercase();
                let hit = definitions
                    .iter()
                    .find(|d| !bound.contains(d.field) && d.matches_header(&lowered));
                match hit {
                    Some(definition) => {
                        bound.insert(definition.field);
                        FieldMapping::bound(header.clone(), definition)
                    }
                    None => FieldMapping::unmapped(header.clone()),
                }
            })
            .collect();

        debug!(
            module = %self.module,
            headers = headers.len(),
            matched = bound.len(),
            "自动映射建议完成"
        );
        mappings
    }

    /// 以模板映射为种子: 按 csv_column 精确匹配表头
    ///
    /// 模板中不存在于文件的列被丢弃；文件中模板未覆盖的列保持未映射
    pub fn mappings_from_template(
        &self,
        template: &ImportTemplate,
        headers: &[String],
    ) -> Result<Vec<FieldMapping>, MappingError> {
        if template.module != self.module {
            return Err(MappingError::ModuleMismatch {
                expected: self.module,
                actual: template.module,
            });
        }

        let by_column: HashMap<&str, &FieldMapping> = template
            .field_mappings
            .iter()
            .map(|m| (m.csv_column.as_str(), m))
            .collect();

        let mappings: Vec<FieldMapping> = headers
            .iter()
            .map(|header| match by_column.get(header.as_str()) {
                Some(mapping) => (*mapping).clone(),
                None => FieldMapping::unmapped(header.clone()),
            })
            .collect();

        self.check_mappings(&mappings)?;
        Ok(mappings)
    }

    /// 校验映射集合的不变量
    pub fn check_mappings(&self, mappings: &[FieldMapping]) -> Result<(), MappingError> {
        let mut columns: HashSet<&str> = HashSet::new();
        let mut targets: HashMap<&str, &str> = HashMap::new();

        for mapping in mappings {
            if !columns.insert(mapping.csv_column.as_str()) {
                return Err(MappingError::DuplicateColumn(mapping.csv_column.clone()));
            }
            let Some(field) = mapping.db_field.as_deref() else {
                continue;
            };
            if catalog::find_field(self.module, field).is_none() {
                return Err(MappingError::UnknownField {
                    module: self.module,
                    field: field.to_string(),
                });
            }
            if mapping.skip {
                continue;
            }
            if let Some(first) = targets.insert(field, mapping.csv_column.as_str()) {
                return Err(MappingError::DuplicateTarget {
                    field: field.to_string(),
                    first: first.to_string(),
                    second: mapping.csv_column.clone(),
                });
            }
        }
        Ok(())
    }

    /// 缺少活动映射的必填字段
    pub fn required_coverage(&self, mappings: &[FieldMapping]) -> Vec<&'static FieldDefinition> {
        let active: HashSet<&str> = mappings
            .iter()
            .filter(|m| m.is_active())
            .filter_map(|m| m.db_field.as_deref())
            .collect();
        catalog::required_fields(self.module)
            .filter(|d| !active.contains(d.field))
            .collect()
    }

    /// 某列可选的目标字段；被其他活动映射占用的字段标记为 disabled
    pub fn available_targets(&self, mappings: &[FieldMapping], for_column: &str) -> Vec<TargetOption> {
        let taken: HashSet<&str> = mappings
            .iter()
            .filter(|m| m.is_active() && m.csv_column != for_column)
            .filter_map(|m| m.db_field.as_deref())
            .collect();

        catalog::fields(self.module)
            .iter()
            .map(|d| TargetOption {
                field: d.field,
                label: d.label,
                required: d.required,
                data_type: d.data_type,
                disabled: taken.contains(d.field),
            })
            .collect()
    }

    /// 新增一列的映射
    pub fn add_mapping(
        &self,
        mappings: &mut Vec<FieldMapping>,
        mapping: FieldMapping,
    ) -> Result<(), MappingError> {
        if mappings.iter().any(|m| m.csv_column == mapping.csv_column) {
            return Err(MappingError::DuplicateColumn(mapping.csv_column));
        }
        let mut next = mappings.clone();
        next.push(mapping);
        self.check_mappings(&next)?;
        *mappings = next;
        Ok(())
    }

    /// 替换某列的映射；结果违反不变量时保持原状
    pub fn update_mapping(
        &self,
        mappings: &mut Vec<FieldMapping>,
        mapping: FieldMapping,
    ) -> Result<(), MappingError> {
        let idx = mappings
            .iter()
            .position(|m| m.csv_column == mapping.csv_column)
            .ok_or_else(|| MappingError::UnknownColumn(mapping.csv_column.clone()))?;
        let mut next = mappings.clone();
        next[idx] = mapping;
        self.check_mappings(&next)?;
        *mappings = next;
        Ok(())
    }

    /// 解除某列的映射（列仍保留为未映射），返回原映射
    pub fn remove_mapping(
        &self,
        mappings: &mut [FieldMapping],
        csv_column: &str,
    ) -> Result<FieldMapping, MappingError> {
        let slot = mappings
            .iter_mut()
            .find(|m| m.csv_column == csv_column)
            .ok_or_else(|| MappingError::UnknownColumn(csv_column.to_string()))?;
        Ok(std::mem::replace(slot, FieldMapping::unmapped(csv_column)))
    }

    /// 把某列绑定到规范字段（规则从目录复制，保留原有转换）
    pub fn bind_column(
        &self,
        mappings: &mut Vec<FieldMapping>,
        csv_column: &str,
        field: &str,
    ) -> Result<(), MappingError> {
        let definition =
            catalog::find_field(self.module, field).ok_or_else(|| MappingError::UnknownField {
                module: self.module,
                field: field.to_string(),
            })?;
        let transform = mappings
            .iter()
            .find(|m| m.csv_column == csv_column)
            .and_then(|m| m.transform.clone());
        let mut mapping = FieldMapping::bound(csv_column, definition);
        mapping.transform = transform;
        self.update_mapping(mappings, mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_suggest_customer_headers() {
        let mapper = FieldMapper::new(Module::Customers);
        let mappings =
            mapper.suggest_mappings(&headers(&["Company Name", "E-mail Address", "Phone #", "Fax"]));

        assert_eq!(mappings.len(), 4);
        assert_eq!(mappings[0].db_field.as_deref(), Some("company_name"));
        assert_eq!(mappings[1].db_field.as_deref(), Some("email"));
        assert_eq!(mappings[2].db_field.as_deref(), Some("phone"));
        assert_eq!(mappings[3].db_field, None);
        assert!(mapper.check_mappings(&mappings).is_ok());
    }

    #[test]
    fn test_suggest_never_binds_a_field_twice() {
        let mapper = FieldMapper::new(Module::Customers);
        let mappings = mapper.suggest_mappings(&headers(&["Email", "Alt Email"]));
        assert_eq!(mappings[0].db_field.as_deref(), Some("email"));
        assert_eq!(mappings[1].db_field, None);
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let mapper = FieldMapper::new(Module::Products);
        let mut mappings = mapper.suggest_mappings(&headers(&["SKU", "Code"]));
        let err = mapper.bind_column(&mut mappings, "Code", "sku").unwrap_err();
        assert!(matches!(err, MappingError::DuplicateTarget { .. }));
        // 失败时保持原状
        assert_eq!(mappings[1].db_field, None);
    }

    #[test]
    fn test_skipped_mapping_frees_its_target() {
        let mapper = FieldMapper::new(Module::Products);
        let mut mappings = mapper.suggest_mappings(&headers(&["SKU", "Code"]));
        let mut skipped = mappings[0].clone();
        skipped.skip = true;
        mapper.update_mapping(&mut mappings, skipped).unwrap();
        mapper.bind_column(&mut mappings, "Code", "sku").unwrap();
        assert_eq!(mappings[1].db_field.as_deref(), Some("sku"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mapper = FieldMapper::new(Module::Products);
        let mut mappings = vec![FieldMapping::unmapped("X")];
        let mut bad = FieldMapping::unmapped("X");
        bad.db_field = Some("colour".to_string());
        assert!(matches!(
            mapper.update_mapping(&mut mappings, bad),
            Err(MappingError::UnknownField { .. })
        ));
        assert!(matches!(
            mapper.add_mapping(&mut mappings, FieldMapping::unmapped("X")),
            Err(MappingError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_required_coverage_and_remove() {
        let mapper = FieldMapper::new(Module::Products);
        let mut mappings = mapper.suggest_mappings(&headers(&["SKU", "Name", "Price"]));
        assert!(mapper.required_coverage(&mappings).is_empty());

        let removed = mapper.remove_mapping(&mut mappings, "Price").unwrap();
        assert_eq!(removed.db_field.as_deref(), Some("price"));
        let missing: Vec<_> = mapper.required_coverage(&mappings).iter().map(|d| d.field).collect();
        assert_eq!(missing, vec!["price"]);
    }

    #[test]
    fn test_available_targets_disables_taken_fields() {
        let mapper = FieldMapper::new(Module::Products);
        let mappings = mapper.suggest_mappings(&headers(&["SKU", "Other"]));
        let options = mapper.available_targets(&mappings, "Other");
        let sku = options.iter().find(|o| o.field == "sku").unwrap();
        assert!(sku.disabled);

        // 自身占用的字段对自己可选
        let own = mapper.available_targets(&mappings, "SKU");
        assert!(!own.iter().find(|o| o.field == "sku").unwrap().disabled);
    }

    #[test]
    fn test_mappings_from_template() {
        let mapper = FieldMapper::new(Module::Products);
        let def = catalog::find_field(Module::Products, "sku").unwrap();
        let template = ImportTemplate::new(
            "Products",
            Module::Products,
            "owner",
            vec![
                FieldMapping::bound("Item", def),
                FieldMapping::bound("Missing Column", catalog::find_field(Module::Products, "name").unwrap()),
            ],
        );
        let mappings = mapper
            .mappings_from_template(&template, &headers(&["Item", "Extra"]))
            .unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].db_field.as_deref(), Some("sku"));
        assert_eq!(mappings[1].db_field, None);

        let other = FieldMapper::new(Module::Customers);
        assert!(matches!(
            other.mappings_from_template(&template, &headers(&["Item"])),
            Err(MappingError::ModuleMismatch { .. })
        ));
    }
}
