// ==========================================
// 批量导入导出管道 - 模块字段目录
// ==========================================
// 职责: 每个业务模块的规范字段定义 + 自然键
// 约束: 字段顺序即自动匹配的优先顺序（先定义者先命中）
//       patterns 必须为小写
// ==========================================

use crate::domain::field::FieldDefinition;
use crate::domain::types::{DataType, Module};

const EMAIL_PATTERNS: &[&str] = &["email", "e-mail", "mail"];
const PHONE_PATTERNS: &[&str] = &["phone", "tel", "mobile", "cell"];
const PAYMENT_TERMS: &[&str] = &["due_on_receipt", "net_15", "net_30", "net_60"];

const fn text(
    field: &'static str,
    label: &'static str,
    max_length: usize,
    patterns: &'static [&'static str],
) -> FieldDefinition {
    FieldDefinition {
        field,
        label,
        required: false,
        data_type: DataType::String,
        max_length: Some(max_length),
        valid_values: None,
        default_value: None,
        patterns,
    }
}

const fn typed(
    field: &'static str,
    label: &'static str,
    data_type: DataType,
    patterns: &'static [&'static str],
) -> FieldDefinition {
    FieldDefinition {
        field,
        label,
        required: false,
        data_type,
        max_length: None,
        valid_values: None,
        default_value: None,
        patterns,
    }
}

const fn email(field: &'static str, label: &'static str) -> FieldDefinition {
    let mut definition = typed(field, label, DataType::Email, EMAIL_PATTERNS);
    definition.max_length = Some(255);
    definition
}

const fn required(mut definition: FieldDefinition) -> FieldDefinition {
    definition.required = true;
    definition
}

const fn one_of(
    mut definition: FieldDefinition,
    values: &'static [&'static str],
    default_value: &'static str,
) -> FieldDefinition {
    definition.valid_values = Some(values);
    definition.default_value = Some(default_value);
    definition
}

const fn defaulting(mut definition: FieldDefinition, default_value: &'static str) -> FieldDefinition {
    definition.default_value = Some(default_value);
    definition
}

// ===== customers =====
static CUSTOMER_FIELDS: &[FieldDefinition] = &[
    required(text(
        "company_name",
        "Company Name",
        255,
        &["company", "business", "organization", "organisation", "customer name", "account name"],
    )),
    text("contact_name", "Contact Name", 100, &["contact", "first name", "full name", "person"]),
    email("email", "Email"),
    typed("phone", "Phone", DataType::Phone, PHONE_PATTERNS),
    text("address", "Address", 255, &["address", "street"]),
    text("city", "City", 100, &["city", "town"]),
    text("state", "State", 100, &["state", "province", "region"]),
    text("postal_code", "Postal Code", 20, &["zip", "postal", "postcode"]),
    defaulting(text("country", "Country", 100, &["country"]), "US"),
    typed("credit_limit", "Credit Limit", DataType::Currency, &["credit"]),
    one_of(text("payment_terms", "Payment Terms", 20, &["terms"]), PAYMENT_TERMS, "net_30"),
    defaulting(typed("is_active", "Active", DataType::Boolean, &["active", "enabled"]), "true"),
    text("notes", "Notes", 2000, &["note", "comment", "memo"]),
];

// ===== vendors =====
static VENDOR_FIELDS: &[FieldDefinition] = &[
    required(text(
        "vendor_name",
        "Vendor Name",
        255,
        &["vendor", "supplier", "company", "business"],
    )),
    text("contact_name", "Contact Name", 100, &["contact", "full name", "person"]),
    email("email", "Email"),
    typed("phone", "Phone", DataType::Phone, PHONE_PATTERNS),
    text("address", "Address", 255, &["address", "street"]),
    text("city", "City", 100, &["city", "town"]),
    text("state", "State", 100, &["state", "province", "region"]),
    text("postal_code", "Postal Code", 20, &["zip", "postal", "postcode"]),
    defaulting(text("country", "Country", 100, &["country"]), "US"),
    text("tax_id", "Tax ID", 50, &["tax", "ein", "vat"]),
    one_of(text("payment_terms", "Payment Terms", 20, &["terms"]), PAYMENT_TERMS, "net_30"),
    defaulting(typed("is_active", "Active", DataType::Boolean, &["active", "enabled"]), "true"),
    text("notes", "Notes", 2000, &["note", "comment", "memo"]),
];

// ===== products =====
static PRODUCT_FIELDS: &[FieldDefinition] = &[
    required(text("sku", "SKU", 64, &["sku", "item code", "product code", "part number"])),
    text("description", "Description", 2000, &["description", "desc", "details"]),
    required(text("name", "Product Name", 255, &["name", "product", "item", "title"])),
    text("category", "Category", 100, &["category", "group", "type"]),
    typed("cost", "Cost", DataType::Currency, &["cost"]),
    required(typed("price", "Price", DataType::Currency, &["price", "rate", "msrp"])),
    one_of(
        text("unit", "Unit", 20, &["unit", "uom"]),
        &["each", "box", "case", "kg", "lb"],
        "each",
    ),
    defaulting(typed("is_active", "Active", DataType::Boolean, &["active", "enabled"]), "true"),
];

// ===== inventory =====
static INVENTORY_FIELDS: &[FieldDefinition] = &[
    required(text("sku", "SKU", 64, &["sku", "item code", "product code", "part"])),
    required(text("location", "Location", 100, &["location", "warehouse", "bin", "site"])),
    typed("reorder_point", "Reorder Point", DataType::Number, &["reorder", "minimum"]),
    required(typed("quantity", "Quantity", DataType::Number, &["qty", "quantity", "on hand", "stock"])),
    typed("unit_cost", "Unit Cost", DataType::Currency, &["cost"]),
    typed("last_counted", "Last Counted", DataType::Date, &["counted", "count date", "last count"]),
];

// ===== orders =====
static ORDER_FIELDS: &[FieldDefinition] = &[
    required(text(
        "order_number",
        "Order Number",
        50,
        &["order number", "order no", "order #", "order id", "order_number"],
    )),
    required(email("customer_email", "Customer Email")),
    text("customer_name", "Customer Name", 255, &["customer", "client", "bill to"]),
    typed("ship_date", "Ship Date", DataType::Date, &["ship"]),
    required(typed("order_date", "Order Date", DataType::Date, &["order date", "date", "placed"])),
    one_of(
        text("status", "Status", 20, &["status", "state"]),
        &["pending", "processing", "shipped", "delivered", "cancelled"],
        "pending",
    ),
    required(typed("total", "Total", DataType::Currency, &["total", "amount", "grand"])),
    text("notes", "Notes", 2000, &["note", "comment", "memo"]),
];

// ===== estimates =====
static ESTIMATE_FIELDS: &[FieldDefinition] = &[
    required(text(
        "estimate_number",
        "Estimate Number",
        50,
        &["estimate number", "estimate no", "estimate #", "estimate id", "quote number", "quote #"],
    )),
    email("customer_email", "Customer Email"),
    text("customer_name", "Customer Name", 255, &["customer", "client"]),
    typed("expiry_date", "Expiry Date", DataType::Date, &["expir", "valid until"]),
    required(typed("issue_date", "Issue Date", DataType::Date, &["issue", "date"])),
    one_of(
        text("status", "Status", 20, &["status", "state"]),
        &["draft", "sent", "accepted", "declined", "expired"],
        "draft",
    ),
    required(typed("total", "Total", DataType::Currency, &["total", "amount"])),
    text("notes", "Notes", 2000, &["note", "comment", "memo"]),
];

/// 模块的规范字段（目录顺序）
pub fn fields(module: Module) -> &'static [FieldDefinition] {
    match module {
        Module::Customers => CUSTOMER_FIELDS,
        Module::Vendors => VENDOR_FIELDS,
        Module::Products => PRODUCT_FIELDS,
        Module::Inventory => INVENTORY_FIELDS,
        Module::Orders => ORDER_FIELDS,
        Module::Estimates => ESTIMATE_FIELDS,
    }
}

pub fn find_field(module: Module, field: &str) -> Option<&'static FieldDefinition> {
    fields(module).iter().find(|d| d.field == field)
}

pub fn required_fields(module: Module) -> impl Iterator<Item = &'static FieldDefinition> {
    fields(module).iter().filter(|d| d.required)
}

/// 自然键字段（用于重复记录判定）
pub fn natural_key_fields(module: Module) -> &'static [&'static str] {
    match module {
        Module::Customers => &["email"],
        Module::Vendors => &["vendor_name"],
        Module::Products => &["sku"],
        Module::Inventory => &["sku", "location"],
        Module::Orders => &["order_number"],
        Module::Estimates => &["estimate_number"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_fields_are_unique_per_module() {
        for module in Module::ALL {
            let mut seen = HashSet::new();
            for def in fields(module) {
                assert!(seen.insert(def.field), "{} 重复字段 {}", module, def.field);
            }
        }
    }

    #[test]
    fn test_natural_key_fields_exist_in_catalog() {
        for module in Module::ALL {
            for key in natural_key_fields(module) {
                assert!(find_field(module, key).is_some(), "{} 缺少自然键 {}", module, key);
            }
        }
    }

    #[test]
    fn test_patterns_are_lowercase() {
        for module in Module::ALL {
            for def in fields(module) {
                for p in def.patterns {
                    assert_eq!(*p, p.to_lowercase());
                }
            }
        }
    }

    #[test]
    fn test_defaults_are_valid_values() {
        for module in Module::ALL {
            for def in fields(module) {
                if let (Some(values), Some(default)) = (def.valid_values, def.default_value) {
                    assert!(values.contains(&default));
                }
            }
        }
    }

    #[test]
    fn test_customers_require_company_name() {
        let required: Vec<_> = required_fields(Module::Customers).map(|d| d.field).collect();
        assert_eq!(required, vec!["company_name"]);
    }
}
