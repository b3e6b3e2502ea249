// ==========================================
// 导入管道端到端测试
// ==========================================
// 覆盖: 校验拦截 / 重复处理策略 / 部分失败 / 致命错误 / 后台执行
// ==========================================


use bulk_io::api::{ApiError, ImportOptions};
use bulk_io::config::config_keys;
use bulk_io::domain::{DuplicateHandling, JobKind, JobStatus, Module, Severity};
use bulk_io::repository::RecordStore;
use serde_json::json;
use std::path::PathBuf;
use test_helpers::{csv, memory_state, request, sqlite_state, set_config, wait_for_terminal};

fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from("tests/fixtures/datasets").join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("无法读取 {:?}: {}", path, e))
}

// ==========================================
// 校验
// ==========================================

#[tokio::test]
async fn test_bad_email_is_reported_and_import_refused() {
    let (_tmp, state, store) = memory_state();
    let raw = fixture("customers_bad_email.csv");

    let result = state
        .import_api
        .validate(&raw, Vec::new(), Module::Customers, &ImportOptions::default())
        .await
        .unwrap();

    assert!(!result.is_valid);
    let errors: Vec<_> = result.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row, Some(2));
    assert_eq!(errors[0].column, "Email");
    assert_eq!(errors[0].severity, Severity::Error);

    let err = state
        .import_api
        .import_and_wait(request(Module::Customers, raw, None))
        .await
        .unwrap_err();
    match err {
        ApiError::ValidationFailed(result) => assert_eq!(result.error_count(), 1),
        other => panic!("应当拒绝导入: {:?}", other),
    }
    assert_eq!(store.write_count(), 0);
    assert!(state.import_api.list_jobs(None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_is_idempotent() {
    let (_tmp, state, _store) = memory_state();
    let raw = fixture("customers_bad_email.csv");
    let options = ImportOptions::default();

    let first = state
        .import_api
        .validate(&raw, Vec::new(), Module::Customers, &options)
        .await
        .unwrap();
    let second = state
        .import_api
        .validate(&raw, Vec::new(), Module::Customers, &options)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unmapped_required_field_blocks_import() {
    let (_tmp, state, _store) = memory_state();
    // 只有 Email 列，company_name 无法映射
    let raw = csv(&["Email", "a@x.com"]);

    let result = state
        .import_api
        .validate(&raw, Vec::new(), Module::Customers, &ImportOptions::default())
        .await
        .unwrap();
    assert!(!result.is_valid);
    assert!(result
        .errors()
        .any(|issue| issue.row.is_none() && issue.column == "company_name"));
}

#[tokio::test]
async fn test_preview_suggests_mappings() {
    let (_tmp, state, _store) = memory_state();
    let preview = state
        .import_api
        .preview(&fixture("customers_valid.csv"), Module::Customers, &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(preview.delimiter, ',');
    assert_eq!(preview.row_count, 3);
    let targets: Vec<Option<&str>> = preview.mappings.iter().map(|m| m.db_field.as_deref()).collect();
    assert_eq!(
        targets,
        vec![
            Some("company_name"),
            Some("contact_name"),
            Some("email"),
            Some("credit_limit"),
            Some("payment_terms"),
        ]
    );
    assert!(preview.missing_required.is_empty());
}

// ==========================================
// 重复处理策略
// ==========================================

#[tokio::test]
async fn test_valid_file_imports_every_row() {
    let (_tmp, state, store) = memory_state();
    let job = state
        .import_api
        .import_and_wait(request(Module::Customers, fixture("customers_valid.csv"), None))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.rows_processed, 3);
    assert_eq!(job.rows_imported, 3);
    assert!(job.counters_balanced());
    assert!(job.can_rollback);

    let records = store.snapshot(Module::Customers);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].fields["credit_limit"], json!(5000));
    assert_eq!(records[0].fields["payment_terms"], json!("net_30"));
    assert_eq!(records[2].fields["company_name"], json!("Gamma, Inc"));
}

#[tokio::test]
async fn test_skip_policy_leaves_existing_record() {
    let (_tmp, state, store) = memory_state();
    let first = csv(&["Company Name,Email", "Acme,a@x.com"]);
    state
        .import_api
        .import_and_wait(request(Module::Customers, first, None))
        .await
        .unwrap();

    let again = csv(&["Company Name,Email", "Acme Renamed,A@X.com"]);
    let job = state
        .import_api
        .import_and_wait(request(Module::Customers, again, Some(DuplicateHandling::Skip)))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.rows_imported, 0);
    assert_eq!(job.rows_skipped, 1);
    assert!(!job.can_rollback);
    assert!(job.warnings.iter().any(|w| w.row == 1));

    let records = store.snapshot(Module::Customers);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields["company_name"], json!("Acme"));
}

#[tokio::test]
async fn test_update_policy_overwrites_mapped_fields() {
    let (_tmp, state, store) = memory_state();
    let first = csv(&["Company Name,Email,Contact", "Acme,a@x.com,Ann"]);
    state
        .import_api
        .import_and_wait(request(Module::Customers, first, None))
        .await
        .unwrap();

    let again = csv(&["Company Name,Email,Contact", "Acme Corp,a@x.com,"]);
    let job = state
        .import_api
        .import_and_wait(request(Module::Customers, again, Some(DuplicateHandling::Update)))
        .await
        .unwrap();

    assert_eq!(job.rows_imported, 1);
    assert_eq!(job.rows_inserted, 0);
    let records = store.snapshot(Module::Customers);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields["company_name"], json!("Acme Corp"));
    assert!(records[0].fields["contact_name"].is_null());
    assert_eq!(records[0].revision, 2);
}

#[tokio::test]
async fn test_merge_policy_keeps_existing_values_for_blank_cells() {
    let (_tmp, state, store) = memory_state();
    let first = csv(&["Company Name,Email,Contact", "Acme,a@x.com,Ann"]);
    state
        .import_api
        .import_and_wait(request(Module::Customers, first, None))
        .await
        .unwrap();

    let again = csv(&["Company Name,Email,Contact", "Acme Corp,a@x.com,"]);
    let job = state
        .import_api
        .import_and_wait(request(Module::Customers, again, Some(DuplicateHandling::Merge)))
        .await
        .unwrap();

    assert_eq!(job.rows_imported, 1);
    let records = store.snapshot(Module::Customers);
    assert_eq!(records[0].fields["company_name"], json!("Acme Corp"));
    assert_eq!(records[0].fields["contact_name"], json!("Ann"));
}

#[tokio::test]
async fn test_create_new_policy_inserts_duplicates() {
    let (_tmp, state, store) = memory_state();
    let raw = csv(&["Company Name,Email", "Acme,a@x.com"]);
    state
        .import_api
        .import_and_wait(request(Module::Customers, raw.clone(), None))
        .await
        .unwrap();
    let job = state
        .import_api
        .import_and_wait(request(Module::Customers, raw, Some(DuplicateHandling::CreateNew)))
        .await
        .unwrap();

    assert_eq!(job.rows_inserted, 1);
    assert_eq!(store.snapshot(Module::Customers).len(), 2);
}

#[tokio::test]
async fn test_in_file_duplicates_follow_policy() {
    let (_tmp, state, store) = memory_state();
    let raw = csv(&["SKU,Product Name,Price", "W-1,Widget,10", "w-1,Widget v2,12"]);
    let job = state
        .import_api
        .import_and_wait(request(Module::Products, raw, Some(DuplicateHandling::Skip)))
        .await
        .unwrap();

    assert_eq!(job.rows_imported, 1);
    assert_eq!(job.rows_skipped, 1);
    let records = store.snapshot(Module::Products);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields["name"], json!("Widget"));
}

// ==========================================
// 失败处理
// ==========================================

#[tokio::test]
async fn test_row_level_store_error_gives_partial_completion() {
    let (_tmp, state, store) = memory_state();
    store.reject_value("sku", json!("BAD-1"));
    let raw = csv(&[
        "SKU,Product Name,Price",
        "W-1,Widget,10",
        "BAD-1,Broken,5",
        "G-1,Gadget,7.5",
    ]);

    let job = state
        .import_api
        .import_and_wait(request(Module::Products, raw, None))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.rows_imported, 2);
    assert_eq!(job.rows_failed, 1);
    assert!(job.counters_balanced());
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].row, 2);
}

#[tokio::test]
async fn test_every_row_failing_marks_job_failed() {
    let (_tmp, state, store) = memory_state();
    store.reject_value("category", json!("banned"));
    let raw = csv(&[
        "SKU,Product Name,Price,Category",
        "A-1,Apple,1,banned",
        "B-1,Banana,2,banned",
    ]);

    let job = state
        .import_api
        .import_and_wait(request(Module::Products, raw, None))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.rows_failed, 2);
    assert!(!job.can_rollback);
}

#[tokio::test]
async fn test_unavailable_store_stops_import() {
    let (_tmp, state, store) = memory_state();
    set_config(&state, config_keys::IMPORT_BATCH_SIZE, "1");
    set_config(&state, config_keys::IMPORT_WORKER_COUNT, "1");
    store.fail_after_writes(1);
    let raw = csv(&[
        "SKU,Product Name,Price",
        "A-1,Apple,1",
        "B-1,Banana,2",
        "C-1,Cherry,3",
    ]);

    let err = state
        .import_api
        .import_and_wait(request(Module::Products, raw, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ImportFailed(_)));

    let jobs = state.import_api.list_jobs(None, 10).unwrap();
    let job = jobs[0].clone().into_import().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.rows_imported, 1);
    assert_eq!(job.rows_processed, 1);
    assert!(job.errors.iter().any(|e| e.row == 0));
    assert_eq!(store.snapshot(Module::Products).len(), 1);
}

// ==========================================
// 后台执行
// ==========================================

#[tokio::test]
async fn test_submit_import_runs_in_background() {
    let (_tmp, state) = sqlite_state();
    let job = state
        .import_api
        .submit_import(request(Module::Customers, fixture("customers_valid.csv"), None))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.total_rows, 3);

    let done = match wait_for_terminal(&state, &job.id).await {
        JobKind::Import(job) => job,
        other => panic!("应为导入任务: {:?}", other),
    };
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.rows_imported, 3);
    assert!((done.progress() - 1.0).abs() < f64::EPSILON);

    let records = state.store.query(Module::Customers, &[], None).await.unwrap();
    assert_eq!(records.len(), 3);
}
