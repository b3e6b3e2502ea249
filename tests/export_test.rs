// ==========================================
// 导出集成测试
// ==========================================
// 覆盖: 导出 → 导入往返 / 格式化与转义 / 后台导出与过期清理
// ==========================================


use bulk_io::api::ApiError;
use bulk_io::config::config_keys;
use bulk_io::domain::{DateFormat, JobKind, JobStatus, Module};
use bulk_io::exporter::ExportOptions;
use bulk_io::repository::{RecordFilter, RecordStore};
use chrono::{Duration, Utc};
use serde_json::Value;
use test_helpers::{csv, request, set_config, sqlite_state, wait_for_terminal};

fn product_fields() -> Vec<String> {
    vec!["name".to_string(), "sku".to_string(), "price".to_string()]
}

async fn projected(store: &dyn RecordStore) -> Vec<Vec<Value>> {
    store
        .query(Module::Products, &product_fields(), None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| product_fields().iter().map(|f| r.fields[f].clone()).collect())
        .collect()
}

#[tokio::test]
async fn test_export_then_import_round_trip() {
    let (_src_tmp, source) = sqlite_state();
    let raw = csv(&[
        "SKU,Product Name,Price",
        "W-1,\"Widget, large\",1234.5",
        "G-1,Gadget,10",
        "S-1,\"Say \"\"hi\"\"\",0.99",
    ]);
    source
        .import_api
        .import_and_wait(request(Module::Products, raw, None))
        .await
        .unwrap();

    let options = source.export_api.default_options().await.unwrap();
    let output = source
        .export_api
        .export(Module::Products, &product_fields(), &options)
        .await
        .unwrap();
    assert_eq!(output.record_count, 3);

    let (_dst_tmp, target) = sqlite_state();
    let job = target
        .import_api
        .import_and_wait(request(Module::Products, output.bytes, None))
        .await
        .unwrap();
    assert_eq!(job.rows_imported, 3);
    assert!(job.errors.is_empty());

    assert_eq!(
        projected(source.store.as_ref()).await,
        projected(target.store.as_ref()).await
    );
}

#[tokio::test]
async fn test_exported_dates_reimport_with_matching_date_format() {
    let (_src_tmp, source) = sqlite_state();
    let raw = csv(&[
        "Order Number,Customer Email,Order Date,Total",
        "SO-7,a@x.com,2025-01-20,1500",
    ]);
    source
        .import_api
        .import_and_wait(request(Module::Orders, raw, None))
        .await
        .unwrap();

    let fields: Vec<String> = ["order_number", "customer_email", "order_date", "total"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let options = source.export_api.default_options().await.unwrap();
    assert_eq!(options.date_format, DateFormat::UsSlash);
    let output = source
        .export_api
        .export(Module::Orders, &fields, &options)
        .await
        .unwrap();

    // 导入默认按 YYYY-MM-DD 解析，导出默认为 MM/DD/YYYY
    let (_strict_tmp, strict) = sqlite_state();
    let err = strict
        .import_api
        .import_and_wait(request(Module::Orders, output.bytes.clone(), None))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationFailed(_)));

    let (_dst_tmp, target) = sqlite_state();
    set_config(&target, config_keys::IMPORT_DATE_FORMAT, DateFormat::UsSlash.as_str());
    let job = target
        .import_api
        .import_and_wait(request(Module::Orders, output.bytes, None))
        .await
        .unwrap();
    assert_eq!(job.rows_imported, 1);

    let records = target.store.query(Module::Orders, &fields, None).await.unwrap();
    assert_eq!(records[0].fields["order_date"], Value::from("2025-01-20"));
    assert_eq!(records[0].fields["total"], Value::from(1500));
}

#[tokio::test]
async fn test_export_formats_and_quotes_values() {
    let (_tmp, state) = sqlite_state();
    let raw = csv(&[
        "Order Number,Customer Email,Order Date,Total,Notes",
        "SO-1,a@x.com,2025-01-20,-1500,\"rush, fragile\"",
    ]);
    state
        .import_api
        .import_and_wait(request(Module::Orders, raw, None))
        .await
        .unwrap();

    let fields: Vec<String> = ["order_number", "order_date", "total", "notes", "status"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let output = state
        .export_api
        .export(Module::Orders, &fields, &ExportOptions::default())
        .await
        .unwrap();

    let text = String::from_utf8(output.bytes).unwrap();
    assert_eq!(
        text,
        "Order Number,Order Date,Total,Notes,Status\nSO-1,01/20/2025,\"-$1,500.00\",\"rush, fragile\",\n"
    );
}

#[tokio::test]
async fn test_export_respects_filter_and_options() {
    let (_tmp, state) = sqlite_state();
    let raw = csv(&["SKU,Product Name,Price,Category", "A-1,Apple,1,fruit", "B-1,Bolt,2,hardware"]);
    state
        .import_api
        .import_and_wait(request(Module::Products, raw, None))
        .await
        .unwrap();

    let options = ExportOptions {
        delimiter: b';',
        include_headers: false,
        filter: Some(RecordFilter::default().field_equals("category", "FRUIT")),
        date_format: DateFormat::IsoDate,
        currency_symbol: "€".to_string(),
    };
    let output = state
        .export_api
        .export(Module::Products, &product_fields(), &options)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(output.bytes).unwrap(), "Apple;A-1;€1.00\n");
}

#[tokio::test]
async fn test_background_export_writes_file_and_purges_after_expiry() {
    let (_tmp, state) = sqlite_state();
    let out_dir = tempfile::tempdir().unwrap();
    set_config(&state, config_keys::EXPORT_OUTPUT_DIR, &out_dir.path().to_string_lossy());
    state
        .import_api
        .import_and_wait(request(Module::Products, csv(&["SKU,Product Name,Price", "A-1,Apple,1"]), None))
        .await
        .unwrap();

    let job = state
        .export_api
        .submit_export(Module::Products, product_fields(), None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.expires_at > Utc::now() + Duration::hours(23));

    let done = match wait_for_terminal(&state, &job.id).await {
        JobKind::Export(job) => job,
        other => panic!("应为导出任务: {:?}", other),
    };
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.rows_exported, 1);
    let path = done.file_url.clone().unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "Product Name,SKU,Price\nApple,A-1,$1.00\n"
    );

    // 未过期时不清理
    assert_eq!(state.export_api.purge_expired_exports().unwrap(), 0);
    let purged = state
        .export_api
        .purge_exports_expired_at(done.expires_at + Duration::seconds(1))
        .unwrap();
    assert_eq!(purged, 1);
    assert!(!std::path::Path::new(&path).exists());

    let job = state.import_api.get_job(&job.id).unwrap().into_export().unwrap();
    assert!(job.file_url.is_none());
}
