// ==========================================
// 回滚集成测试
// ==========================================


use bulk_io::domain::{DuplicateHandling, JobStatus, Module};
use bulk_io::importer::{NotEligibleReason, RollbackError};
use bulk_io::repository::{MemoryRecordStore, RecordStore};
use serde_json::json;
use test_helpers::{csv, memory_state, memory_state_with, request, sqlite_state};

fn products() -> Vec<u8> {
    csv(&["SKU,Product Name,Price", "W-1,Widget,10", "G-1,Gadget,12.5"])
}

#[tokio::test]
async fn test_rollback_removes_inserted_records_once() {
    let (_tmp, state) = sqlite_state();
    let job = state
        .import_api
        .import_and_wait(request(Module::Products, products(), None))
        .await
        .unwrap();
    assert!(job.can_rollback);

    let rolled = state.import_api.rollback(&job.id).await.unwrap();
    assert_eq!(rolled.status, JobStatus::RolledBack);
    assert!(rolled.rolled_back);
    assert!(rolled.rolled_back_at.is_some());
    assert!(!rolled.can_rollback);
    assert!(state.store.query(Module::Products, &[], None).await.unwrap().is_empty());

    // 再次回滚: 不可回滚，数据不变
    let err = state.import_api.rollback(&job.id).await.unwrap_err();
    assert!(matches!(
        err,
        RollbackError::NotEligible {
            reason: NotEligibleReason::AlreadyRolledBack,
            ..
        }
    ));
}

#[tokio::test]
async fn test_rollback_keeps_records_that_existed_before() {
    let (_tmp, state, store) = memory_state();
    state
        .import_api
        .import_and_wait(request(Module::Products, csv(&["SKU,Product Name,Price", "W-1,Widget,10"]), None))
        .await
        .unwrap();

    // 第二次导入: W-1 被更新，N-1 为新增
    let second = state
        .import_api
        .import_and_wait(request(
            Module::Products,
            csv(&["SKU,Product Name,Price", "W-1,Widget Pro,11", "N-1,New,3"]),
            Some(DuplicateHandling::Update),
        ))
        .await
        .unwrap();
    assert_eq!(second.rows_inserted, 1);

    state.import_api.rollback(&second.id).await.unwrap();
    let remaining = store.snapshot(Module::Products);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].fields["sku"], json!("W-1"));
}

#[tokio::test]
async fn test_rollback_reports_records_modified_after_import() {
    let (_tmp, state, store) = memory_state();
    let job = state
        .import_api
        .import_and_wait(request(Module::Products, products(), None))
        .await
        .unwrap();

    // 另一次导入修改了 W-1
    state
        .import_api
        .import_and_wait(request(
            Module::Products,
            csv(&["SKU,Product Name,Price", "W-1,Widget v2,10"]),
            Some(DuplicateHandling::Update),
        ))
        .await
        .unwrap();

    let err = state.import_api.rollback(&job.id).await.unwrap_err();
    match err {
        RollbackError::Partial {
            deleted,
            missing,
            modified_ids,
            ..
        } => {
            assert_eq!(deleted, 2);
            assert_eq!(missing, 0);
            assert_eq!(modified_ids.len(), 1);
        }
        other => panic!("应为部分回滚: {:?}", other),
    }
    assert!(store.snapshot(Module::Products).is_empty());

    let job = state.import_api.get_job(&job.id).unwrap().into_import().unwrap();
    assert_eq!(job.status, JobStatus::RolledBack);
}

#[tokio::test]
async fn test_rows_updated_within_the_same_job_roll_back_cleanly() {
    let (_tmp, state) = sqlite_state();
    let raw = csv(&["SKU,Product Name,Price", "W-1,Widget,10", "w-1,Widget v2,11"]);
    let job = state
        .import_api
        .import_and_wait(request(Module::Products, raw, Some(DuplicateHandling::Update)))
        .await
        .unwrap();
    assert_eq!(job.rows_inserted, 1);
    assert_eq!(job.rows_imported, 2);

    let rolled = state.import_api.rollback(&job.id).await.unwrap();
    assert_eq!(rolled.status, JobStatus::RolledBack);
    assert!(state.store.query(Module::Products, &[], None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_without_job_tags_cannot_roll_back() {
    let (_tmp, state, _store) = memory_state_with(MemoryRecordStore::without_job_tags());
    let job = state
        .import_api
        .import_and_wait(request(Module::Products, products(), None))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.can_rollback);

    let err = state.import_api.rollback(&job.id).await.unwrap_err();
    assert!(matches!(
        err,
        RollbackError::NotEligible {
            reason: NotEligibleReason::NothingToRollBack,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (_tmp, state) = sqlite_state();
    let err = state.import_api.rollback("missing").await.unwrap_err();
    assert!(matches!(err, RollbackError::NotFound(_)));
}
