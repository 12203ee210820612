/// Rollup behaviour of the error store
///
/// Run with: cargo test --test rollup_tests


use errorstore::{
    ErrorRecord, LogOutcome, MemoryProvider, PersistedError, PersistenceProvider, RollupEngine,
    StoreSettings,
};
use provider_utils::{occurrence, t};
use std::sync::Arc;
use uuid::Uuid;

fn store_with(settings: StoreSettings) -> (RollupEngine, Arc<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let engine = RollupEngine::with_provider(settings, provider.clone());
    (engine, provider)
}

#[tokio::test]
async fn test_duplicate_within_window_merges() {
    let (store, provider) = store_with(StoreSettings::new("memory"));

    let mut first = occurrence(0);
    store.log_error(&mut first).await.unwrap();
    let mut second = occurrence(120);
    store.log_error(&mut second).await.unwrap();

    assert_eq!(provider.len().await, 1);
    let stored = store.get_error(&first.guid).await.unwrap().unwrap();
    assert_eq!(stored.duplicate_count, 2);
    assert_eq!(stored.last_duplicate_date, Some(t(120)));
    assert!(second.is_duplicate);
    assert!(store.get_error(&second.guid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_gap_beyond_window_creates_new_record() {
    let (store, provider) = store_with(StoreSettings::new("memory").rollup_seconds(60));

    let mut first = occurrence(0);
    store.log_error(&mut first).await.unwrap();
    let mut second = occurrence(61);
    let outcome = store.log_error(&mut second).await.unwrap();

    assert!(matches!(outcome, LogOutcome::Created(_)));
    assert!(!second.is_duplicate);
    assert_eq!(provider.len().await, 2);
}

#[tokio::test]
async fn test_window_measured_from_creation_date() {
    let (store, _provider) = store_with(StoreSettings::new("memory").rollup_seconds(600));

    let mut a = occurrence(0);
    let outcome = store.log_error(&mut a).await.unwrap();
    assert_eq!(outcome.stored().unwrap().duplicate_count, 1);

    let mut b = occurrence(100);
    let outcome = store.log_error(&mut b).await.unwrap();
    match outcome {
        LogOutcome::Merged(record) => {
            assert_eq!(record.guid, a.guid);
            assert_eq!(record.duplicate_count, 2);
            assert_eq!(record.last_duplicate_date, Some(t(100)));
        }
        other => panic!("expected merge, got {:?}", other),
    }

    // 700s after the first occurrence: outside the window even though the
    // last duplicate was only 600s ago
    let mut c = occurrence(700);
    let outcome = store.log_error(&mut c).await.unwrap();
    match outcome {
        LogOutcome::Created(record) => {
            assert_eq!(record.guid, c.guid);
            assert_eq!(record.duplicate_count, 1);
        }
        other => panic!("expected new record, got {:?}", other),
    }

    let page = store.get_all_errors(Some("checkout")).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.errors[0].guid, c.guid);
    assert_eq!(page.errors[1].guid, a.guid);
    assert_eq!(store.get_error_count(None, Some("checkout")).await.unwrap(), 3);
}

#[tokio::test]
async fn test_window_measured_from_last_duplicate_date() {
    let (store, provider) = store_with(
        StoreSettings::new("memory")
            .rollup_seconds(600)
            .include_last_duplicate_date(true)
            .rollup_using_last_duplicate_date(true),
    );

    let mut a = occurrence(0);
    store.log_error(&mut a).await.unwrap();
    store.log_error(&mut occurrence(500)).await.unwrap();
    let mut c = occurrence(1000);
    let outcome = store.log_error(&mut c).await.unwrap();

    assert!(outcome.is_merged());
    assert!(c.is_duplicate);
    assert_eq!(provider.len().await, 1);
    let stored = store.get_error(&a.guid).await.unwrap().unwrap();
    assert_eq!(stored.duplicate_count, 3);
    assert_eq!(stored.last_duplicate_date, Some(t(1000)));
}

#[tokio::test]
async fn test_last_duplicate_mode_needs_include_flag() {
    let (store, provider) = store_with(
        StoreSettings::new("memory")
            .rollup_seconds(600)
            .rollup_using_last_duplicate_date(true),
    );

    store.log_error(&mut occurrence(0)).await.unwrap();
    store.log_error(&mut occurrence(500)).await.unwrap();
    store.log_error(&mut occurrence(1000)).await.unwrap();

    assert_eq!(provider.len().await, 2);
}

#[tokio::test]
async fn test_different_signatures_do_not_merge() {
    let (store, provider) = store_with(StoreSettings::new("memory"));

    store.log_error(&mut occurrence(0)).await.unwrap();

    let mut other_app = occurrence(1);
    other_app.application_name = "catalog".to_string();
    store.log_error(&mut other_app).await.unwrap();

    let mut other_type = occurrence(2);
    other_type.type_name = "System.IO.IOException".to_string();
    store.log_error(&mut other_type).await.unwrap();

    let mut other_message = occurrence(3);
    other_message.message = "payment gateway timed out after 30s".to_string();
    store.log_error(&mut other_message).await.unwrap();

    assert_eq!(provider.len().await, 3);
    assert!(other_message.is_duplicate);
}

#[tokio::test]
async fn test_protect_is_idempotent() {
    let (store, _provider) = store_with(StoreSettings::new("memory"));
    let mut error = occurrence(0);
    store.log_error(&mut error).await.unwrap();

    assert!(store.protect_error(&error.guid).await.unwrap());
    let once = store.get_error(&error.guid).await.unwrap().unwrap();
    assert!(store.protect_error(&error.guid).await.unwrap());
    let twice = store.get_error(&error.guid).await.unwrap().unwrap();

    assert!(twice.is_protected);
    assert_eq!(once, twice);
    assert!(!store.protect_error(&Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn test_delete_unknown_guid_leaves_others() {
    let (store, _provider) = store_with(StoreSettings::new("memory"));
    let mut error = occurrence(0);
    store.log_error(&mut error).await.unwrap();

    assert!(!store.delete_error(&Uuid::new_v4()).await.unwrap());
    let page = store.get_all_errors(None).await.unwrap();
    assert_eq!(page.total, 1);
    assert!(page.errors[0].deletion_date.is_none());
}

#[tokio::test]
async fn test_soft_delete_keeps_guid_and_blocks_rollup() {
    let (store, provider) = store_with(StoreSettings::new("memory"));
    let mut error = occurrence(0);
    store.log_error(&mut error).await.unwrap();

    assert!(store.delete_error(&error.guid).await.unwrap());
    assert!(!store.delete_error(&error.guid).await.unwrap());

    let deleted = store.get_error(&error.guid).await.unwrap().unwrap();
    assert!(deleted.deletion_date.is_some());
    assert_eq!(store.get_all_errors(None).await.unwrap().total, 0);

    // A recurrence does not resurrect the deleted record
    let mut again = occurrence(10);
    let outcome = store.log_error(&mut again).await.unwrap();
    assert!(matches!(outcome, LogOutcome::Created(_)));
    assert_eq!(provider.len().await, 2);
}

#[tokio::test]
async fn test_explicit_delete_of_protected_error() {
    let (store, _provider) = store_with(StoreSettings::new("memory"));
    let mut error = occurrence(0);
    store.log_error(&mut error).await.unwrap();
    store.protect_error(&error.guid).await.unwrap();

    assert!(!store.delete_all_errors(None).await.unwrap());
    assert_eq!(store.get_all_errors(None).await.unwrap().total, 1);

    assert!(store.delete_error(&error.guid).await.unwrap());
    assert_eq!(store.get_all_errors(None).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_delete_all_by_application() {
    let (store, _provider) = store_with(StoreSettings::new("memory"));
    store.log_error(&mut occurrence(0)).await.unwrap();
    let mut other = ErrorRecord::new("catalog", "NotFound", "sku missing").at(t(5));
    store.log_error(&mut other).await.unwrap();

    assert!(store.delete_all_errors(Some("checkout")).await.unwrap());
    let remaining = store.get_all_errors(None).await.unwrap();
    assert_eq!(remaining.total, 1);
    assert_eq!(remaining.errors[0].guid, other.guid);
}

#[tokio::test]
async fn test_error_count_since() {
    let (store, _provider) = store_with(StoreSettings::new("memory").rollup_seconds(60));
    store.log_error(&mut occurrence(0)).await.unwrap();
    store.log_error(&mut occurrence(30)).await.unwrap();
    store.log_error(&mut occurrence(200)).await.unwrap();

    assert_eq!(store.get_error_count(None, None).await.unwrap(), 3);
    assert_eq!(store.get_error_count(Some(t(100)), None).await.unwrap(), 1);
    assert_eq!(store.get_error_count(None, Some("nobody")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cull_spares_protected_errors() {
    let (store, provider) = store_with(StoreSettings::new("memory"));
    let mut protected = occurrence(0);
    store.log_error(&mut protected).await.unwrap();
    store.protect_error(&protected.guid).await.unwrap();

    let mut stale = ErrorRecord::new("catalog", "NotFound", "sku missing").at(t(10));
    store.log_error(&mut stale).await.unwrap();
    let mut fresh = ErrorRecord::new("search", "Timeout", "slow").at(t(5000));
    store.log_error(&mut fresh).await.unwrap();

    assert_eq!(store.cull_errors(t(1000)).await.unwrap(), 1);
    assert_eq!(provider.len().await, 2);
    assert!(store.get_error(&protected.guid).await.unwrap().is_some());
    assert!(store.get_error(&stale.guid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreadable_record_does_not_abort_listing() {
    let (store, provider) = store_with(StoreSettings::new("memory"));
    let mut good = occurrence(0);
    store.log_error(&mut good).await.unwrap();

    let mut broken = PersistedError::from_record(
        &ErrorRecord::new("checkout", "Broken", "corrupt").at(t(10)),
    )
    .unwrap();
    broken.full_json = "{\"guid\": 12".to_string();
    let broken_guid = broken.guid;
    provider.insert_error(broken).await.unwrap();

    let page = store.get_all_errors(None).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.errors.len(), 1);
    assert_eq!(page.errors[0].guid, good.guid);
    assert_eq!(page.unreadable, vec![broken_guid]);

    assert!(store.get_error(&broken_guid).await.is_err());
}

#[tokio::test]
async fn test_payload_passes_through_unchanged() {
    let (store, _provider) = store_with(StoreSettings::new("memory"));
    let mut error = occurrence(0)
        .url("https://shop.example/checkout")
        .source("Checkout.dll")
        .custom_data("cart", "a1b2");
    store.log_error(&mut error).await.unwrap();

    let stored = store.get_error(&error.guid).await.unwrap().unwrap();
    assert_eq!(stored, error);
}
