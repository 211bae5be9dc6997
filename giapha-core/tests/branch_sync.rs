//! Branch selection, seeding, merged view and degraded fallback, driven
//! through the in-memory gateway.

mod common;

use common::*;
use giapha_core::{BranchKey, InMemoryGateway, StoreError};
use std::sync::Arc;
use std::time::Duration;

// ===========================================================================
// TEST 1: empty default branch is seeded with one atomic batch
// ===========================================================================
#[tokio::test]
async fn test_start_seeds_empty_default_branch_once() {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = build_store(gateway.clone());
    store.start().await.unwrap();

    assert_eq!(gateway.counts().batches, 1, "seeding must be a single batch");
    assert_eq!(gateway.records(&chung()).len(), 3);
    // The subscription reproduces the uploaded dataset.
    let ids: Vec<String> = store.all_people().ids().map(String::from).collect();
    assert_eq!(ids, vec!["doi1-to", "doi2-an", "doi2-binh"]);
    assert!(!store.is_degraded());
    // Only the selected branch is seeded.
    assert!(gateway.records(&nganh2()).is_empty());
}

// ===========================================================================
// TEST 2: non-empty branch is left alone
// ===========================================================================
#[tokio::test]
async fn test_start_skips_seeding_populated_branch() {
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.preload(&chung(), vec![person("doi1-to", "Đỗ Văn Tổ", 1)]);
    let store = build_store(gateway.clone());
    store.start().await.unwrap();

    assert_eq!(gateway.counts().batches, 0);
    assert_eq!(store.all_people().len(), 1);
}

// ===========================================================================
// TEST 3: concurrent selections of an empty branch seed it once
// ===========================================================================
#[tokio::test]
async fn test_concurrent_selection_seeds_once() {
    let gateway = Arc::new(InMemoryGateway::with_latency(Duration::from_millis(20)));
    let store = build_store(gateway.clone());

    let (branch_a, branch_b) = (chung(), chung());
    let (a, b) = tokio::join!(store.select_branch(&branch_a), store.select_branch(&branch_b));
    a.unwrap();
    b.unwrap();

    assert_eq!(gateway.counts().batches, 1);
    assert!(eventually(|| store.all_people().len() == 3).await);
}

// ===========================================================================
// TEST 4: switching releases the previous branch subscription
// ===========================================================================
#[tokio::test]
async fn test_switch_releases_previous_subscription() {
    let (gateway, store) = started().await;
    // One feed for the merged view plus the current-branch feed.
    assert!(eventually(|| gateway.subscriber_count(&chung()) == 2).await);

    store.select_branch(&nganh2()).await.unwrap();

    assert!(eventually(|| gateway.subscriber_count(&chung()) == 1).await);
    assert!(eventually(|| gateway.subscriber_count(&nganh2()) == 2).await);
    assert_eq!(store.current_branch(), nganh2());
    assert_eq!(*store.watch_branch().borrow(), nganh2());
    let ids: Vec<String> = store.all_people().ids().map(String::from).collect();
    assert_eq!(ids, vec!["doi19-goc", "n2c2-doi20-truong"]);
}

// ===========================================================================
// TEST 5: fire-and-forget switch validates the key
// ===========================================================================
#[tokio::test]
async fn test_switch_to_unknown_branch_is_rejected() {
    let (_gateway, store) = started().await;
    let err = store
        .switch_branch(&BranchKey::new("nganh9"))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownBranch(_)));

    store.switch_branch(&nganh2()).unwrap();
    assert!(eventually(|| store.current_branch() == nganh2() && store.all_people().len() == 2).await);
}

// ===========================================================================
// TEST 6: seeded id resolves to its home copy whatever the emission order
// ===========================================================================
async fn merged_name_after(first_chung: bool) -> String {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = build_store(gateway.clone());
    gateway.preload(&chung(), chung_seed());
    store.start().await.unwrap();

    let stray = person("doi19-goc", "stray copy", 19);
    let home = person("doi19-goc", "home copy", 19);
    if first_chung {
        gateway.preload(&chung(), vec![stray]);
        gateway.preload(&nganh2(), vec![home]);
    } else {
        gateway.preload(&nganh2(), vec![home]);
        gateway.preload(&chung(), vec![stray]);
    }
    assert!(eventually(|| store.merged_people().len() == 4
        && store.branch_statuses().iter().all(|s| s.live))
    .await);
    assert!(eventually(|| store
        .merged_people()
        .get("doi19-goc")
        .is_some_and(|p| p.name == "home copy"))
    .await);
    store.merged_people().get("doi19-goc").unwrap().name.clone()
}

#[tokio::test]
async fn test_merge_dedup_is_order_independent_for_seeded_ids() {
    assert_eq!(merged_name_after(true).await, "home copy");
    assert_eq!(merged_name_after(false).await, "home copy");
}

// ===========================================================================
// TEST 7: unprefixed runtime id present in two branches
// ===========================================================================
#[tokio::test]
async fn test_runtime_id_in_two_branches_keeps_last_declared_branch() {
    // Ownership cannot place `doi7-lan`; the later branch in declaration
    // order wins the merge.
    let (gateway, store) = started().await;
    gateway.preload(&chung(), vec![person("doi7-lan", "from chung", 7)]);
    gateway.preload(&nganh2(), vec![person("doi7-lan", "from nganh2", 7)]);

    assert!(eventually(|| store
        .merged_people()
        .get("doi7-lan")
        .is_some_and(|p| p.name == "from nganh2"))
    .await);
}

// ===========================================================================
// TEST 8: unreachable branch serves seed data and recovers
// ===========================================================================
#[tokio::test]
async fn test_unreachable_branch_degrades_to_seed_and_recovers() {
    let gateway = Arc::new(InMemoryGateway::new());
    let mut records = chung_seed();
    records.push(person("doi2-cuong", "Đỗ Văn Cường", 2));
    gateway.preload(&chung(), records);
    gateway.set_offline(&chung(), true);

    let store = build_store(gateway.clone());
    store.start().await.unwrap();

    assert!(store.is_degraded());
    assert_eq!(store.all_people().len(), 3, "seed data while offline");
    let chung_status = || {
        store
            .branch_statuses()
            .into_iter()
            .find(|s| s.key == chung())
            .unwrap()
    };
    assert!(eventually(|| {
        let status = chung_status();
        status.degraded && status.last_error.is_some()
    })
    .await);

    gateway.set_offline(&chung(), false);

    assert!(eventually(|| !store.is_degraded() && store.all_people().contains("doi2-cuong")).await);
    assert!(eventually(|| store.merged_people().contains("doi2-cuong")).await);
    let status = chung_status();
    assert!(!status.degraded);
    assert!(status.live);
    assert!(status.last_error.is_none());
}

// ===========================================================================
// TEST 9: a failing subscription after start falls back, then recovers
// ===========================================================================
#[tokio::test]
async fn test_subscription_error_falls_back_until_next_emission() {
    let (gateway, store) = started().await;
    gateway.preload(&chung(), vec![person("doi2-cuong", "Đỗ Văn Cường", 2)]);
    assert!(eventually(|| store.all_people().len() == 4).await);

    gateway.emit_error(&chung(), "connection reset");
    assert!(eventually(|| store.is_degraded() && store.all_people().len() == 3).await);

    gateway.preload(&chung(), vec![person("doi2-dung", "Đỗ Văn Dũng", 2)]);
    assert!(eventually(|| !store.is_degraded() && store.all_people().len() == 5).await);
}

// ===========================================================================
// TEST 10: change feeds publish replacements
// ===========================================================================
#[tokio::test]
async fn test_watch_people_sees_remote_changes() {
    let (gateway, store) = started().await;
    let mut rx = store.watch_people();
    rx.borrow_and_update();

    gateway.preload(&chung(), vec![person("doi3-em", "Đỗ Thị Em", 3)]);
    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("change published")
        .unwrap();
    assert!(rx.borrow().contains("doi3-em"));
}

// ===========================================================================
// TEST 11: dropping the last store handle stops its feeds
// ===========================================================================
#[tokio::test]
async fn test_dropping_store_releases_subscriptions() {
    let (gateway, store) = started().await;
    assert!(eventually(|| gateway.subscriber_count(&chung()) == 2).await);
    drop(store);
    assert!(eventually(|| gateway.subscriber_count(&chung()) == 0
        && gateway.subscriber_count(&nganh2()) == 0)
    .await);
}
