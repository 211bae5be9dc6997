#![allow(dead_code)]

use giapha_core::{
    BranchInfo, BranchKey, GraphStore, InMemoryGateway, Person, StaticSeedProvider, StoreOptions,
};
use std::sync::Arc;
use std::time::Duration;

pub fn chung() -> BranchKey {
    BranchKey::new("chung")
}

pub fn nganh2() -> BranchKey {
    BranchKey::new("nganh2")
}

fn seeds() -> StaticSeedProvider {
    let mut to = Person::new("doi1-to", "Đỗ Văn Tổ", 1);
    to.child_ids = vec!["doi2-an".into()];
    let mut an = Person::new("doi2-an", "Đỗ Văn An", 2);
    an.father_id = Some("doi1-to".into());
    an.phone = Some("0912345678".into());
    let goc = Person::new("n2c2-doi20-goc", "Đỗ Văn Gốc", 20);
    StaticSeedProvider::new()
        .with_branch("chung", vec![to, an])
        .with_branch("nganh2", vec![goc])
}

/// Store over a fresh in-memory gateway, started and with both branches live.
pub async fn started_store() -> (Arc<InMemoryGateway>, GraphStore) {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = GraphStore::new(
        gateway.clone(),
        Arc::new(seeds()),
        vec![
            BranchInfo {
                key: chung(),
                label: "Chung".into(),
                id_prefix: None,
            },
            BranchInfo {
                key: nganh2(),
                label: "Ngành 2 Chi 2".into(),
                id_prefix: Some("n2c2-".into()),
            },
        ],
        StoreOptions {
            default_branch: chung(),
            check_in_limit: 5,
        },
    )
    .unwrap();
    store.start().await.unwrap();
    let ready = eventually(|| {
        store.merged_people().len() == 2 && store.branch_statuses().iter().all(|s| s.live)
    })
    .await;
    assert!(ready, "merged view never caught up");
    (gateway, store)
}

pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
