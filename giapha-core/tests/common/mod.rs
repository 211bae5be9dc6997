//! Shared fixtures for graph store integration tests.
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
    BranchKey::new("nganh2-chi2")
}

pub fn branches() -> Vec<BranchInfo> {
    vec![
        BranchInfo {
            key: chung(),
            label: "Chung".to_string(),
            id_prefix: None,
        },
        BranchInfo {
            key: nganh2(),
            label: "Ngành 2 - Chi 2".to_string(),
            id_prefix: Some("n2c2-".to_string()),
        },
    ]
}

pub fn person(id: &str, name: &str, generation: u32) -> Person {
    Person::new(id, name, generation)
}

/// Founder with two sons in `chung`.
pub fn chung_seed() -> Vec<Person> {
    let mut to = person("doi1-to", "Đỗ Văn Tổ", 1);
    to.child_ids = vec!["doi2-an".into(), "doi2-binh".into()];
    to.lineage = Some(1);

    let mut an = person("doi2-an", "Đỗ Văn An", 2);
    an.father_id = Some("doi1-to".into());
    an.sibling_ids = vec!["doi2-binh".into()];
    an.lineage = Some(1);

    let mut binh = person("doi2-binh", "Đỗ Văn Bình", 2);
    binh.father_id = Some("doi1-to".into());
    binh.sibling_ids = vec!["doi2-an".into()];
    binh.address = Some("Hà Nội".into());
    binh.phone = Some("0912345678".into());
    binh.lineage = Some(1);

    vec![to, an, binh]
}

/// Sub-lineage records. `doi19-goc` carries no prefix; it belongs to the
/// branch only through seed membership.
pub fn nganh2_seed() -> Vec<Person> {
    let mut goc = person("doi19-goc", "Đỗ Văn Gốc", 19);
    goc.child_ids = vec!["n2c2-doi20-truong".into()];

    let mut truong = person("n2c2-doi20-truong", "Đỗ Văn Trưởng", 20);
    truong.father_id = Some("doi19-goc".into());

    vec![goc, truong]
}

pub fn seeds() -> StaticSeedProvider {
    StaticSeedProvider::new()
        .with_branch(chung(), chung_seed())
        .with_branch(nganh2(), nganh2_seed())
}

pub fn build_store(gateway: Arc<InMemoryGateway>) -> GraphStore {
    GraphStore::new(
        gateway,
        Arc::new(seeds()),
        branches(),
        StoreOptions {
            default_branch: chung(),
            check_in_limit: 5,
        },
    )
    .expect("valid store options")
}

/// Started store on a fresh gateway; `chung` gets seeded.
pub async fn started() -> (Arc<InMemoryGateway>, GraphStore) {
    let gateway = Arc::new(InMemoryGateway::new());
    let store = build_store(gateway.clone());
    store.start().await.expect("start");
    assert!(
        eventually(|| store.merged_people().len() == chung_seed().len()).await,
        "merged view never caught up with the seeded branch"
    );
    (gateway, store)
}

/// Polls `check` for up to two seconds.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
