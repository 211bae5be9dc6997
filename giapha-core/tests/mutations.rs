//! Write path of the graph store: atomic child-add, delete, merge saves,
//! cleanup and search.

mod common;

use common::*;
use giapha_core::relations::asymmetric_siblings;
use giapha_core::{ChildDraft, InMemoryGateway, PeopleSet, PersonField, StoreError};
use std::sync::Arc;
use std::time::Duration;

fn draft(name: &str) -> ChildDraft {
    ChildDraft {
        name: name.to_string(),
        position: None,
    }
}

// ===========================================================================
// TEST 1: child-add updates child, parent and siblings in one batch
// ===========================================================================
#[tokio::test]
async fn test_add_child_links_parent_and_siblings() {
    let (gateway, store) = started().await;
    let batches_before = gateway.counts().batches;

    let child = store
        .add_child("doi1-to", ChildDraft {
            name: "  Đỗ Văn Dũng ".to_string(),
            position: Some("con út".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(child.id, "doi2-dovandung");
    assert_eq!(child.name, "Đỗ Văn Dũng");
    assert_eq!(child.generation, 2);
    assert_eq!(child.father_id.as_deref(), Some("doi1-to"));
    assert_eq!(child.lineage, Some(1));
    assert_eq!(child.position.as_deref(), Some("con út"));
    assert_eq!(child.sibling_ids, vec!["doi2-an", "doi2-binh"]);
    assert_eq!(gateway.counts().batches, batches_before + 1);

    let parent = gateway.record(&chung(), "doi1-to").unwrap();
    assert_eq!(parent.child_ids, vec!["doi2-an", "doi2-binh", "doi2-dovandung"]);
    for sibling in ["doi2-an", "doi2-binh"] {
        let stored = gateway.record(&chung(), sibling).unwrap();
        assert!(stored.sibling_ids.contains(&child.id), "{sibling} must list the new child");
    }

    // Visible locally before any emission is processed.
    assert!(store.person_by_id(&child.id).is_some());
    assert_eq!(store.children("doi1-to").len(), 3);
    assert!(asymmetric_siblings(&store.all_people()).is_empty());
    assert!(eventually(|| asymmetric_siblings(&store.merged_people()).is_empty()
        && store.merged_people().contains("doi2-dovandung"))
    .await);
}

// ===========================================================================
// TEST 2: rejected batch leaves remote and local state untouched
// ===========================================================================
#[tokio::test]
async fn test_add_child_failure_changes_nothing() {
    let (gateway, store) = started().await;
    let remote_before = gateway.records(&chung());
    let local_before = store.all_people();
    gateway.reject_next_batches(1);

    let err = store.add_child("doi1-to", draft("Dũng")).await.unwrap_err();

    assert!(matches!(err, StoreError::Transaction(_)));
    assert_eq!(gateway.records(&chung()), remote_before);
    assert_eq!(store.all_people().people(), local_before.people());
    assert!(store.person_by_id("doi2-dung").is_none());
}

// ===========================================================================
// TEST 3: generated ids never collide
// ===========================================================================
#[tokio::test]
async fn test_repeated_child_names_get_numbered_ids() {
    let (_gateway, store) = started().await;
    let first = store.add_child("doi2-an", draft("Dũng")).await.unwrap();
    let second = store.add_child("doi2-an", draft("Dũng")).await.unwrap();
    let third = store.add_child("doi2-binh", draft("Dũng")).await.unwrap();

    assert_eq!(first.id, "doi3-dung");
    assert_eq!(second.id, "doi3-dung2");
    assert_eq!(third.id, "doi3-dung3");
    assert_eq!(second.sibling_ids, vec!["doi3-dung"]);
}

// ===========================================================================
// TEST 4: child ids carry the branch prefix
// ===========================================================================
#[tokio::test]
async fn test_child_in_prefixed_branch_gets_prefixed_id() {
    let (gateway, store) = started().await;
    store.select_branch(&nganh2()).await.unwrap();

    let child = store
        .add_child("n2c2-doi20-truong", draft("Minh Anh"))
        .await
        .unwrap();

    assert_eq!(child.id, "n2c2-doi21-minhanh");
    assert!(gateway.record(&nganh2(), &child.id).is_some());
    assert!(gateway.record(&chung(), &child.id).is_none());
}

// ===========================================================================
// TEST 5: blank names and unknown parents are rejected before any write
// ===========================================================================
#[tokio::test]
async fn test_add_child_validation() {
    let (gateway, store) = started().await;
    let batches_before = gateway.counts().batches;

    let err = store.add_child("doi1-to", draft("   ")).await.unwrap_err();
    assert!(matches!(err, StoreError::BlankName));
    let err = store.add_child("ghost", draft("Dũng")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    assert_eq!(gateway.counts().batches, batches_before);
}

// ===========================================================================
// TEST 6: sibling held by another branch aborts the child-add
// ===========================================================================
#[tokio::test]
async fn test_add_child_with_cross_branch_sibling_is_rejected() {
    let (gateway, store) = started().await;
    let mut parent = person("doi5-cha", "Cha", 5);
    parent.child_ids = vec!["n2c2-doi6-con".into()];
    gateway.preload(&chung(), vec![parent]);
    gateway.preload(&nganh2(), vec![person("n2c2-doi6-con", "Con", 6)]);
    assert!(eventually(|| store.person_by_id("n2c2-doi6-con").is_some()
        && store.person_by_id("doi5-cha").is_some())
    .await);
    let batches_before = gateway.counts().batches;

    let err = store.add_child("doi5-cha", draft("Út")).await.unwrap_err();

    assert!(matches!(err, StoreError::CrossBranch { .. }));
    assert_eq!(gateway.counts().batches, batches_before);
}

// ===========================================================================
// TEST 7: delete strips the record from its relatives atomically
// ===========================================================================
#[tokio::test]
async fn test_delete_person_updates_relatives() {
    let (gateway, store) = started().await;
    let mut mother = person("doi1-ba", "Nguyễn Thị Ba", 1);
    mother.child_ids = vec!["doi2-an".into()];
    let mut an = gateway.record(&chung(), "doi2-an").unwrap();
    an.mother_id = Some("doi1-ba".into());
    gateway.preload(&chung(), vec![mother, an]);
    assert!(eventually(|| store.mother("doi2-an").is_some()).await);
    let batches_before = gateway.counts().batches;

    assert!(store.delete_person("doi2-an").await.unwrap());

    assert_eq!(gateway.counts().batches, batches_before + 1);
    assert!(gateway.record(&chung(), "doi2-an").is_none());
    assert_eq!(gateway.record(&chung(), "doi1-to").unwrap().child_ids, vec!["doi2-binh"]);
    assert!(gateway.record(&chung(), "doi1-ba").unwrap().child_ids.is_empty());
    assert!(store.children("doi1-ba").is_empty());
    assert!(gateway.record(&chung(), "doi2-binh").unwrap().sibling_ids.is_empty());
    assert!(store.person_by_id("doi2-an").is_none());
    assert_eq!(store.children("doi1-to").len(), 1);

    // Unknown ids are a no-op.
    assert!(!store.delete_person("doi2-an").await.unwrap());
    assert_eq!(gateway.counts().batches, batches_before + 1);
}

// ===========================================================================
// TEST 8: delete clears a spouse back-reference
// ===========================================================================
#[tokio::test]
async fn test_delete_person_clears_spouse_link() {
    let (gateway, store) = started().await;
    let mut husband = person("doi2-an", "Đỗ Văn An", 2);
    husband.spouse_id = Some("doi2-hoa".into());
    let mut wife = person("doi2-hoa", "Nguyễn Thị Hoa", 2);
    wife.spouse_id = Some("doi2-an".into());
    gateway.preload(&chung(), vec![husband, wife]);
    assert!(eventually(|| store.spouse("doi2-an").is_some()).await);

    store.delete_person("doi2-hoa").await.unwrap();

    assert!(gateway.record(&chung(), "doi2-an").unwrap().spouse_id.is_none());
    assert!(store.spouse("doi2-an").is_none());
}

// ===========================================================================
// TEST 9: save is a merge write
// ===========================================================================
#[tokio::test]
async fn test_save_keeps_fields_left_empty() {
    let (gateway, store) = started().await;
    let mut edit = person("doi2-binh", "Đỗ Văn Bình", 2);
    edit.notes = Some("Trưởng họ".to_string());

    let saved = store.save(edit).await.unwrap();

    assert_eq!(saved.address.as_deref(), Some("Hà Nội"));
    assert_eq!(saved.notes.as_deref(), Some("Trưởng họ"));
    let stored = gateway.record(&chung(), "doi2-binh").unwrap();
    assert_eq!(stored.address.as_deref(), Some("Hà Nội"));
    assert_eq!(stored.phone.as_deref(), Some("0912345678"));
    assert_eq!(stored.notes.as_deref(), Some("Trưởng họ"));
}

// ===========================================================================
// TEST 10: failed point write surfaces and leaves the view alone
// ===========================================================================
#[tokio::test]
async fn test_save_failure_is_surfaced() {
    let (gateway, store) = started().await;
    gateway.reject_next_writes(1);
    let mut edit = store.person_by_id("doi2-an").unwrap();
    edit.notes = Some("never stored".to_string());

    let err = store.save(edit).await.unwrap_err();

    assert!(matches!(err, StoreError::Transport(_)));
    assert!(store.person_by_id("doi2-an").unwrap().notes.is_none());
}

// ===========================================================================
// TEST 11: clearing fields removes them remotely
// ===========================================================================
#[tokio::test]
async fn test_clear_fields() {
    let (gateway, store) = started().await;
    let updated = store
        .clear_fields("doi2-binh", &[PersonField::Address, PersonField::Phone])
        .await
        .unwrap();

    assert!(updated.address.is_none());
    let stored = gateway.record(&chung(), "doi2-binh").unwrap();
    assert!(stored.address.is_none());
    assert!(stored.phone.is_none());
    assert_eq!(stored.name, "Đỗ Văn Bình");
}

// ===========================================================================
// TEST 12: check-ins are capped at the configured limit
// ===========================================================================
#[tokio::test]
async fn test_check_ins_keep_most_recent() {
    let (gateway, store) = started().await;
    for day in 1..=6 {
        store
            .record_check_in("doi2-an", format!("img-{day}.jpg"), Some(format!("{day:02}/03/2026")))
            .await
            .unwrap();
    }
    let stored = gateway.record(&chung(), "doi2-an").unwrap();
    assert_eq!(stored.check_ins.len(), 5);
    assert_eq!(stored.check_ins[0].image, "img-2.jpg");
    assert_eq!(stored.check_ins[4].date, "06/03/2026");

    let dated = store
        .record_check_in("doi2-an", "today.jpg".to_string(), None)
        .await
        .unwrap();
    let date = &dated.check_ins.last().unwrap().date;
    assert_eq!(date.len(), 10);
    assert_eq!(&date[2..3], "/");
}

// ===========================================================================
// TEST 13: wrong-branch cleanup is idempotent
// ===========================================================================
#[tokio::test]
async fn test_cleanup_wrong_branch_is_idempotent() {
    let (gateway, store) = started().await;
    gateway.preload(
        &chung(),
        vec![
            person("doi19-goc", "stray seeded copy", 19),
            person("n2c2-doi30-lac", "stray prefixed copy", 30),
        ],
    );
    assert!(eventually(|| store.all_people().len() == 5
        && store.merged_people().contains("doi19-goc")
        && store.merged_people().contains("n2c2-doi30-lac"))
    .await);

    assert_eq!(store.cleanup_wrong_branch().await.unwrap(), 2);
    assert!(gateway.record(&chung(), "doi19-goc").is_none());
    assert!(gateway.record(&chung(), "n2c2-doi30-lac").is_none());
    assert_eq!(store.all_people().len(), 3);

    assert_eq!(store.cleanup_wrong_branch().await.unwrap(), 0);
    assert_eq!(gateway.records(&chung()).len(), 3);
}

// ===========================================================================
// TEST 14: same-name duplicates collapse to the shortest id
// ===========================================================================
#[tokio::test]
async fn test_cleanup_duplicates_by_name_keeps_shortest_id() {
    let (gateway, store) = started().await;
    store
        .add_person(person("doi2-an-ban-sao", "Đỗ Văn An", 2))
        .await
        .unwrap();
    store.add_person(person("doi2-an2", "Đỗ Văn An", 2)).await.unwrap();

    assert_eq!(store.cleanup_duplicates_by_name("Đỗ Văn An").await.unwrap(), 2);
    assert!(gateway.record(&chung(), "doi2-an").is_some());
    assert!(gateway.record(&chung(), "doi2-an2").is_none());
    assert!(gateway.record(&chung(), "doi2-an-ban-sao").is_none());
    assert_eq!(store.cleanup_duplicates_by_name("Đỗ Văn An").await.unwrap(), 0);
}

// ===========================================================================
// TEST 15: add_person mints an id when none is given
// ===========================================================================
#[tokio::test]
async fn test_add_person_generates_missing_id() {
    let (gateway, store) = started().await;
    let added = store
        .add_person(person("", "Nguyễn Thị Hường", 2))
        .await
        .unwrap();
    assert_eq!(added.id, "doi2-nguyenthihuong");
    assert!(gateway.record(&chung(), &added.id).is_some());

    let err = store.add_person(person("", " ", 2)).await.unwrap_err();
    assert!(matches!(err, StoreError::BlankName));
}

// ===========================================================================
// TEST 16: search and name lookup
// ===========================================================================
#[tokio::test]
async fn test_search_people() {
    let (_gateway, store) = started().await;

    assert!(store.search_people("").is_empty());
    assert!(store.search_people("   ").is_empty());

    let hits: Vec<String> = store.search_people("AN").into_iter().map(|p| p.id).collect();
    assert_eq!(hits, vec!["doi2-an"]);

    let by_address: Vec<String> = store.search_people("hà nội").into_iter().map(|p| p.id).collect();
    assert_eq!(by_address, vec!["doi2-binh"]);

    let by_phone: Vec<String> = store.search_people("0912").into_iter().map(|p| p.id).collect();
    assert_eq!(by_phone, vec!["doi2-binh"]);

    let by_generation = store.search_people("1");
    assert!(by_generation.iter().any(|p| p.id == "doi1-to"));
    assert!(store.search_people("01").is_empty());
    assert!(store.search_people("+1").is_empty());

    assert_eq!(
        store.person_by_name("  đỗ văn bình ").map(|p| p.id),
        Some("doi2-binh".to_string())
    );
}

// ===========================================================================
// TEST 17: concurrent child-adds are serialized
// ===========================================================================
#[tokio::test]
async fn test_concurrent_add_child_keeps_every_child() {
    let gateway = Arc::new(InMemoryGateway::with_latency(Duration::from_millis(20)));
    let store = build_store(gateway.clone());
    store.start().await.unwrap();
    assert!(eventually(|| store.merged_people().len() == 3).await);

    let (first, second) = tokio::join!(
        store.add_child("doi1-to", draft("Dũng")),
        store.add_child("doi1-to", draft("Dũng")),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first.id, second.id);
    assert_eq!(gateway.records(&chung()).len(), 5);

    let (xuan, yen) = tokio::join!(
        store.add_child("doi1-to", draft("Xuân")),
        store.add_child("doi1-to", draft("Yến")),
    );
    let (xuan, yen) = (xuan.unwrap(), yen.unwrap());

    let parent = gateway.record(&chung(), "doi1-to").unwrap();
    assert_eq!(parent.child_ids.len(), 6);
    for id in [&first.id, &second.id, &xuan.id, &yen.id] {
        assert!(parent.child_ids.contains(id), "parent must list {id}");
    }
    let remote = PeopleSet::new(gateway.records(&chung()));
    assert!(asymmetric_siblings(&remote).is_empty());
    assert!(eventually(|| store.children("doi1-to").len() == 6).await);
}

// ===========================================================================
// TEST 18: saving a record also refreshes a copy held by the current branch
// ===========================================================================
#[tokio::test]
async fn test_save_refreshes_copy_in_current_branch() {
    let (gateway, store) = started().await;
    gateway.preload(&chung(), vec![person("doi19-goc", "Đỗ Văn Gốc", 19)]);
    assert!(eventually(|| store.all_people().contains("doi19-goc")).await);

    let mut edit = store.person_by_id("doi19-goc").unwrap();
    edit.notes = Some("updated".to_string());
    let saved = store.save(edit).await.unwrap();

    assert_eq!(saved.notes.as_deref(), Some("updated"));
    assert_eq!(
        gateway.record(&nganh2(), "doi19-goc").unwrap().notes.as_deref(),
        Some("updated")
    );
    assert!(gateway.record(&chung(), "doi19-goc").unwrap().notes.is_none());
    assert_eq!(
        store.person_by_id("doi19-goc").unwrap().notes.as_deref(),
        Some("updated")
    );
}

// ===========================================================================
// TEST 19: name lookup reaches records of other branches
// ===========================================================================
#[tokio::test]
async fn test_person_by_name_uses_merged_view() {
    let (gateway, store) = started().await;
    gateway.preload(&nganh2(), vec![person("n2c2-doi20-lac", "Đỗ Văn Lạc", 20)]);
    assert!(eventually(|| store.merged_people().contains("n2c2-doi20-lac")).await);

    assert!(!store.all_people().contains("n2c2-doi20-lac"));
    assert_eq!(
        store.person_by_name("ĐỖ VĂN LẠC").map(|p| p.id),
        Some("n2c2-doi20-lac".to_string())
    );
    assert!(store.person_by_name("Lạc").is_none());
}
