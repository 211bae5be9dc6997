//! Relationship index: resolves the id links of a record against one
//! consistent snapshot of the store. Dangling ids resolve to nothing.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::Person;
use crate::store::PeopleSet;

/// Point-in-time view of both scopes. Lookups try the current branch before
/// the merged view.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub current: Arc<PeopleSet>,
    pub merged: Arc<PeopleSet>,
}

impl Snapshot {
    pub fn get(&self, id: &str) -> Option<&Person> {
        self.current.get(id).or_else(|| self.merged.get(id))
    }

    /// Every visible record once: the current branch, then merged records
    /// the current branch does not hold.
    pub fn iter(&self) -> impl Iterator<Item = &Person> {
        self.current.iter().chain(
            self.merged
                .iter()
                .filter(|p| !self.current.contains(&p.id)),
        )
    }
}

/// Immediate family of one record, resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relatives {
    pub person: Person,
    pub father: Option<Person>,
    pub mother: Option<Person>,
    pub spouse: Option<Person>,
    pub siblings: Vec<Person>,
    pub children: Vec<Person>,
}

fn resolve_all<'a>(snap: &'a Snapshot, ids: &[String]) -> Vec<&'a Person> {
    ids.iter().filter_map(|id| snap.get(id)).collect()
}

pub fn father<'a>(snap: &'a Snapshot, id: &str) -> Option<&'a Person> {
    let father_id = snap.get(id)?.father_id.as_deref()?;
    snap.get(father_id)
}

pub fn mother<'a>(snap: &'a Snapshot, id: &str) -> Option<&'a Person> {
    let mother_id = snap.get(id)?.mother_id.as_deref()?;
    snap.get(mother_id)
}

pub fn spouse<'a>(snap: &'a Snapshot, id: &str) -> Option<&'a Person> {
    let spouse_id = snap.get(id)?.spouse_id.as_deref()?;
    snap.get(spouse_id)
}

pub fn children<'a>(snap: &'a Snapshot, id: &str) -> Vec<&'a Person> {
    snap.get(id)
        .map(|p| resolve_all(snap, &p.child_ids))
        .unwrap_or_default()
}

pub fn siblings<'a>(snap: &'a Snapshot, id: &str) -> Vec<&'a Person> {
    snap.get(id)
        .map(|p| resolve_all(snap, &p.sibling_ids))
        .unwrap_or_default()
}

pub fn relatives(snap: &Snapshot, id: &str) -> Option<Relatives> {
    let person = snap.get(id)?.clone();
    let owned = |people: Vec<&Person>| people.into_iter().cloned().collect::<Vec<_>>();
    Some(Relatives {
        father: father(snap, id).cloned(),
        mother: mother(snap, id).cloned(),
        spouse: spouse(snap, id).cloned(),
        siblings: owned(siblings(snap, id)),
        children: owned(children(snap, id)),
        person,
    })
}

/// Records grouped by generation number, lowest first.
pub fn generations(people: &PeopleSet) -> BTreeMap<u32, Vec<&Person>> {
    let mut grouped: BTreeMap<u32, Vec<&Person>> = BTreeMap::new();
    for person in people.iter() {
        grouped.entry(person.generation).or_default().push(person);
    }
    grouped
}

/// Pairs `(a, b)` where `a` lists `b` as a sibling but `b` does not list
/// `a`. Dangling ids are ignored.
pub fn asymmetric_siblings(people: &PeopleSet) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for person in people.iter() {
        for sibling_id in &person.sibling_ids {
            let Some(sibling) = people.get(sibling_id) else {
                continue;
            };
            if !sibling.sibling_ids.iter().any(|id| id == &person.id) {
                pairs.push((person.id.clone(), sibling_id.clone()));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> Snapshot {
        let mut father = Person::new("doi1-cha", "Cha", 1);
        father.child_ids = vec!["doi2-a".into(), "doi2-b".into(), "doi2-gone".into()];
        father.spouse_id = Some("doi1-me".into());
        let mut mother = Person::new("doi1-me", "Mẹ", 1);
        mother.spouse_id = Some("doi1-cha".into());
        let mut a = Person::new("doi2-a", "A", 2);
        a.father_id = Some("doi1-cha".into());
        a.mother_id = Some("doi1-me".into());
        a.sibling_ids = vec!["doi2-b".into()];
        let mut b = Person::new("doi2-b", "B", 2);
        b.father_id = Some("doi1-cha".into());
        b.sibling_ids = vec!["doi2-a".into()];

        Snapshot {
            current: Arc::new(PeopleSet::new(vec![father, a])),
            merged: Arc::new(PeopleSet::new(vec![mother, b])),
        }
    }

    #[test]
    fn test_lookups_span_current_and_merged() {
        let snap = family();
        assert_eq!(father(&snap, "doi2-b").map(|p| p.id.as_str()), Some("doi1-cha"));
        assert_eq!(mother(&snap, "doi2-a").map(|p| p.id.as_str()), Some("doi1-me"));
        assert_eq!(spouse(&snap, "doi1-cha").map(|p| p.id.as_str()), Some("doi1-me"));
        assert!(mother(&snap, "doi2-b").is_none());
    }

    #[test]
    fn test_children_skip_dangling_ids() {
        let snap = family();
        let ids: Vec<_> = children(&snap, "doi1-cha").iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["doi2-a", "doi2-b"]);
        assert!(children(&snap, "missing").is_empty());
    }

    #[test]
    fn test_relatives_bundle() {
        let snap = family();
        let rel = relatives(&snap, "doi2-a").unwrap();
        assert_eq!(rel.father.unwrap().id, "doi1-cha");
        assert_eq!(rel.siblings.len(), 1);
        assert!(rel.spouse.is_none());
        assert!(relatives(&snap, "missing").is_none());
    }

    #[test]
    fn test_snapshot_iter_prefers_current_copy() {
        let mut stale = Person::new("doi2-a", "stale", 2);
        stale.notes = Some("merged".into());
        let snap = Snapshot {
            current: Arc::new(PeopleSet::new(vec![Person::new("doi2-a", "fresh", 2)])),
            merged: Arc::new(PeopleSet::new(vec![stale, Person::new("doi3-x", "X", 3)])),
        };
        let names: Vec<_> = snap.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["fresh", "X"]);
    }

    #[test]
    fn test_generations_grouped_in_order() {
        let snap = family();
        let grouped = generations(&snap.merged);
        assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_asymmetric_siblings_detected() {
        let mut a = Person::new("a", "A", 2);
        a.sibling_ids = vec!["b".into(), "ghost".into()];
        let b = Person::new("b", "B", 2);
        let set = PeopleSet::new(vec![a, b]);
        assert_eq!(asymmetric_siblings(&set), vec![("a".to_string(), "b".to_string())]);
    }
}
