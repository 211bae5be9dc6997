//! Branch ownership and the cross-branch merge.
//!
//! The merged view is rebuilt from scratch after every branch emission by
//! walking branches in declaration order. A repeated id is settled by
//! ownership: the copy from the id's home branch wins; ids with no known home
//! (minted at runtime, unprefixed) keep whichever branch was walked last.

use serde::Serialize;
use std::collections::HashMap;

use crate::models::{BranchInfo, BranchKey, Person};
use crate::seed::SeedProvider;

/// Records of one scope with O(1) lookup by id. Insertion order is kept.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PeopleSet {
    people: Vec<Person>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl PeopleSet {
    /// Later records replace earlier ones with the same id.
    pub fn new(people: Vec<Person>) -> Self {
        let mut set = Self::default();
        for person in people {
            set.upsert(person);
        }
        set
    }

    pub fn get(&self, id: &str) -> Option<&Person> {
        self.index.get(id).map(|&i| &self.people[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn people(&self) -> &[Person] {
        &self.people
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Person> {
        self.people.iter()
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.people.iter().map(|p| p.id.as_str())
    }

    /// Replaces the record with the same id, or appends. True on replace.
    pub fn upsert(&mut self, person: Person) -> bool {
        match self.index.get(&person.id) {
            Some(&i) => {
                self.people[i] = person;
                true
            }
            None => {
                self.index.insert(person.id.clone(), self.people.len());
                self.people.push(person);
                false
            }
        }
    }

    /// Replaces the record only when the id is already present.
    pub fn replace(&mut self, person: Person) -> bool {
        match self.index.get(&person.id) {
            Some(&i) => {
                self.people[i] = person;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Person> {
        let i = self.index.remove(id)?;
        let removed = self.people.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    pub fn into_people(self) -> Vec<Person> {
        self.people
    }
}

/// Decides which branch an identifier canonically belongs to.
#[derive(Debug, Clone, Default)]
pub struct Ownership {
    /// Longest prefix first.
    prefixes: Vec<(String, BranchKey)>,
    seed_homes: HashMap<String, BranchKey>,
}

impl Ownership {
    /// Builds the resolver from branch prefixes and seed membership. An id seeded
    /// into several branches belongs to the first one declared.
    pub fn new(branches: &[BranchInfo], seeds: &dyn SeedProvider) -> Self {
        let mut prefixes: Vec<(String, BranchKey)> = branches
            .iter()
            .filter_map(|b| b.id_prefix.clone().map(|prefix| (prefix, b.key.clone())))
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut seed_homes = HashMap::new();
        for branch in branches {
            for person in seeds.initial_dataset(&branch.key) {
                seed_homes
                    .entry(person.id)
                    .or_insert_with(|| branch.key.clone());
            }
        }

        Self {
            prefixes,
            seed_homes,
        }
    }

    /// Home branch by prefix, then by seed membership; `None` for runtime ids.
    pub fn home_branch(&self, id: &str) -> Option<&BranchKey> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix.as_str()))
            .map(|(_, key)| key)
            .or_else(|| self.seed_homes.get(id))
    }

    /// Whether a copy found in `branch` may stand for `id`. Ids without a
    /// known home are accepted everywhere.
    pub fn is_home(&self, id: &str, branch: &BranchKey) -> bool {
        self.home_branch(id).map_or(true, |home| home == branch)
    }
}

/// Result of one merge pass.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub merged: PeopleSet,
    /// Every repeated sighting as `(id, branch it was seen in)`.
    pub duplicates: Vec<(String, BranchKey)>,
}

/// Deduplicated union of the given branch sets, in the given order.
pub fn merge_branches<'a>(
    branches: impl IntoIterator<Item = (&'a BranchKey, &'a PeopleSet)>,
    ownership: &Ownership,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for (branch, people) in branches {
        for person in people.iter() {
            if !outcome.merged.contains(&person.id) {
                outcome.merged.upsert(person.clone());
                continue;
            }
            outcome.duplicates.push((person.id.clone(), branch.clone()));
            if ownership.is_home(&person.id, branch) {
                outcome.merged.replace(person.clone());
            }
        }
    }
    outcome
}
