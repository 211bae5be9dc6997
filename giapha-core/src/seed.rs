//! Seed provider contract: the bundled initial dataset of each branch, used
//! to fill an empty partition and as the offline fallback.

use std::collections::HashMap;

use crate::models::{BranchKey, Person};

pub trait SeedProvider: Send + Sync {
    /// Static dataset for `branch`; empty when none is bundled.
    fn initial_dataset(&self, branch: &BranchKey) -> Vec<Person>;
}

/// Seed datasets held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSeedProvider {
    datasets: HashMap<BranchKey, Vec<Person>>,
}

impl StaticSeedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, branch: impl Into<BranchKey>, people: Vec<Person>) -> Self {
        self.datasets.insert(branch.into(), people);
        self
    }
}

impl From<HashMap<BranchKey, Vec<Person>>> for StaticSeedProvider {
    fn from(datasets: HashMap<BranchKey, Vec<Person>>) -> Self {
        Self { datasets }
    }
}

impl SeedProvider for StaticSeedProvider {
    fn initial_dataset(&self, branch: &BranchKey) -> Vec<Person> {
        self.datasets.get(branch).cloned().unwrap_or_default()
    }
}
