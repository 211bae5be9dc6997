use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::config::BranchConfig;

/// Short key naming one branch partition, e.g. `chung`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchKey(String);

impl BranchKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for BranchKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BranchKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Presentation metadata for one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub key: BranchKey,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,
}

impl From<&BranchConfig> for BranchInfo {
    fn from(config: &BranchConfig) -> Self {
        Self {
            key: BranchKey::new(config.key.clone()),
            label: config.label.clone(),
            id_prefix: config
                .id_prefix
                .clone()
                .filter(|prefix| !prefix.is_empty()),
        }
    }
}

/// Live health of one branch as seen by the graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchStatus {
    pub key: BranchKey,
    pub label: String,
    pub records: usize,
    /// True while the branch is served from seed data after a failure.
    pub degraded: bool,
    /// True once at least one subscription emission arrived.
    pub live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
