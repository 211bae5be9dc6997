//! Bundled seed datasets: one JSON array of person records per branch.
//!
//! [`JsonSeedProvider`] serves them to the graph store (initial upload and
//! offline fallback). [`import_branch`] and [`import_all`] push them into a
//! gateway in fixed-size atomic chunks for bulk provisioning.

use giapha_core::config::BranchConfig;
use giapha_core::{BatchOp, BranchKey, GatewayError, PartitionGateway, Person, SeedProvider};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Cannot read seed file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed seed file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Seed for branch '{branch}' lists id '{id}' more than once")]
    DuplicateId { branch: String, id: String },

    #[error("Chunk size must be positive")]
    InvalidChunkSize,

    #[error("Import into '{branch}' failed after {committed} records: {source}")]
    Import {
        branch: String,
        committed: usize,
        #[source]
        source: GatewayError,
    },
}

/// Seed datasets read from JSON files at start-up.
#[derive(Debug, Clone, Default)]
pub struct JsonSeedProvider {
    datasets: HashMap<BranchKey, Vec<Person>>,
}

impl JsonSeedProvider {
    /// Loads the `seed_path` of every branch. Relative paths resolve against
    /// `base_dir` when given.
    pub fn load(branches: &[BranchConfig], base_dir: Option<&Path>) -> Result<Self, SeedError> {
        let mut datasets = HashMap::new();
        for branch in branches {
            let path = match base_dir {
                Some(base) => base.join(&branch.seed_path),
                None => PathBuf::from(&branch.seed_path),
            };
            let people = read_dataset(&path)?;
            check_unique(&branch.key, &people)?;
            tracing::info!(branch = %branch.key, records = people.len(), path = %path.display(), "Loaded seed dataset");
            datasets.insert(BranchKey::new(branch.key.clone()), people);
        }
        Ok(Self { datasets })
    }

    pub fn dataset_len(&self, branch: &BranchKey) -> usize {
        self.datasets.get(branch).map_or(0, Vec::len)
    }
}

impl SeedProvider for JsonSeedProvider {
    fn initial_dataset(&self, branch: &BranchKey) -> Vec<Person> {
        self.datasets.get(branch).cloned().unwrap_or_default()
    }
}

/// Parses one seed file.
pub fn read_dataset(path: &Path) -> Result<Vec<Person>, SeedError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn check_unique(branch: &str, people: &[Person]) -> Result<(), SeedError> {
    let mut seen = HashSet::with_capacity(people.len());
    for person in people {
        if !seen.insert(person.id.as_str()) {
            return Err(SeedError::DuplicateId {
                branch: branch.to_string(),
                id: person.id.clone(),
            });
        }
    }
    Ok(())
}

/// Outcome of importing one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub branch: BranchKey,
    pub records: usize,
    pub batches: usize,
}

/// Overwrites `people` into `branch`, `chunk_size` records per atomic batch.
/// Chunks already committed stay committed when a later one fails.
pub async fn import_branch(
    gateway: &dyn PartitionGateway,
    branch: &BranchKey,
    people: Vec<Person>,
    chunk_size: usize,
) -> Result<ImportReport, SeedError> {
    if chunk_size == 0 {
        return Err(SeedError::InvalidChunkSize);
    }
    let total = people.len();
    let mut committed = 0;
    let mut batches = 0;
    for chunk in people.chunks(chunk_size) {
        let ops = chunk.iter().cloned().map(BatchOp::Insert).collect();
        gateway
            .atomic_batch(branch, ops)
            .await
            .map_err(|source| SeedError::Import {
                branch: branch.to_string(),
                committed,
                source,
            })?;
        committed += chunk.len();
        batches += 1;
        tracing::info!(branch = %branch, committed, total, "Committed seed chunk");
    }
    Ok(ImportReport {
        branch: branch.clone(),
        records: committed,
        batches,
    })
}

/// Imports the seed dataset of every listed branch, in order.
pub async fn import_all(
    gateway: &dyn PartitionGateway,
    provider: &dyn SeedProvider,
    branches: &[BranchKey],
    chunk_size: usize,
) -> Result<Vec<ImportReport>, SeedError> {
    let mut reports = Vec::with_capacity(branches.len());
    for branch in branches {
        let people = provider.initial_dataset(branch);
        tracing::info!(branch = %branch, records = people.len(), "Importing seed dataset");
        reports.push(import_branch(gateway, branch, people, chunk_size).await?);
    }
    Ok(reports)
}
