//! Graph store: the in-process view of the family graph.
//!
//! Holds two scopes of records. The *current* scope follows whichever branch
//! is selected and is re-subscribed on every switch. The *merged* scope keeps
//! one subscription per configured branch for the whole lifetime of the store
//! and rebuilds a deduplicated union after every emission.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! await. Mutations are serialized by a separate async lock held from the
//! snapshot they read until their result is applied locally. Observers
//! follow changes through `tokio::sync::watch` channels.

pub mod merge;
mod mutation;

use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::GiaphaConfig;
use crate::error::{GatewayError, StoreError};
use crate::gateway::{BatchOp, PartitionGateway, Subscription};
use crate::models::{BranchInfo, BranchKey, BranchStatus, Person};
use crate::relations::{self, Relatives, Snapshot};
use crate::seed::SeedProvider;

pub use merge::{merge_branches, MergeOutcome, Ownership, PeopleSet};
pub use mutation::ChildDraft;

/// Tunables not tied to a particular backend.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub default_branch: BranchKey,
    pub check_in_limit: usize,
}

#[derive(Debug, Default)]
struct BranchCache {
    people: PeopleSet,
    degraded: bool,
    live: bool,
    last_error: Option<String>,
}

struct StoreState {
    current_branch: BranchKey,
    current: Arc<PeopleSet>,
    current_degraded: bool,
    /// Bumped on every branch selection; stale feeds compare against it.
    selection: u64,
    current_feed: Option<JoinHandle<()>>,
    branches: HashMap<BranchKey, BranchCache>,
    merged: Arc<PeopleSet>,
    seeding: HashSet<BranchKey>,
    branch_feeds: Vec<JoinHandle<()>>,
}

struct Inner {
    gateway: Arc<dyn PartitionGateway>,
    seeds: Arc<dyn SeedProvider>,
    branches: Vec<BranchInfo>,
    ownership: Ownership,
    options: StoreOptions,
    state: Mutex<StoreState>,
    write_lock: tokio::sync::Mutex<()>,
    current_tx: watch::Sender<Arc<PeopleSet>>,
    merged_tx: watch::Sender<Arc<PeopleSet>>,
    branch_tx: watch::Sender<BranchKey>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(feed) = state.current_feed.take() {
            feed.abort();
        }
        for feed in state.branch_feeds.drain(..) {
            feed.abort();
        }
    }
}

/// Cheap to clone; all clones share one view.
#[derive(Clone)]
pub struct GraphStore {
    inner: Arc<Inner>,
}

impl GraphStore {
    pub fn new(
        gateway: Arc<dyn PartitionGateway>,
        seeds: Arc<dyn SeedProvider>,
        branches: Vec<BranchInfo>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        if !branches.iter().any(|b| b.key == options.default_branch) {
            return Err(StoreError::UnknownBranch(options.default_branch.to_string()));
        }
        let ownership = Ownership::new(&branches, seeds.as_ref());
        let current = Arc::new(PeopleSet::default());
        let merged = Arc::new(PeopleSet::default());
        let state = StoreState {
            current_branch: options.default_branch.clone(),
            current: current.clone(),
            current_degraded: false,
            selection: 0,
            current_feed: None,
            branches: HashMap::new(),
            merged: merged.clone(),
            seeding: HashSet::new(),
            branch_feeds: Vec::new(),
        };
        let (current_tx, _) = watch::channel(current);
        let (merged_tx, _) = watch::channel(merged);
        let (branch_tx, _) = watch::channel(options.default_branch.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                gateway,
                seeds,
                branches,
                ownership,
                options,
                state: Mutex::new(state),
                write_lock: tokio::sync::Mutex::new(()),
                current_tx,
                merged_tx,
                branch_tx,
            }),
        })
    }

    pub fn from_config(
        config: &GiaphaConfig,
        gateway: Arc<dyn PartitionGateway>,
        seeds: Arc<dyn SeedProvider>,
    ) -> Result<Self, StoreError> {
        let branches: Vec<BranchInfo> = config.branches.iter().map(BranchInfo::from).collect();
        let default_branch = config
            .default_branch_key()
            .map(BranchKey::from)
            .ok_or_else(|| StoreError::UnknownBranch(String::new()))?;
        let options = StoreOptions {
            default_branch,
            check_in_limit: config.store.check_in_limit,
        };
        Self::new(gateway, seeds, branches, options)
    }

    /// Opens one subscription per branch for the merged view, then selects
    /// the default branch.
    pub async fn start(&self) -> Result<(), StoreError> {
        tracing::info!(
            backend = self.inner.gateway.name(),
            branches = self.inner.branches.len(),
            "Starting graph store"
        );
        for info in &self.inner.branches {
            self.open_branch_feed(&info.key).await;
        }
        let default_branch = self.inner.options.default_branch.clone();
        self.select_branch(&default_branch).await
    }

    async fn open_branch_feed(&self, key: &BranchKey) {
        match self.inner.gateway.subscribe(key).await {
            Ok(stream) => {
                let handle = tokio::spawn(run_branch_feed(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    stream,
                ));
                self.lock().branch_feeds.push(handle);
            }
            Err(e) => self.apply_branch_failure(key, &e),
        }
    }

    // ---- branch selection ----

    /// Makes `key` the current branch. Seeds the branch first when its
    /// partition is empty, and returns once the first emission (or the seed
    /// fallback) is visible through [`GraphStore::all_people`].
    ///
    /// Gateway failures are not errors here: the branch is served from seed
    /// data and marked degraded until the subscription delivers.
    pub async fn select_branch(&self, key: &BranchKey) -> Result<(), StoreError> {
        self.require_branch(key)?;
        let selection = {
            let mut state = self.lock();
            state.selection += 1;
            state.current_branch = key.clone();
            if let Some(feed) = state.current_feed.take() {
                feed.abort();
            }
            self.inner.branch_tx.send_replace(key.clone());
            state.selection
        };
        tracing::info!(branch = %key, "Selecting branch");

        // A failed seed still subscribes, so the view recovers with the remote.
        if let Err(e) = self.ensure_seeded(key).await {
            self.apply_current_fallback(selection, key, &e);
        }

        let mut stream = match self.inner.gateway.subscribe(key).await {
            Ok(stream) => stream,
            Err(e) => {
                self.apply_current_fallback(selection, key, &e);
                return Ok(());
            }
        };
        if let Some(first) = stream.next().await {
            self.apply_current_emission(selection, key, first);
        }

        let handle = tokio::spawn(run_current_feed(
            Arc::downgrade(&self.inner),
            selection,
            key.clone(),
            stream,
        ));
        let mut state = self.lock();
        if state.selection == selection {
            if let Some(stale) = state.current_feed.replace(handle) {
                stale.abort();
            }
        } else {
            handle.abort();
        }
        Ok(())
    }

    /// Fire-and-forget variant of [`GraphStore::select_branch`].
    pub fn switch_branch(&self, key: &BranchKey) -> Result<(), StoreError> {
        self.require_branch(key)?;
        let store = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = store.select_branch(&key).await {
                tracing::warn!(branch = %key, error = %e, "Branch switch failed");
            }
        });
        Ok(())
    }

    /// Uploads the seed dataset when the partition is empty. At most one
    /// seeding per branch is in flight; a concurrent caller skips.
    async fn ensure_seeded(&self, key: &BranchKey) -> Result<(), GatewayError> {
        if self.inner.gateway.probe_non_empty(key).await? {
            return Ok(());
        }
        let Some(_guard) = SeedingGuard::acquire(self, key) else {
            tracing::debug!(branch = %key, "Seeding already in flight");
            return Ok(());
        };
        let dataset = self.inner.seeds.initial_dataset(key);
        if dataset.is_empty() {
            tracing::warn!(branch = %key, "Branch is empty and has no seed dataset");
            return Ok(());
        }
        tracing::info!(branch = %key, records = dataset.len(), "Seeding empty branch");
        let ops = dataset.into_iter().map(BatchOp::Insert).collect();
        self.inner.gateway.atomic_batch(key, ops).await
    }

    fn apply_current_emission(
        &self,
        selection: u64,
        key: &BranchKey,
        emission: Result<Vec<Person>, GatewayError>,
    ) {
        let people = match emission {
            Ok(people) => people,
            Err(e) => return self.apply_current_fallback(selection, key, &e),
        };
        let mut state = self.lock();
        if state.selection != selection {
            return;
        }
        if state.current_degraded {
            tracing::info!(branch = %key, "Branch reachable again");
        }
        state.current = Arc::new(PeopleSet::new(people));
        state.current_degraded = false;
        self.inner.current_tx.send_replace(state.current.clone());
    }

    fn apply_current_fallback(&self, selection: u64, key: &BranchKey, err: &GatewayError) {
        tracing::warn!(branch = %key, error = %err, "Branch unavailable, serving seed data");
        let seed = self.inner.seeds.initial_dataset(key);
        let mut state = self.lock();
        if state.selection != selection {
            return;
        }
        state.current = Arc::new(PeopleSet::new(seed));
        state.current_degraded = true;
        self.inner.current_tx.send_replace(state.current.clone());
    }

    // ---- merged view ----

    fn apply_branch_emission(&self, key: &BranchKey, people: Vec<Person>) {
        let mut state = self.lock();
        let cache = state.branches.entry(key.clone()).or_default();
        cache.people = PeopleSet::new(people);
        cache.degraded = false;
        cache.live = true;
        cache.last_error = None;
        self.rebuild_merged(&mut state);
    }

    fn apply_branch_failure(&self, key: &BranchKey, err: &GatewayError) {
        tracing::warn!(branch = %key, error = %err, "Branch feed failed, using seed data");
        let seed = self.inner.seeds.initial_dataset(key);
        let mut state = self.lock();
        let cache = state.branches.entry(key.clone()).or_default();
        cache.people = PeopleSet::new(seed);
        cache.degraded = true;
        cache.last_error = Some(err.to_string());
        self.rebuild_merged(&mut state);
    }

    fn rebuild_merged(&self, state: &mut StoreState) {
        let ready = self
            .inner
            .branches
            .iter()
            .filter_map(|info| state.branches.get(&info.key).map(|c| (&info.key, &c.people)));
        let outcome = merge_branches(ready, &self.inner.ownership);
        if !outcome.duplicates.is_empty() {
            tracing::debug!(duplicates = outcome.duplicates.len(), "Merged view has repeated ids");
        }
        state.merged = Arc::new(outcome.merged);
        self.inner.merged_tx.send_replace(state.merged.clone());
    }

    // ---- reads ----

    /// Name of the gateway backend.
    pub fn backend(&self) -> &str {
        self.inner.gateway.name()
    }

    pub fn branches(&self) -> &[BranchInfo] {
        &self.inner.branches
    }

    pub fn branch_info(&self, key: &BranchKey) -> Option<&BranchInfo> {
        self.inner.branches.iter().find(|b| &b.key == key)
    }

    pub fn current_branch(&self) -> BranchKey {
        self.lock().current_branch.clone()
    }

    /// True while the current branch is served from seed data.
    pub fn is_degraded(&self) -> bool {
        self.lock().current_degraded
    }

    pub fn branch_statuses(&self) -> Vec<BranchStatus> {
        let state = self.lock();
        self.inner
            .branches
            .iter()
            .map(|info| {
                let cache = state.branches.get(&info.key);
                BranchStatus {
                    key: info.key.clone(),
                    label: info.label.clone(),
                    records: cache.map_or(0, |c| c.people.len()),
                    degraded: cache.is_some_and(|c| c.degraded),
                    live: cache.is_some_and(|c| c.live),
                    last_error: cache.and_then(|c| c.last_error.clone()),
                }
            })
            .collect()
    }

    /// Records of the current branch.
    pub fn all_people(&self) -> Arc<PeopleSet> {
        self.lock().current.clone()
    }

    /// Deduplicated records of every branch.
    pub fn merged_people(&self) -> Arc<PeopleSet> {
        self.lock().merged.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            current: state.current.clone(),
            merged: state.merged.clone(),
        }
    }

    /// Looks in the current branch first, then the merged view.
    pub fn person_by_id(&self, id: &str) -> Option<Person> {
        let found = self.snapshot().get(id).cloned();
        if found.is_none() {
            tracing::warn!(id = %id, "Person not found in current or merged view");
        }
        found
    }

    /// Case-insensitive exact match on the display name, over the merged view.
    pub fn person_by_name(&self, name: &str) -> Option<Person> {
        let needle = name.trim().to_lowercase();
        let merged = self.merged_people();
        let found = merged
            .iter()
            .find(|p| p.name.to_lowercase() == needle)
            .cloned();
        found
    }

    /// Case-insensitive search over the merged view. Matches name and address
    /// by substring, phone by substring, generation exactly.
    pub fn search_people(&self, query: &str) -> Vec<Person> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let merged = self.merged_people();
        merged
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.address
                        .as_deref()
                        .is_some_and(|a| a.to_lowercase().contains(&needle))
                    || p.phone.as_deref().is_some_and(|ph| ph.contains(&needle))
                    || p.generation.to_string() == needle
            })
            .cloned()
            .collect()
    }

    pub fn father(&self, id: &str) -> Option<Person> {
        let snap = self.snapshot();
        relations::father(&snap, id).cloned()
    }

    pub fn mother(&self, id: &str) -> Option<Person> {
        let snap = self.snapshot();
        relations::mother(&snap, id).cloned()
    }

    pub fn spouse(&self, id: &str) -> Option<Person> {
        let snap = self.snapshot();
        relations::spouse(&snap, id).cloned()
    }

    pub fn children(&self, id: &str) -> Vec<Person> {
        let snap = self.snapshot();
        relations::children(&snap, id).into_iter().cloned().collect()
    }

    pub fn siblings(&self, id: &str) -> Vec<Person> {
        let snap = self.snapshot();
        relations::siblings(&snap, id).into_iter().cloned().collect()
    }

    pub fn relatives(&self, id: &str) -> Option<Relatives> {
        relations::relatives(&self.snapshot(), id)
    }

    // ---- change feeds ----

    pub fn watch_people(&self) -> watch::Receiver<Arc<PeopleSet>> {
        self.inner.current_tx.subscribe()
    }

    pub fn watch_merged(&self) -> watch::Receiver<Arc<PeopleSet>> {
        self.inner.merged_tx.subscribe()
    }

    pub fn watch_branch(&self) -> watch::Receiver<BranchKey> {
        self.inner.branch_tx.subscribe()
    }

    // ---- helpers ----

    fn require_branch(&self, key: &BranchKey) -> Result<(), StoreError> {
        if self.branch_info(key).is_none() {
            return Err(StoreError::UnknownBranch(key.to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a branch as being seeded until dropped.
struct SeedingGuard<'a> {
    store: &'a GraphStore,
    key: BranchKey,
}

impl<'a> SeedingGuard<'a> {
    fn acquire(store: &'a GraphStore, key: &BranchKey) -> Option<Self> {
        if !store.lock().seeding.insert(key.clone()) {
            return None;
        }
        Some(Self {
            store,
            key: key.clone(),
        })
    }
}

impl Drop for SeedingGuard<'_> {
    fn drop(&mut self) {
        self.store.lock().seeding.remove(&self.key);
    }
}

async fn run_branch_feed(store: Weak<Inner>, key: BranchKey, mut stream: Subscription) {
    while let Some(emission) = stream.next().await {
        let Some(inner) = store.upgrade() else { return };
        let store = GraphStore { inner };
        match emission {
            Ok(people) => store.apply_branch_emission(&key, people),
            Err(e) => store.apply_branch_failure(&key, &e),
        }
    }
    tracing::debug!(branch = %key, "Branch feed closed");
}

async fn run_current_feed(store: Weak<Inner>, selection: u64, key: BranchKey, mut stream: Subscription) {
    while let Some(emission) = stream.next().await {
        let Some(inner) = store.upgrade() else { return };
        GraphStore { inner }.apply_current_emission(selection, &key, emission);
    }
    tracing::debug!(branch = %key, "Current branch feed closed");
}
