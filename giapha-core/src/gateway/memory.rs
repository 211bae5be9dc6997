//! Process-local partition store.
//!
//! Serves the `memory` backend and doubles as the fake used by tests: faults
//! can be injected per operation, and every call is counted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{decode_document, BatchOp, FieldPatch, PartitionGateway, Subscription};
use crate::error::GatewayError;
use crate::models::{BranchKey, Person};

type Emission = Result<Vec<Person>, GatewayError>;

#[derive(Debug, Clone)]
struct StoredDoc {
    body: Map<String, Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

type Partition = BTreeMap<String, StoredDoc>;

/// Number of calls per operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub subscribes: usize,
    pub writes: usize,
    pub batches: usize,
    pub deletes: usize,
    pub patches: usize,
    pub probes: usize,
}

#[derive(Default)]
struct Faults {
    reject_batches: usize,
    reject_writes: usize,
    offline: HashSet<BranchKey>,
}

#[derive(Default)]
struct MemoryState {
    partitions: HashMap<BranchKey, Partition>,
    subscribers: HashMap<BranchKey, Vec<mpsc::UnboundedSender<Emission>>>,
    faults: Faults,
    counts: OpCounts,
}

#[derive(Default)]
pub struct InMemoryGateway {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every remote operation, so callers observe in-flight states.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency: Some(latency),
        }
    }

    /// Places records directly into a partition, bypassing counters and faults.
    pub fn preload(&self, branch: &BranchKey, people: Vec<Person>) {
        let now = Utc::now();
        let mut state = self.lock();
        let partition = state.partitions.entry(branch.clone()).or_default();
        for person in people {
            partition.insert(
                person.id.clone(),
                StoredDoc {
                    body: person.to_document(),
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        publish(&mut state, branch);
    }

    /// Current contents of one partition, ordered by id.
    pub fn records(&self, branch: &BranchKey) -> Vec<Person> {
        snapshot(&self.lock(), branch)
    }

    pub fn record(&self, branch: &BranchKey, id: &str) -> Option<Person> {
        let state = self.lock();
        let doc = state.partitions.get(branch)?.get(id)?;
        decode_document(id, doc.body.clone(), Some(doc.created_at), Some(doc.updated_at)).ok()
    }

    pub fn counts(&self) -> OpCounts {
        self.lock().counts
    }

    /// Rejects the next `n` atomic batches.
    pub fn reject_next_batches(&self, n: usize) {
        self.lock().faults.reject_batches = n;
    }

    /// Rejects the next `n` point writes, field updates and deletes.
    pub fn reject_next_writes(&self, n: usize) {
        self.lock().faults.reject_writes = n;
    }

    /// Takes a branch off the network. Going back online republishes its
    /// contents to live subscribers.
    pub fn set_offline(&self, branch: &BranchKey, offline: bool) {
        let mut state = self.lock();
        if offline {
            state.faults.offline.insert(branch.clone());
        } else if state.faults.offline.remove(branch) {
            publish(&mut state, branch);
        }
    }

    /// Delivers an error to every live subscriber of `branch`.
    pub fn emit_error(&self, branch: &BranchKey, message: &str) {
        let mut state = self.lock();
        if let Some(subs) = state.subscribers.get_mut(branch) {
            subs.retain(|tx| {
                tx.send(Err(GatewayError::Transport(message.to_string())))
                    .is_ok()
            });
        }
    }

    /// Number of open subscriptions on `branch`.
    pub fn subscriber_count(&self, branch: &BranchKey) -> usize {
        let mut state = self.lock();
        match state.subscribers.get_mut(branch) {
            Some(subs) => {
                subs.retain(|tx| !tx.is_closed());
                subs.len()
            }
            None => 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn snapshot(state: &MemoryState, branch: &BranchKey) -> Vec<Person> {
    let Some(partition) = state.partitions.get(branch) else {
        return Vec::new();
    };
    partition
        .iter()
        .filter_map(|(id, doc)| {
            match decode_document(id, doc.body.clone(), Some(doc.created_at), Some(doc.updated_at)) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(branch = %branch, id = %id, error = %e, "Skipping malformed record");
                    None
                }
            }
        })
        .collect()
}

fn publish(state: &mut MemoryState, branch: &BranchKey) {
    if state.faults.offline.contains(branch) {
        return;
    }
    let people = snapshot(state, branch);
    if let Some(subs) = state.subscribers.get_mut(branch) {
        subs.retain(|tx| tx.send(Ok(people.clone())).is_ok());
    }
}

fn ensure_online(state: &MemoryState, branch: &BranchKey) -> Result<(), GatewayError> {
    if state.faults.offline.contains(branch) {
        return Err(GatewayError::Transport(format!("branch '{branch}' is unreachable")));
    }
    Ok(())
}

fn take_write_fault(state: &mut MemoryState) -> Result<(), GatewayError> {
    if state.faults.reject_writes > 0 {
        state.faults.reject_writes -= 1;
        return Err(GatewayError::Transport("injected write failure".to_string()));
    }
    Ok(())
}

fn apply_write(partition: &mut Partition, person: &Person, merge: bool, now: DateTime<Utc>) {
    let body = person.to_document();
    match partition.get_mut(&person.id) {
        Some(existing) if merge => {
            existing.body.extend(body);
            existing.updated_at = now;
        }
        _ => {
            partition.insert(
                person.id.clone(),
                StoredDoc {
                    body,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
    }
}

fn apply_patch(
    branch: &BranchKey,
    partition: &mut Partition,
    id: &str,
    patch: &FieldPatch,
    now: DateTime<Utc>,
) -> Result<(), GatewayError> {
    let doc = partition
        .get_mut(id)
        .ok_or_else(|| GatewayError::RecordNotFound {
            branch: branch.to_string(),
            id: id.to_string(),
        })?;
    patch.apply_to(&mut doc.body);
    doc.updated_at = now;
    Ok(())
}

#[async_trait]
impl PartitionGateway for InMemoryGateway {
    async fn subscribe(&self, branch: &BranchKey) -> Result<Subscription, GatewayError> {
        self.delay().await;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            state.counts.subscribes += 1;
            let first = match ensure_online(&state, branch) {
                Ok(()) => Ok(snapshot(&state, branch)),
                Err(e) => Err(e),
            };
            // Receiver is alive, send cannot fail here.
            let _ = tx.send(first);
            state
                .subscribers
                .entry(branch.clone())
                .or_default()
                .push(tx);
        }
        tracing::debug!(branch = %branch, "Memory subscription opened");
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        Ok(stream.boxed())
    }

    async fn write(&self, branch: &BranchKey, person: &Person, merge: bool) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.lock();
        state.counts.writes += 1;
        ensure_online(&state, branch)?;
        take_write_fault(&mut state)?;
        let partition = state.partitions.entry(branch.clone()).or_default();
        apply_write(partition, person, merge, Utc::now());
        publish(&mut state, branch);
        Ok(())
    }

    async fn atomic_batch(&self, branch: &BranchKey, ops: Vec<BatchOp>) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.lock();
        state.counts.batches += 1;
        ensure_online(&state, branch)?;
        if state.faults.reject_batches > 0 {
            state.faults.reject_batches -= 1;
            return Err(GatewayError::Rejected("injected batch failure".to_string()));
        }

        // Stage on a copy so a failing op leaves the partition untouched.
        let mut staged = state.partitions.get(branch).cloned().unwrap_or_default();
        let now = Utc::now();
        for op in &ops {
            match op {
                BatchOp::Insert(person) => apply_write(&mut staged, person, false, now),
                BatchOp::Upsert(person) => apply_write(&mut staged, person, true, now),
                BatchOp::Patch { id, patch } => apply_patch(branch, &mut staged, id, patch, now)?,
                BatchOp::Delete { id } => {
                    staged.remove(id);
                }
            }
        }
        state.partitions.insert(branch.clone(), staged);
        publish(&mut state, branch);
        Ok(())
    }

    async fn delete_record(&self, branch: &BranchKey, id: &str) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.lock();
        state.counts.deletes += 1;
        ensure_online(&state, branch)?;
        take_write_fault(&mut state)?;
        if let Some(partition) = state.partitions.get_mut(branch) {
            partition.remove(id);
        }
        publish(&mut state, branch);
        Ok(())
    }

    async fn update_fields(&self, branch: &BranchKey, id: &str, patch: &FieldPatch) -> Result<(), GatewayError> {
        self.delay().await;
        let mut state = self.lock();
        state.counts.patches += 1;
        ensure_online(&state, branch)?;
        take_write_fault(&mut state)?;
        let partition = state.partitions.entry(branch.clone()).or_default();
        apply_patch(branch, partition, id, patch, Utc::now())?;
        publish(&mut state, branch);
        Ok(())
    }

    async fn probe_non_empty(&self, branch: &BranchKey) -> Result<bool, GatewayError> {
        self.delay().await;
        let mut state = self.lock();
        state.counts.probes += 1;
        ensure_online(&state, branch)?;
        Ok(state
            .partitions
            .get(branch)
            .is_some_and(|partition| !partition.is_empty()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
