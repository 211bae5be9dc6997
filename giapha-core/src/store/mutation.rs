//! Write path of the graph store.
//!
//! Every mutation is pushed to the gateway first. Only after the remote write
//! succeeds are the local caches updated, so a failed write leaves the view
//! untouched. Mutations hold the store's write lock from their first read to
//! their local update, so concurrent callers never build on the same
//! snapshot. Subscription emissions later replay the same change; local
//! updates upsert by id and are idempotent against that replay.

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::MutexGuard;

use super::GraphStore;
use crate::error::{GatewayError, StoreError};
use crate::gateway::{decode_document, BatchOp, FieldPatch};
use crate::models::{BranchKey, CheckIn, Person, PersonField};
use crate::relations::Snapshot;
use crate::slug;

/// Input for [`GraphStore::add_child`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildDraft {
    pub name: String,
    #[serde(default)]
    pub position: Option<String>,
}

/// Relative whose back-reference lives in another branch and is patched
/// after the primary batch commits.
struct ForeignPatch {
    branch: BranchKey,
    updated: Person,
    patch: FieldPatch,
}

impl GraphStore {
    /// Branch a write for `id` goes to: its home branch when known, else the
    /// first branch holding it, else the current branch.
    pub fn resolve_branch(&self, id: &str) -> BranchKey {
        if let Some(home) = self.inner.ownership.home_branch(id) {
            return home.clone();
        }
        let state = self.lock();
        self.inner
            .branches
            .iter()
            .find(|info| {
                state
                    .branches
                    .get(&info.key)
                    .is_some_and(|cache| cache.people.contains(id))
            })
            .map(|info| info.key.clone())
            .unwrap_or_else(|| state.current_branch.clone())
    }

    /// Fresh id for a record minted in `branch`, unique across both scopes.
    pub fn generate_id(&self, branch: &BranchKey, generation: u32, name: &str) -> String {
        let prefix = self
            .branch_info(branch)
            .and_then(|info| info.id_prefix.as_deref())
            .unwrap_or("");
        let base = slug::base_id(prefix, generation, name);
        let snap = self.snapshot();
        slug::unique_id(&base, |candidate| {
            snap.current.contains(candidate) || snap.merged.contains(candidate)
        })
    }

    /// Merge-writes `person`: fields it leaves empty keep their stored values.
    pub async fn save(&self, person: Person) -> Result<Person, StoreError> {
        let _guard = self.write_guard().await;
        self.save_locked(person).await
    }

    async fn save_locked(&self, person: Person) -> Result<Person, StoreError> {
        let branch = self.resolve_branch(&person.id);
        tracing::debug!(branch = %branch, id = %person.id, "Saving person");
        self.inner
            .gateway
            .write(&branch, &person, true)
            .await
            .map_err(|e| write_failed(&branch, &person.id, e))?;

        let existing = self.snapshot().get(&person.id).cloned();
        let mut stored = merged_record(existing.as_ref(), person);
        stored.updated_at = Some(Utc::now());
        if stored.created_at.is_none() {
            stored.created_at = stored.updated_at;
        }
        self.apply_local(&branch, vec![stored.clone()], &[]);
        Ok(stored)
    }

    /// Creates a standalone record. A blank id is replaced with a generated
    /// one in the current branch.
    pub async fn add_person(&self, mut person: Person) -> Result<Person, StoreError> {
        person.name = person.name.trim().to_string();
        if person.name.is_empty() {
            return Err(StoreError::BlankName);
        }
        let _guard = self.write_guard().await;
        if person.id.trim().is_empty() {
            let current = self.current_branch();
            person.id = self.generate_id(&current, person.generation, &person.name);
        }
        let branch = self.resolve_branch(&person.id);
        self.inner
            .gateway
            .write(&branch, &person, false)
            .await
            .map_err(|e| write_failed(&branch, &person.id, e))?;

        let now = Utc::now();
        person.created_at = Some(now);
        person.updated_at = Some(now);
        self.apply_local(&branch, vec![person.clone()], &[]);
        tracing::info!(branch = %branch, id = %person.id, "Person added");
        Ok(person)
    }

    /// Adds a child under `parent_id` in one atomic batch: the new record, the
    /// parent's child list and the sibling list of every existing child.
    pub async fn add_child(&self, parent_id: &str, draft: ChildDraft) -> Result<Person, StoreError> {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(StoreError::BlankName);
        }
        let _guard = self.write_guard().await;
        let snap = self.snapshot();
        let parent = snap
            .get(parent_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(parent_id.to_string()))?;
        let branch = self.resolve_branch(parent_id);
        let generation = parent.generation + 1;
        let child_id = self.generate_id(&branch, generation, name);

        let mut child = Person::new(&child_id, name, generation);
        child.father_id = Some(parent.id.clone());
        child.sibling_ids = parent.child_ids.clone();
        child.lineage = parent.lineage;
        child.position = draft
            .position
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let mut updated_parent = parent.clone();
        updated_parent.push_child(&child_id);

        let mut ops = vec![
            BatchOp::Insert(child.clone()),
            BatchOp::Upsert(updated_parent.clone()),
        ];
        let mut touched = vec![updated_parent];
        for sibling_id in &parent.child_ids {
            let Some(sibling) = snap.get(sibling_id) else {
                tracing::debug!(id = %sibling_id, "Skipping unresolvable sibling");
                continue;
            };
            let home = self.resolve_branch(sibling_id);
            if home != branch {
                return Err(StoreError::CrossBranch {
                    id: sibling_id.clone(),
                    found: home.to_string(),
                    expected: branch.to_string(),
                });
            }
            let mut sibling = sibling.clone();
            sibling.push_sibling(&child_id);
            ops.push(BatchOp::Upsert(sibling.clone()));
            touched.push(sibling);
        }

        let op_count = ops.len();
        self.inner
            .gateway
            .atomic_batch(&branch, ops)
            .await
            .map_err(|e| {
                tracing::error!(branch = %branch, parent = %parent_id, error = %e, "Child batch failed");
                StoreError::Transaction(e)
            })?;

        let now = Utc::now();
        child.created_at = Some(now);
        child.updated_at = Some(now);
        for person in &mut touched {
            person.updated_at = Some(now);
        }
        let mut upserts = Vec::with_capacity(touched.len() + 1);
        upserts.push(child.clone());
        upserts.extend(touched);
        self.apply_local(&branch, upserts, &[]);

        tracing::info!(
            branch = %branch,
            parent = %parent_id,
            child = %child_id,
            ops = op_count,
            "Child added"
        );
        Ok(child)
    }

    /// Deletes a record and strips it from its relatives' lists. Relatives in
    /// the same branch are updated in the same atomic batch as the delete;
    /// relatives held by another branch are patched afterwards.
    ///
    /// Returns `false` when the id is unknown.
    pub async fn delete_person(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_guard().await;
        self.delete_locked(id).await
    }

    async fn delete_locked(&self, id: &str) -> Result<bool, StoreError> {
        let snap = self.snapshot();
        let Some(person) = snap.get(id).cloned() else {
            tracing::warn!(id = %id, "Nothing to delete");
            return Ok(false);
        };
        let branch = self.resolve_branch(id);

        let mut edits: Vec<(Person, FieldPatch)> = Vec::new();
        for parent_id in [&person.father_id, &person.mother_id].into_iter().flatten() {
            if let Some(edit) = without_member(&snap, parent_id, id, "childIds", |p| &mut p.child_ids) {
                edits.push(edit);
            }
        }
        for sibling_id in &person.sibling_ids {
            if let Some(edit) = without_member(&snap, sibling_id, id, "siblingIds", |p| &mut p.sibling_ids) {
                edits.push(edit);
            }
        }
        if let Some(spouse) = person.spouse_id.as_deref().and_then(|sid| snap.get(sid)) {
            if spouse.spouse_id.as_deref() == Some(id) {
                let mut updated = spouse.clone();
                updated.spouse_id = None;
                edits.push((updated, FieldPatch::new().remove(PersonField::SpouseId.key())));
            }
        }

        let mut ops = Vec::new();
        let mut local = Vec::new();
        let mut foreign = Vec::new();
        for (updated, patch) in edits {
            let home = self.resolve_branch(&updated.id);
            if home == branch {
                ops.push(BatchOp::Patch {
                    id: updated.id.clone(),
                    patch,
                });
                local.push(updated);
            } else {
                foreign.push(ForeignPatch {
                    branch: home,
                    updated,
                    patch,
                });
            }
        }
        ops.push(BatchOp::Delete { id: id.to_string() });

        self.inner
            .gateway
            .atomic_batch(&branch, ops)
            .await
            .map_err(|e| {
                tracing::error!(branch = %branch, id = %id, error = %e, "Delete batch failed");
                StoreError::Transaction(e)
            })?;
        self.apply_local(&branch, local, &[id.to_string()]);
        tracing::info!(branch = %branch, id = %id, "Person deleted");

        for edit in foreign {
            match self
                .inner
                .gateway
                .update_fields(&edit.branch, &edit.updated.id, &edit.patch)
                .await
            {
                Ok(()) => self.apply_local(&edit.branch, vec![edit.updated], &[]),
                Err(e) => tracing::warn!(
                    branch = %edit.branch,
                    id = %edit.updated.id,
                    error = %e,
                    "Back-reference left dangling"
                ),
            }
        }
        Ok(true)
    }

    /// Removes optional fields from the stored record.
    pub async fn clear_fields(&self, id: &str, fields: &[PersonField]) -> Result<Person, StoreError> {
        let _guard = self.write_guard().await;
        let mut person = self
            .person_by_id(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if fields.is_empty() {
            return Ok(person);
        }
        let branch = self.resolve_branch(id);
        let patch = fields
            .iter()
            .fold(FieldPatch::new(), |patch, field| patch.remove(field.key()));
        self.inner
            .gateway
            .update_fields(&branch, id, &patch)
            .await
            .map_err(|e| write_failed(&branch, id, e))?;

        for field in fields {
            field.clear(&mut person);
        }
        person.updated_at = Some(Utc::now());
        self.apply_local(&branch, vec![person.clone()], &[]);
        Ok(person)
    }

    /// Appends a check-in, keeping only the most recent entries. `date`
    /// defaults to today as `dd/mm/yyyy`.
    pub async fn record_check_in(
        &self,
        id: &str,
        image: String,
        date: Option<String>,
    ) -> Result<Person, StoreError> {
        let _guard = self.write_guard().await;
        let mut person = self
            .person_by_id(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let date = date.unwrap_or_else(|| Local::now().format("%d/%m/%Y").to_string());
        person.push_check_in(CheckIn { image, date }, self.inner.options.check_in_limit);
        self.save_locked(person).await
    }

    /// Deletes every record found in a branch other than its home branch.
    /// Degraded branches are skipped since their cache is not remote state.
    /// Running it twice removes nothing the second time.
    pub async fn cleanup_wrong_branch(&self) -> Result<usize, StoreError> {
        let _guard = self.write_guard().await;
        let misplaced: Vec<(BranchKey, String)> = {
            let state = self.lock();
            self.inner
                .branches
                .iter()
                .filter_map(|info| state.branches.get(&info.key).map(|c| (&info.key, c)))
                .filter(|(_, cache)| !cache.degraded)
                .flat_map(|(key, cache)| {
                    cache
                        .people
                        .ids()
                        .filter(|id| !self.inner.ownership.is_home(id, key))
                        .map(|id| (key.clone(), id.to_string()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        let mut removed = 0;
        for (branch, id) in misplaced {
            self.inner
                .gateway
                .delete_record(&branch, &id)
                .await
                .map_err(|e| write_failed(&branch, &id, e))?;
            self.apply_local(&branch, Vec::new(), &[id.clone()]);
            tracing::info!(branch = %branch, id = %id, "Removed record from wrong branch");
            removed += 1;
        }
        tracing::info!(removed, "Wrong-branch cleanup finished");
        Ok(removed)
    }

    /// Collapses records sharing exactly `name` down to one, keeping the
    /// shortest id (ties broken lexicographically).
    pub async fn cleanup_duplicates_by_name(&self, name: &str) -> Result<usize, StoreError> {
        let _guard = self.write_guard().await;
        let merged = self.merged_people();
        let mut ids: Vec<&str> = merged
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.id.as_str())
            .collect();
        if ids.len() < 2 {
            return Ok(0);
        }
        ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        tracing::info!(name = %name, keep = %ids[0], duplicates = ids.len() - 1, "Collapsing duplicates by name");

        let mut removed = 0;
        for id in &ids[1..] {
            if self.delete_locked(id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.inner.write_lock.lock().await
    }

    /// Applies a committed change to the local caches and republishes.
    /// The current scope takes every change to the current branch, plus
    /// changes to records it already holds a copy of.
    fn apply_local(&self, branch: &BranchKey, upserts: Vec<Person>, removals: &[String]) {
        let mut state = self.lock();
        let is_current = &state.current_branch == branch;

        let mut current_changed = false;
        for person in &upserts {
            if is_current || state.current.contains(&person.id) {
                Arc::make_mut(&mut state.current).upsert(person.clone());
                current_changed = true;
            }
        }
        for id in removals {
            if state.current.contains(id) {
                Arc::make_mut(&mut state.current).remove(id);
                current_changed = true;
            }
        }

        let cache = state.branches.entry(branch.clone()).or_default();
        for person in upserts {
            cache.people.upsert(person);
        }
        for id in removals {
            cache.people.remove(id);
        }

        if current_changed {
            self.inner.current_tx.send_replace(state.current.clone());
        }
        self.rebuild_merged(&mut state);
    }
}

/// Copy of `holder_id` with `member` removed from one of its id lists, plus
/// the matching patch. `None` when the holder is unknown or does not list it.
fn without_member(
    snap: &Snapshot,
    holder_id: &str,
    member: &str,
    key: &str,
    list: impl Fn(&mut Person) -> &mut Vec<String>,
) -> Option<(Person, FieldPatch)> {
    let mut holder = snap.get(holder_id)?.clone();
    let ids = list(&mut holder);
    if !ids.iter().any(|existing| existing == member) {
        return None;
    }
    ids.retain(|existing| existing != member);
    let remaining = Value::from(ids.clone());
    Some((holder, FieldPatch::new().set(key, remaining)))
}

/// Local image of a merge write: stored keys the incoming record leaves out
/// keep their values.
fn merged_record(existing: Option<&Person>, incoming: Person) -> Person {
    let Some(existing) = existing else {
        return incoming;
    };
    let mut doc = existing.to_document();
    doc.extend(incoming.to_document());
    match decode_document(&incoming.id, doc, existing.created_at, incoming.updated_at) {
        Ok(person) => person,
        Err(_) => incoming,
    }
}

fn write_failed(branch: &BranchKey, id: &str, err: GatewayError) -> StoreError {
    tracing::error!(branch = %branch, id = %id, error = %err, "Remote write failed");
    StoreError::Transport(err)
}
