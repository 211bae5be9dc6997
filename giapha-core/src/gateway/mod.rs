//! Remote partition gateway: the contract between the graph store and the
//! document store holding one collection of person records per branch.
//!
//! Implementations:
//! - **InMemoryGateway**: process-local partitions with fault injection
//! - **PgGateway**: PostgreSQL `people` table with `LISTEN/NOTIFY` push

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::models::{BranchKey, Person};

pub use memory::InMemoryGateway;
pub use postgres::PgGateway;

/// Each item is the complete current record set of one branch, never a delta.
pub type Subscription = BoxStream<'static, Result<Vec<Person>, GatewayError>>;

/// One write inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Full overwrite; the store assigns fresh creation and update times.
    Insert(Person),
    /// Merge write; keys absent from the record keep their stored values.
    Upsert(Person),
    /// Field-level update of an existing record.
    Patch { id: String, patch: FieldPatch },
    Delete { id: String },
}

impl BatchOp {
    pub fn id(&self) -> &str {
        match self {
            Self::Insert(p) | Self::Upsert(p) => &p.id,
            Self::Patch { id, .. } | Self::Delete { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Upsert(_) => "upsert",
            Self::Patch { .. } => "patch",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Partial update: fields to overwrite and fields to remove.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPatch {
    pub set: Map<String, Value>,
    pub remove: Vec<String>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.remove.retain(|k| k != key);
        self.set.insert(key.to_string(), value.into());
        self
    }

    pub fn remove(mut self, key: &str) -> Self {
        self.set.remove(key);
        if !self.remove.iter().any(|k| k == key) {
            self.remove.push(key.to_string());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Applies the patch to a stored document body.
    pub fn apply_to(&self, doc: &mut Map<String, Value>) {
        for (key, value) in &self.set {
            doc.insert(key.clone(), value.clone());
        }
        for key in &self.remove {
            doc.remove(key);
        }
    }
}

/// Abstraction over the remote document store.
#[async_trait]
pub trait PartitionGateway: Send + Sync {
    /// Live feed of a branch. Dropping the stream unsubscribes.
    async fn subscribe(&self, branch: &BranchKey) -> Result<Subscription, GatewayError>;

    /// Point upsert. With `merge`, keys absent from the record keep their
    /// stored values; without it the record replaces the document.
    async fn write(&self, branch: &BranchKey, person: &Person, merge: bool)
        -> Result<(), GatewayError>;

    /// All-or-nothing application of `ops` to one branch.
    async fn atomic_batch(&self, branch: &BranchKey, ops: Vec<BatchOp>)
        -> Result<(), GatewayError>;

    async fn delete_record(&self, branch: &BranchKey, id: &str) -> Result<(), GatewayError>;

    /// Fails with `RecordNotFound` when the record does not exist.
    async fn update_fields(
        &self,
        branch: &BranchKey,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<(), GatewayError>;

    /// Whether the branch holds at least one record.
    async fn probe_non_empty(&self, branch: &BranchKey) -> Result<bool, GatewayError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Decodes a stored document body plus its timestamps into a record.
pub(crate) fn decode_document(
    id: &str,
    mut doc: Map<String, Value>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<Person, GatewayError> {
    doc.insert("id".to_string(), Value::String(id.to_string()));
    let mut person: Person = serde_json::from_value(Value::Object(doc))?;
    person.created_at = created_at;
    person.updated_at = updated_at;
    Ok(person)
}
