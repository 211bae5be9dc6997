//! PostgreSQL partition store.
//!
//! All branches share the `people` table keyed by `(branch, id)`. Every
//! committed change sends `pg_notify(channel, branch)` inside its transaction;
//! subscribers `LISTEN` on the channel and re-read the whole branch when their
//! branch is named, so each emission is a full record set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{Map, Value};
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::{decode_document, BatchOp, FieldPatch, PartitionGateway, Subscription};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::models::{BranchKey, Person};

/// Pause between listener reconnect rounds once retries are exhausted.
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

const REPLACE_SQL: &str = r#"
    INSERT INTO people (branch, id, doc, created_at, updated_at)
    VALUES ($1, $2, $3, now(), now())
    ON CONFLICT (branch, id)
    DO UPDATE SET doc = EXCLUDED.doc, created_at = now(), updated_at = now()
"#;

const MERGE_SQL: &str = r#"
    INSERT INTO people (branch, id, doc)
    VALUES ($1, $2, $3)
    ON CONFLICT (branch, id)
    DO UPDATE SET doc = people.doc || EXCLUDED.doc, updated_at = now()
"#;

const PATCH_SQL: &str = r#"
    UPDATE people
    SET doc = (doc || $3) - $4::text[], updated_at = now()
    WHERE branch = $1 AND id = $2
"#;

const DELETE_SQL: &str = "DELETE FROM people WHERE branch = $1 AND id = $2";

#[derive(Debug, Clone)]
pub struct PgGateway {
    pool: PgPool,
    channel: String,
    reconnect_attempts: usize,
    reconnect_delay_ms: u64,
}

impl PgGateway {
    pub fn new(pool: PgPool, config: &GatewayConfig) -> Self {
        Self {
            pool,
            channel: config.notify_channel.clone(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay_ms: config.reconnect_delay_ms,
        }
    }

    async fn notify(&self, tx: &mut Transaction<'_, Postgres>, branch: &BranchKey) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(branch.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn write_tx(&self, branch: &BranchKey, person: &Person, merge: bool) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        upsert(&mut tx, branch, person, merge).await?;
        self.notify(&mut tx, branch).await?;
        tx.commit().await
    }

    async fn batch_tx(&self, branch: &BranchKey, ops: &[BatchOp]) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for op in ops {
            match op {
                BatchOp::Insert(person) => upsert(&mut tx, branch, person, false).await.map_err(classify)?,
                BatchOp::Upsert(person) => upsert(&mut tx, branch, person, true).await.map_err(classify)?,
                BatchOp::Patch { id, patch } => patch_record(&mut tx, branch, id, patch).await?,
                BatchOp::Delete { id } => {
                    sqlx::query(DELETE_SQL)
                        .bind(branch.as_str())
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(classify)?;
                }
            }
        }
        self.notify(&mut tx, branch).await.map_err(classify)?;
        // Dropping an uncommitted transaction rolls it back.
        tx.commit().await.map_err(classify)
    }
}

async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    branch: &BranchKey,
    person: &Person,
    merge: bool,
) -> Result<(), sqlx::Error> {
    let sql = if merge { MERGE_SQL } else { REPLACE_SQL };
    sqlx::query(sql)
        .bind(branch.as_str())
        .bind(&person.id)
        .bind(Json(Value::Object(person.to_document())))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn patch_record(
    tx: &mut Transaction<'_, Postgres>,
    branch: &BranchKey,
    id: &str,
    patch: &FieldPatch,
) -> Result<(), GatewayError> {
    let result = sqlx::query(PATCH_SQL)
        .bind(branch.as_str())
        .bind(id)
        .bind(Json(Value::Object(patch.set.clone())))
        .bind(patch.remove.as_slice())
        .execute(&mut **tx)
        .await
        .map_err(classify)?;
    if result.rows_affected() == 0 {
        return Err(GatewayError::RecordNotFound {
            branch: branch.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Reads the full record set of one branch.
async fn load_branch(pool: &PgPool, branch: &BranchKey) -> Result<Vec<Person>, GatewayError> {
    let rows: Vec<(String, Json<Value>, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT id, doc, created_at, updated_at
        FROM people
        WHERE branch = $1
        ORDER BY id
        "#,
    )
    .bind(branch.as_str())
    .fetch_all(pool)
    .await
    .map_err(classify)?;

    let mut people = Vec::with_capacity(rows.len());
    for (id, Json(doc), created_at, updated_at) in rows {
        let body: Map<String, Value> = match serde_json::from_value(doc) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(branch = %branch, id = %id, error = %e, "Skipping non-object document");
                continue;
            }
        };
        match decode_document(&id, body, Some(created_at), Some(updated_at)) {
            Ok(person) => people.push(person),
            Err(e) => tracing::warn!(branch = %branch, id = %id, error = %e, "Skipping malformed record"),
        }
    }
    Ok(people)
}

async fn connect_listener(pool: &PgPool, channel: &str) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(channel).await?;
    Ok(listener)
}

/// Maps driver errors onto the gateway taxonomy.
fn classify(err: sqlx::Error) -> GatewayError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            GatewayError::Transport(err.to_string())
        }
        sqlx::Error::Database(db) if db.code().as_deref() == Some("42501") => {
            GatewayError::PermissionDenied(db.message().to_string())
        }
        _ => GatewayError::Database(err),
    }
}

struct ListenerTask {
    pool: PgPool,
    channel: String,
    branch: BranchKey,
    attempts: usize,
    delay_ms: u64,
    tx: mpsc::UnboundedSender<Result<Vec<Person>, GatewayError>>,
}

impl ListenerTask {
    /// Runs until the subscriber drops its stream.
    async fn run(self) {
        while !self.tx.is_closed() {
            let strategy = ExponentialBackoff::from_millis(self.delay_ms)
                .max_delay(Duration::from_secs(10))
                .map(jitter)
                .take(self.attempts);

            let mut listener =
                match Retry::spawn(strategy, || connect_listener(&self.pool, &self.channel)).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        tracing::warn!(branch = %self.branch, error = %e, "Listener connect failed");
                        if self.tx.send(Err(classify(e))).is_err() {
                            return;
                        }
                        tokio::time::sleep(RECONNECT_PAUSE).await;
                        continue;
                    }
                };

            if !self.reload().await {
                return;
            }

            loop {
                tokio::select! {
                    _ = self.tx.closed() => return,
                    notification = listener.recv() => match notification {
                        Ok(n) if n.payload() == self.branch.as_str() => {
                            if !self.reload().await {
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(branch = %self.branch, error = %e, "Listener dropped, reconnecting");
                            if self.tx.send(Err(classify(e))).is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Sends the current branch contents; false once the subscriber is gone.
    async fn reload(&self) -> bool {
        let emission = load_branch(&self.pool, &self.branch).await;
        self.tx.send(emission).is_ok()
    }
}

#[async_trait]
impl PartitionGateway for PgGateway {
    async fn subscribe(&self, branch: &BranchKey) -> Result<Subscription, GatewayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = ListenerTask {
            pool: self.pool.clone(),
            channel: self.channel.clone(),
            branch: branch.clone(),
            attempts: self.reconnect_attempts,
            delay_ms: self.reconnect_delay_ms,
            tx,
        };
        tokio::spawn(task.run());
        tracing::debug!(branch = %branch, channel = %self.channel, "Postgres subscription opened");

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        Ok(stream.boxed())
    }

    async fn write(&self, branch: &BranchKey, person: &Person, merge: bool) -> Result<(), GatewayError> {
        self.write_tx(branch, person, merge).await.map_err(classify)
    }

    async fn atomic_batch(&self, branch: &BranchKey, ops: Vec<BatchOp>) -> Result<(), GatewayError> {
        tracing::debug!(branch = %branch, ops = ops.len(), "Committing atomic batch");
        self.batch_tx(branch, &ops).await
    }

    async fn delete_record(&self, branch: &BranchKey, id: &str) -> Result<(), GatewayError> {
        self.atomic_batch(branch, vec![BatchOp::Delete { id: id.to_string() }])
            .await
    }

    async fn update_fields(&self, branch: &BranchKey, id: &str, patch: &FieldPatch) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        patch_record(&mut tx, branch, id, patch).await?;
        self.notify(&mut tx, branch).await.map_err(classify)?;
        tx.commit().await.map_err(classify)
    }

    async fn probe_non_empty(&self, branch: &BranchKey) -> Result<bool, GatewayError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM people WHERE branch = $1)")
            .bind(branch.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
