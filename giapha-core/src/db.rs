use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

const CREATE_PEOPLE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS people (
        branch      TEXT        NOT NULL,
        id          TEXT        NOT NULL,
        doc         JSONB       NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (branch, id)
    )
"#;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Creates the partition table when missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_PEOPLE_TABLE).execute(pool).await?;
    Ok(())
}

/// Record count per branch, for health reporting.
pub async fn branch_counts(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as("SELECT branch, COUNT(*)::bigint FROM people GROUP BY branch ORDER BY branch")
        .fetch_all(pool)
        .await
}
