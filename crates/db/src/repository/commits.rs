//! Commit log (`dataflow_commits` table) operations.

use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{models::CommitRow, DbError};

/// Insert a new, immutable commit row. `commit_id` is expected to be a
/// UUIDv7 (time-ordered) generated by the caller.
pub async fn insert_commit<'e, E>(
    executor: E,
    commit_id: Uuid,
    dataflow_id: Uuid,
    payload: serde_json::Value,
    metadata: serde_json::Value,
) -> Result<CommitRow, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, CommitRow>(
        r#"
        INSERT INTO dataflow_commits (commit_id, dataflow_id, payload, metadata, created_at)
        VALUES ($1, $2, $3, $4, now())
        RETURNING commit_id, dataflow_id, payload, metadata, created_at
        "#,
    )
    .bind(commit_id)
    .bind(dataflow_id)
    .bind(payload)
    .bind(metadata)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Fetch a single commit, scoped to `dataflow_id` — commits never cross
/// workflows.
pub async fn get_commit<'e, E>(
    executor: E,
    dataflow_id: Uuid,
    commit_id: Uuid,
) -> Result<Option<CommitRow>, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, CommitRow>(
        r#"
        SELECT commit_id, dataflow_id, payload, metadata, created_at
        FROM dataflow_commits
        WHERE dataflow_id = $1 AND commit_id = $2
        "#,
    )
    .bind(dataflow_id)
    .bind(commit_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Commit ids strictly greater than `after`, ascending — the "pending
/// commits" set for a workflow whose `last_commit_id` is `after`.
pub async fn pending_commit_ids<'e, E>(
    executor: E,
    dataflow_id: Uuid,
    after: Option<Uuid>,
) -> Result<Vec<Uuid>, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT commit_id FROM dataflow_commits
        WHERE dataflow_id = $1 AND ($2::uuid IS NULL OR commit_id > $2)
        ORDER BY commit_id ASC
        "#,
    )
    .bind(dataflow_id)
    .bind(after)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
