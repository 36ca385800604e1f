//! Workflow (`dataflows` table) CRUD operations.

use chrono::Utc;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{models::WorkflowRow, DbError};

/// Insert a new workflow row. `status` and `metadata` are provided by the
/// caller (the `ops` crate applies the `CREATE_WORKFLOW` defaults).
pub async fn insert_workflow<'e, E>(
    executor: E,
    dataflow_id: Uuid,
    parent_dataflow_id: Option<Uuid>,
    actor_id: &str,
    workflow_type: &str,
    status: &str,
    metadata: serde_json::Value,
) -> Result<WorkflowRow, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let now = Utc::now();
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO dataflows
            (dataflow_id, parent_dataflow_id, actor_id, workflow_type, status, metadata, last_commit_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $7)
        RETURNING dataflow_id, parent_dataflow_id, actor_id, workflow_type, status, metadata, last_commit_id, created_at, updated_at
        "#,
    )
    .bind(dataflow_id)
    .bind(parent_dataflow_id)
    .bind(actor_id)
    .bind(workflow_type)
    .bind(status)
    .bind(metadata)
    .bind(now)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Fetch a workflow by id, row-locking it when called inside a transaction
/// (`FOR UPDATE`), so concurrent commits on the same workflow serialise.
pub async fn get_workflow_for_update<'e, E>(
    executor: E,
    dataflow_id: Uuid,
) -> Result<WorkflowRow, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT dataflow_id, parent_dataflow_id, actor_id, workflow_type, status, metadata, last_commit_id, created_at, updated_at
        FROM dataflows WHERE dataflow_id = $1
        FOR UPDATE
        "#,
    )
    .bind(dataflow_id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Fetch a single workflow by its primary key (no row lock).
pub async fn get_workflow<'e, E>(executor: E, dataflow_id: Uuid) -> Result<WorkflowRow, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT dataflow_id, parent_dataflow_id, actor_id, workflow_type, status, metadata, last_commit_id, created_at, updated_at
        FROM dataflows WHERE dataflow_id = $1
        "#,
    )
    .bind(dataflow_id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return all workflows ordered by creation time (newest first).
pub async fn list_workflows<'e, E>(executor: E) -> Result<Vec<WorkflowRow>, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT dataflow_id, parent_dataflow_id, actor_id, workflow_type, status, metadata, last_commit_id, created_at, updated_at
        FROM dataflows ORDER BY created_at DESC
        "#,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Sparse update of a workflow row. Every `Option` left `None` leaves the
/// column untouched. Metadata merge/replace semantics are the `ops` crate's
/// responsibility — by the time this is called, `metadata` already holds
/// the final value to store.
pub async fn update_workflow<'e, E>(
    executor: E,
    dataflow_id: Uuid,
    status: Option<&str>,
    last_commit_id: Option<Uuid>,
    metadata: Option<serde_json::Value>,
) -> Result<u64, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE dataflows
        SET
            status = COALESCE($2, status),
            last_commit_id = COALESCE($3, last_commit_id),
            metadata = COALESCE($4, metadata),
            updated_at = now()
        WHERE dataflow_id = $1
        "#,
    )
    .bind(dataflow_id)
    .bind(status)
    .bind(last_commit_id)
    .bind(metadata)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Touch `updated_at` without otherwise changing the row.
pub async fn touch_updated_at<'e, E>(executor: E, dataflow_id: Uuid) -> Result<(), DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE dataflows SET updated_at = now() WHERE dataflow_id = $1")
        .bind(dataflow_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Permanently delete a workflow. Returns `DbError::NotFound` when no row
/// was deleted — deleting a workflow is a hard failure, unlike node/data
/// deletes.
pub async fn delete_workflow<'e, E>(executor: E, dataflow_id: Uuid) -> Result<(), DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM dataflows WHERE dataflow_id = $1")
        .bind(dataflow_id)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
