//! Node (`nodes` table) CRUD operations.

use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{models::NodeRow, DbError};

/// Insert a new node row.
pub async fn insert_node<'e, E>(
    executor: E,
    node_id: Uuid,
    dataflow_id: Uuid,
    parent_node_id: Option<Uuid>,
    node_type: &str,
    status: &str,
    config: serde_json::Value,
    metadata: serde_json::Value,
) -> Result<NodeRow, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, NodeRow>(
        r#"
        INSERT INTO nodes
            (node_id, dataflow_id, parent_node_id, node_type, status, config, metadata, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())
        RETURNING node_id, dataflow_id, parent_node_id, node_type, status, config, metadata, created_at, updated_at
        "#,
    )
    .bind(node_id)
    .bind(dataflow_id)
    .bind(parent_node_id)
    .bind(node_type)
    .bind(status)
    .bind(config)
    .bind(metadata)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Fetch a single node, row-locked for update.
pub async fn get_node_for_update<'e, E>(executor: E, node_id: Uuid) -> Result<Option<NodeRow>, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, NodeRow>(
        r#"
        SELECT node_id, dataflow_id, parent_node_id, node_type, status, config, metadata, created_at, updated_at
        FROM nodes WHERE node_id = $1
        FOR UPDATE
        "#,
    )
    .bind(node_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Fetch a single node by id.
pub async fn get_node<'e, E>(executor: E, node_id: Uuid) -> Result<Option<NodeRow>, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, NodeRow>(
        r#"
        SELECT node_id, dataflow_id, parent_node_id, node_type, status, config, metadata, created_at, updated_at
        FROM nodes WHERE node_id = $1
        "#,
    )
    .bind(node_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Sparse update. Returns the number of rows affected (0 ⇒ "not found").
pub async fn update_node<'e, E>(
    executor: E,
    node_id: Uuid,
    status: Option<&str>,
    config: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
) -> Result<u64, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET
            status = COALESCE($2, status),
            config = COALESCE($3, config),
            metadata = COALESCE($4, metadata),
            updated_at = now()
        WHERE node_id = $1
        "#,
    )
    .bind(node_id)
    .bind(status)
    .bind(config)
    .bind(metadata)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Point delete. Returns the number of rows affected (0 ⇒ "not found").
pub async fn delete_node<'e, E>(executor: E, node_id: Uuid) -> Result<u64, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM nodes WHERE node_id = $1")
        .bind(node_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
