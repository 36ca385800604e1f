//! Data record (`data` table) CRUD operations.

use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{models::DataRecordRow, DbError};

/// Insert a new data record.
#[allow(clippy::too_many_arguments)]
pub async fn insert_data<'e, E>(
    executor: E,
    data_id: Uuid,
    dataflow_id: Uuid,
    node_id: Option<Uuid>,
    data_type: &str,
    discriminator: Option<&str>,
    key: Option<&str>,
    content: serde_json::Value,
    content_type: &str,
    metadata: serde_json::Value,
) -> Result<DataRecordRow, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, DataRecordRow>(
        r#"
        INSERT INTO data
            (data_id, dataflow_id, node_id, data_type, discriminator, key, content, content_type, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
        RETURNING
            data_id, dataflow_id, node_id, data_type, discriminator, key, content, content_type, metadata, created_at,
            NULL::uuid AS ref_data_id, NULL::jsonb AS ref_content, NULL::text AS ref_content_type,
            NULL::text AS ref_discriminator, NULL::text AS ref_key
        "#,
    )
    .bind(data_id)
    .bind(dataflow_id)
    .bind(node_id)
    .bind(data_type)
    .bind(discriminator)
    .bind(key)
    .bind(content)
    .bind(content_type)
    .bind(metadata)
    .fetch_one(executor)
    .await?;

    Ok(row)
}

/// Fetch a single data record by id (no reference resolution).
pub async fn get_data<'e, E>(executor: E, data_id: Uuid) -> Result<Option<DataRecordRow>, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, DataRecordRow>(
        r#"
        SELECT
            data_id, dataflow_id, node_id, data_type, discriminator, key, content, content_type, metadata, created_at,
            NULL::uuid AS ref_data_id, NULL::jsonb AS ref_content, NULL::text AS ref_content_type,
            NULL::text AS ref_discriminator, NULL::text AS ref_key
        FROM data WHERE data_id = $1
        "#,
    )
    .bind(data_id)
    .fetch_optional(executor)
    .await?;

    Ok(row)
}

/// Sparse update of content/metadata. Returns rows affected.
pub async fn update_data<'e, E>(
    executor: E,
    data_id: Uuid,
    content: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
) -> Result<u64, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE data
        SET
            content = COALESCE($2, content),
            metadata = COALESCE($3, metadata)
        WHERE data_id = $1
        "#,
    )
    .bind(data_id)
    .bind(content)
    .bind(metadata)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Point delete. Returns rows affected.
pub async fn delete_data<'e, E>(executor: E, data_id: Uuid) -> Result<u64, DbError>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM data WHERE data_id = $1")
        .bind(data_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
