//! `DataReader` — an immutable, chainable query builder over the `data` table.

use std::collections::HashMap;

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{models::DataRecordRow, DbError, DbPool};

/// A simple, valid-looking UUID shape check used inside a `CASE WHEN` guard
/// so the reference join never attempts to cast a non-UUID `key` (which
/// would otherwise raise a runtime error even inside a `LEFT JOIN`, since
/// Postgres does not short-circuit plain `AND` the way it does `CASE`).
const UUID_SHAPE_PATTERN: &str = "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";

#[derive(Debug, Clone, Default)]
struct Filters {
    node_ids: Vec<Uuid>,
    data_ids: Vec<Uuid>,
    data_types: Vec<String>,
    data_keys: Vec<String>,
    data_discriminators: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct FetchOptions {
    content: bool,
    metadata: bool,
    resolve_references: bool,
    replace_references: bool,
}

/// Chainable reader over data records scoped to a single workflow.
///
/// Every filter method returns a new `DataReader`; the original is left
/// untouched, so a base reader can be specialised into several branches.
#[derive(Debug, Clone)]
pub struct DataReader {
    dataflow_id: Uuid,
    filters: Filters,
    options: FetchOptions,
}

impl DataReader {
    /// Start a reader scoped to one workflow. By default `content` and
    /// `metadata` are fetched and references are left unresolved.
    pub fn new(dataflow_id: Uuid) -> Self {
        Self {
            dataflow_id,
            filters: Filters::default(),
            options: FetchOptions { content: true, metadata: true, resolve_references: false, replace_references: false },
        }
    }

    pub fn node_ids(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.filters.node_ids.extend(ids);
        self
    }

    pub fn node_id(self, id: Uuid) -> Self {
        self.node_ids([id])
    }

    pub fn data_ids(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.filters.data_ids.extend(ids);
        self
    }

    pub fn data_id(self, id: Uuid) -> Self {
        self.data_ids([id])
    }

    pub fn data_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filters.data_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn data_type(self, data_type: impl Into<String>) -> Self {
        self.data_types([data_type.into()])
    }

    pub fn data_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filters.data_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn data_key(self, key: impl Into<String>) -> Self {
        self.data_keys([key.into()])
    }

    pub fn data_discriminators(mut self, discs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filters.data_discriminators.extend(discs.into_iter().map(Into::into));
        self
    }

    pub fn data_discriminator(self, disc: impl Into<String>) -> Self {
        self.data_discriminators([disc.into()])
    }

    pub fn content(mut self, include: bool) -> Self {
        self.options.content = include;
        self
    }

    pub fn metadata(mut self, include: bool) -> Self {
        self.options.metadata = include;
        self
    }

    pub fn resolve_references(mut self, resolve: bool) -> Self {
        self.options.resolve_references = resolve;
        self
    }

    /// Implies `resolve_references(true)`.
    pub fn replace_references(mut self, replace: bool) -> Self {
        self.options.replace_references = replace;
        if replace {
            self.options.resolve_references = true;
        }
        self
    }

    fn build_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT d.data_id, d.dataflow_id, d.node_id, d.data_type, d.discriminator, d.key, ");

        if self.options.content {
            qb.push("d.content, ");
        } else {
            qb.push("'null'::jsonb AS content, ");
        }

        qb.push("d.content_type, ");

        if self.options.metadata {
            qb.push("d.metadata, ");
        } else {
            qb.push("'{}'::jsonb AS metadata, ");
        }

        qb.push("d.created_at");

        if self.options.resolve_references {
            qb.push(
                ", ref.data_id AS ref_data_id, ref.content AS ref_content, ref.content_type AS ref_content_type, ref.discriminator AS ref_discriminator, ref.key AS ref_key",
            );
        } else {
            qb.push(", NULL::uuid AS ref_data_id, NULL::jsonb AS ref_content, NULL::text AS ref_content_type, NULL::text AS ref_discriminator, NULL::text AS ref_key");
        }

        qb.push(" FROM data d");

        if self.options.resolve_references {
            qb.push(" LEFT JOIN data ref ON ref.dataflow_id = d.dataflow_id AND ref.data_id = (CASE WHEN d.content_type = ");
            qb.push_bind(crate::models::REFERENCE_CONTENT_TYPE);
            qb.push(" AND d.key ~ ");
            qb.push_bind(UUID_SHAPE_PATTERN);
            qb.push(" THEN d.key::uuid ELSE NULL END)");
        }

        qb.push(" WHERE d.dataflow_id = ");
        qb.push_bind(self.dataflow_id);

        if !self.filters.node_ids.is_empty() {
            qb.push(" AND d.node_id = ANY(");
            qb.push_bind(self.filters.node_ids.clone());
            qb.push(")");
        }
        if !self.filters.data_ids.is_empty() {
            qb.push(" AND d.data_id = ANY(");
            qb.push_bind(self.filters.data_ids.clone());
            qb.push(")");
        }
        if !self.filters.data_types.is_empty() {
            qb.push(" AND d.data_type = ANY(");
            qb.push_bind(self.filters.data_types.clone());
            qb.push(")");
        }
        if !self.filters.data_keys.is_empty() {
            qb.push(" AND d.key = ANY(");
            qb.push_bind(self.filters.data_keys.clone());
            qb.push(")");
        }
        if !self.filters.data_discriminators.is_empty() {
            qb.push(" AND d.discriminator = ANY(");
            qb.push_bind(self.filters.data_discriminators.clone());
            qb.push(")");
        }

        qb.push(" ORDER BY d.created_at ASC");

        qb
    }

    /// Run the query and return every matching row, applying
    /// `replace_references` in memory when requested.
    pub async fn all(&self, pool: &DbPool) -> Result<Vec<DataRecordRow>, DbError> {
        let mut rows = self.build_query().build_query_as::<DataRecordRow>().fetch_all(pool).await?;

        if self.options.replace_references {
            for row in &mut rows {
                row.replace_with_referent();
            }
        }

        Ok(rows)
    }

    /// Run the query and return the first matching row, if any.
    pub async fn one(&self, pool: &DbPool) -> Result<Option<DataRecordRow>, DbError> {
        Ok(self.all(pool).await?.into_iter().next())
    }

    pub async fn count(&self, pool: &DbPool) -> Result<i64, DbError> {
        Ok(self.all(pool).await?.len() as i64)
    }

    pub async fn exists(&self, pool: &DbPool) -> Result<bool, DbError> {
        Ok(self.one(pool).await?.is_some())
    }

    /// Resolve every `node_input` record for a node into a `key -> content`
    /// map (used by the node runtime SDK's `inputs()`). Dangling keys (the
    /// empty-string root key included) are preserved verbatim.
    pub async fn input_map(&self, pool: &DbPool) -> Result<HashMap<String, serde_json::Value>, DbError> {
        let rows = self.all(pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.key.unwrap_or_default(), row.content))
            .collect())
    }
}
