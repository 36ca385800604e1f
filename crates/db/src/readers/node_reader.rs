//! `NodeReader` — an immutable, chainable query builder over the `nodes` table.

use std::collections::HashMap;

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{models::NodeRow, DbError, DbPool};

#[derive(Debug, Clone, Default)]
struct Filters {
    node_ids: Vec<Uuid>,
    parent_node_ids: Vec<Uuid>,
    node_types: Vec<String>,
    statuses: Vec<String>,
    statuses_excluded: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct FetchOptions {
    config: bool,
    metadata: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { config: true, metadata: true }
    }
}

/// Chainable reader over node rows scoped to a single workflow.
#[derive(Debug, Clone)]
pub struct NodeReader {
    dataflow_id: Uuid,
    filters: Filters,
    options: FetchOptions,
}

impl NodeReader {
    pub fn new(dataflow_id: Uuid) -> Self {
        Self { dataflow_id, filters: Filters::default(), options: FetchOptions::default() }
    }

    pub fn node_ids(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.filters.node_ids.extend(ids);
        self
    }

    pub fn node_id(self, id: Uuid) -> Self {
        self.node_ids([id])
    }

    pub fn parent_node_ids(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.filters.parent_node_ids.extend(ids);
        self
    }

    pub fn parent_node_id(self, id: Uuid) -> Self {
        self.parent_node_ids([id])
    }

    pub fn node_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filters.node_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn node_type(self, node_type: impl Into<String>) -> Self {
        self.node_types([node_type.into()])
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filters.statuses.extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn status(self, status: impl Into<String>) -> Self {
        self.statuses([status.into()])
    }

    pub fn statuses_excluded(mut self, statuses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filters.statuses_excluded.extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn config(mut self, include: bool) -> Self {
        self.options.config = include;
        self
    }

    pub fn metadata(mut self, include: bool) -> Self {
        self.options.metadata = include;
        self
    }

    fn build_query(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT node_id, dataflow_id, parent_node_id, node_type, status, ");

        if self.options.config {
            qb.push("config, ");
        } else {
            qb.push("'{}'::jsonb AS config, ");
        }

        if self.options.metadata {
            qb.push("metadata, ");
        } else {
            qb.push("'{}'::jsonb AS metadata, ");
        }

        qb.push("created_at, updated_at FROM nodes WHERE dataflow_id = ");
        qb.push_bind(self.dataflow_id);

        if !self.filters.node_ids.is_empty() {
            qb.push(" AND node_id = ANY(");
            qb.push_bind(self.filters.node_ids.clone());
            qb.push(")");
        }
        if !self.filters.parent_node_ids.is_empty() {
            qb.push(" AND parent_node_id = ANY(");
            qb.push_bind(self.filters.parent_node_ids.clone());
            qb.push(")");
        }
        if !self.filters.node_types.is_empty() {
            qb.push(" AND node_type = ANY(");
            qb.push_bind(self.filters.node_types.clone());
            qb.push(")");
        }
        if !self.filters.statuses.is_empty() {
            qb.push(" AND status = ANY(");
            qb.push_bind(self.filters.statuses.clone());
            qb.push(")");
        }
        if !self.filters.statuses_excluded.is_empty() {
            qb.push(" AND NOT (status = ANY(");
            qb.push_bind(self.filters.statuses_excluded.clone());
            qb.push("))");
        }

        qb.push(" ORDER BY created_at ASC");

        qb
    }

    pub async fn all(&self, pool: &DbPool) -> Result<Vec<NodeRow>, DbError> {
        let rows = self.build_query().build_query_as::<NodeRow>().fetch_all(pool).await?;
        Ok(rows)
    }

    pub async fn one(&self, pool: &DbPool) -> Result<Option<NodeRow>, DbError> {
        Ok(self.all(pool).await?.into_iter().next())
    }

    pub async fn count(&self, pool: &DbPool) -> Result<i64, DbError> {
        Ok(self.all(pool).await?.len() as i64)
    }

    pub async fn exists(&self, pool: &DbPool) -> Result<bool, DbError> {
        Ok(self.one(pool).await?.is_some())
    }

    pub async fn count_by_status(&self, pool: &DbPool) -> Result<HashMap<String, i64>, DbError> {
        let rows = self.all(pool).await?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for row in rows {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
