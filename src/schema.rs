//! Idempotent DDL bootstrap for the planflow tables.
//!
//! `plan` inspects the live catalog and reports only the actions that
//! are actually missing; `sync` applies them in one transaction. Safe
//! to run at every process start.

use std::collections::HashSet;

use indoc::formatdoc;
use sqlx::PgPool;

use crate::Result;

#[derive(Clone, Debug)]
pub struct SchemaConfig {
    pub base_schema: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            base_schema: "public".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchemaAction {
    description: String,
    sql: String,
}

impl SchemaAction {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[derive(Clone, Debug, Default)]
pub struct SchemaPlan {
    actions: Vec<SchemaAction>,
    warnings: Vec<String>,
}

impl SchemaPlan {
    pub fn actions(&self) -> &[SchemaAction] {
        &self.actions
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn push_action(&mut self, description: impl Into<String>, sql: impl Into<String>) {
        self.actions.push(SchemaAction {
            description: description.into(),
            sql: sql.into(),
        });
    }
}

#[derive(Clone, Debug)]
pub struct SchemaManager {
    pool: PgPool,
}

impl SchemaManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn plan(&self, config: &SchemaConfig) -> Result<SchemaPlan> {
        let mut plan = SchemaPlan::default();
        let schema = config.base_schema.trim();

        let schema_exists = self.schema_exists(schema).await?;
        if !schema_exists {
            plan.push_action(
                format!("create schema {}", quote_ident(schema)),
                format!("create schema if not exists {}", quote_ident(schema)),
            );
        }

        let existing_tables = if schema_exists {
            self.existing_tables(schema).await?
        } else {
            HashSet::new()
        };
        let existing_indexes = if schema_exists {
            self.existing_indexes(schema).await?
        } else {
            HashSet::new()
        };

        if !existing_tables.contains("plans") {
            plan.push_action(
                format!("create table {}.plans", quote_ident(schema)),
                build_plans_table_sql(schema),
            );
        }
        if !existing_tables.contains("change_feed") {
            plan.push_action(
                format!("create table {}.change_feed", quote_ident(schema)),
                build_change_feed_table_sql(schema),
            );
        }
        if !existing_tables.contains("change_feed_offsets") {
            plan.push_action(
                format!("create table {}.change_feed_offsets", quote_ident(schema)),
                build_change_feed_offsets_table_sql(schema),
            );
        }
        if !existing_tables.contains("search_docs") {
            plan.push_action(
                format!("create table {}.search_docs", quote_ident(schema)),
                build_search_docs_table_sql(schema),
            );
        }
        if !existing_indexes.contains("idx_search_docs_kind_parent") {
            plan.push_action(
                "create index idx_search_docs_kind_parent",
                formatdoc!(
                    "create index if not exists idx_search_docs_kind_parent
                     on {schema}.search_docs (kind, parent)",
                    schema = quote_ident(schema),
                ),
            );
        }

        Ok(plan)
    }

    pub async fn apply(&self, plan: &SchemaPlan) -> Result<()> {
        if plan.actions.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for action in &plan.actions {
            sqlx::query(action.sql()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn sync(&self, config: &SchemaConfig) -> Result<SchemaPlan> {
        let plan = self.plan(config).await?;
        if !plan.is_empty() {
            self.apply(&plan).await?;
        }
        Ok(plan)
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "select exists (select 1 from information_schema.schemata where schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn existing_tables(&self, schema: &str) -> Result<HashSet<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "select table_name from information_schema.tables where table_schema = $1",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn existing_indexes(&self, schema: &str) -> Result<HashSet<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("select indexname from pg_indexes where schemaname = $1")
                .bind(schema)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}

fn build_plans_table_sql(schema: &str) -> String {
    formatdoc!(
        "create table if not exists {schema}.plans (
             id         text primary key,
             doc        jsonb not null,
             created_at timestamptz not null default now(),
             updated_at timestamptz not null default now()
         )",
        schema = quote_ident(schema),
    )
}

fn build_change_feed_table_sql(schema: &str) -> String {
    formatdoc!(
        "create table if not exists {schema}.change_feed (
             seq        bigserial primary key,
             operation  text not null,
             document   jsonb not null,
             created_at timestamptz not null default now()
         )",
        schema = quote_ident(schema),
    )
}

fn build_change_feed_offsets_table_sql(schema: &str) -> String {
    formatdoc!(
        "create table if not exists {schema}.change_feed_offsets (
             consumer   text primary key,
             last_seq   bigint not null default 0,
             updated_at timestamptz not null default now()
         )",
        schema = quote_ident(schema),
    )
}

fn build_search_docs_table_sql(schema: &str) -> String {
    formatdoc!(
        "create table if not exists {schema}.search_docs (
             id         text not null,
             parent     text not null default '',
             kind       text not null,
             routing    text,
             doc        jsonb not null,
             updated_at timestamptz not null default now(),
             primary key (id, parent)
         )",
        schema = quote_ident(schema),
    )
}

pub(crate) fn quote_ident(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}
