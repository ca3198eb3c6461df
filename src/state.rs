//! The state table collaborator (spec 6): persists migration history and
//! tells the runner whether a schema already has an active migration. Its
//! storage format is opaque to the rest of the crate; this module ships
//! one concrete, Postgres-backed implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::Connection;
use crate::error::MigrationError;
use crate::migration::Migration;
use crate::schema::VirtualSchema;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn is_active_migration(&self, conn: &mut dyn Connection, target_schema: &str) -> anyhow::Result<bool>;

    async fn start(
        &self,
        conn: &mut dyn Connection,
        target_schema: &str,
        name: &str,
        raw_payload: &serde_json::Value,
    ) -> anyhow::Result<()>;

    async fn complete(&self, conn: &mut dyn Connection, target_schema: &str, name: &str) -> anyhow::Result<()>;

    async fn rollback(&self, conn: &mut dyn Connection, target_schema: &str, name: &str) -> anyhow::Result<()>;

    /// Rebuilds the virtual schema resulting from every completed
    /// migration recorded for `target_schema`, in order.
    async fn latest_schema(&self, conn: &mut dyn Connection, target_schema: &str) -> anyhow::Result<VirtualSchema>;

    /// Not one of the five calls the Runner makes; a convenience lookup for
    /// the embedding `Migrator`, which needs the previously completed
    /// migration's version schema name to drop it once the new one
    /// completes. Stores with nothing to report can keep the default.
    async fn last_completed_migration(
        &self,
        _conn: &mut dyn Connection,
        _target_schema: &str,
    ) -> anyhow::Result<Option<Migration>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum MigrationStatus {
    Active,
    Completed,
    RolledBack,
}

/// The default `StateStore`, backed by a `pgroll` schema containing a
/// single `migrations` table.
pub struct PostgresStateStore;

impl PostgresStateStore {
    pub fn new() -> Self {
        PostgresStateStore
    }

    async fn ensure_schema_and_table(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run("CREATE SCHEMA IF NOT EXISTS pgroll").await?;
        conn.run(
            "
            CREATE TABLE IF NOT EXISTS pgroll.migrations (
                id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                target_schema TEXT NOT NULL,
                name TEXT NOT NULL,
                raw_payload JSONB NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                completed_at TIMESTAMPTZ
            )
            ",
        )
        .await?;
        conn.run(
            "CREATE INDEX IF NOT EXISTS pgroll_migrations_active_idx
             ON pgroll.migrations (target_schema, status)",
        )
        .await
    }
}

impl Default for PostgresStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn is_active_migration(&self, conn: &mut dyn Connection, target_schema: &str) -> anyhow::Result<bool> {
        self.ensure_schema_and_table(conn).await?;
        let rows = conn
            .query_with_params(
                "SELECT 1 FROM pgroll.migrations WHERE target_schema = $1 AND status = 'active' LIMIT 1",
                &[&target_schema],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn start(
        &self,
        conn: &mut dyn Connection,
        target_schema: &str,
        name: &str,
        raw_payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        self.ensure_schema_and_table(conn).await?;

        if self.is_active_migration(conn, target_schema).await? {
            return Err(MigrationError::ActiveMigrationExists {
                schema: target_schema.to_string(),
            }
            .into());
        }

        conn.query_with_params(
            "INSERT INTO pgroll.migrations (target_schema, name, raw_payload, status)
             VALUES ($1, $2, $3, 'active')",
            &[&target_schema, &name, raw_payload],
        )
        .await?;
        Ok(())
    }

    async fn complete(&self, conn: &mut dyn Connection, target_schema: &str, name: &str) -> anyhow::Result<()> {
        conn.query_with_params(
            "UPDATE pgroll.migrations SET status = 'completed', completed_at = now()
             WHERE target_schema = $1 AND name = $2 AND status = 'active'",
            &[&target_schema, &name],
        )
        .await?;
        Ok(())
    }

    async fn rollback(&self, conn: &mut dyn Connection, target_schema: &str, name: &str) -> anyhow::Result<()> {
        conn.query_with_params(
            "UPDATE pgroll.migrations SET status = 'rolled_back', completed_at = now()
             WHERE target_schema = $1 AND name = $2 AND status = 'active'",
            &[&target_schema, &name],
        )
        .await?;
        Ok(())
    }

    async fn latest_schema(&self, conn: &mut dyn Connection, target_schema: &str) -> anyhow::Result<VirtualSchema> {
        self.ensure_schema_and_table(conn).await?;

        let rows = conn
            .query_with_params(
                "SELECT raw_payload FROM pgroll.migrations
                 WHERE target_schema = $1 AND status = 'completed'
                 ORDER BY id ASC",
                &[&target_schema],
            )
            .await?;

        let mut schema = VirtualSchema::new();
        for row in rows {
            let payload: serde_json::Value = row.get(0);
            let migration: Migration = serde_json::from_value(payload)?;
            for operation in &migration.operations {
                operation.validate(&mut schema)?;
            }
        }
        Ok(schema)
    }

    async fn last_completed_migration(
        &self,
        conn: &mut dyn Connection,
        target_schema: &str,
    ) -> anyhow::Result<Option<Migration>> {
        self.ensure_schema_and_table(conn).await?;
        let rows = conn
            .query_with_params(
                "SELECT raw_payload FROM pgroll.migrations
                 WHERE target_schema = $1 AND status = 'completed'
                 ORDER BY id DESC LIMIT 1",
                &[&target_schema],
            )
            .await?;
        match rows.first() {
            Some(row) => {
                let payload: serde_json::Value = row.get(0);
                Ok(Some(serde_json::from_value(payload)?))
            }
            None => Ok(None),
        }
    }
}
