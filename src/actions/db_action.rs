//! The DB Action Layer: small, composable wrappers around individual DDL
//! statements. Operations, the Column Duplicator, and the Trigger Builder
//! all emit `Vec<Box<dyn DbAction>>`; the runner executes them in order.
//!
//! Most actions are a single formatted statement (`Raw`); the named
//! wrappers exist for the handful of mutations that recur across many
//! operations and are clearer spelled out than left as ad hoc SQL strings.

use async_trait::async_trait;

use crate::db::Connection;

#[async_trait]
pub trait DbAction: Send + Sync {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()>;
}

/// An arbitrary, already-formatted statement (or batch of statements).
pub struct Raw(pub String);

impl Raw {
    pub fn new(sql: impl Into<String>) -> Box<dyn DbAction> {
        Box::new(Raw(sql.into()))
    }
}

#[async_trait]
impl DbAction for Raw {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run(&self.0).await
    }
}

pub struct RenameTable {
    pub from: String,
    pub to: String,
}

#[async_trait]
impl DbAction for RenameTable {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run(&format!(
            r#"ALTER TABLE IF EXISTS "{}" RENAME TO "{}""#,
            self.from, self.to
        ))
        .await
    }
}

pub struct RenameColumn {
    pub table: String,
    pub from: String,
    pub to: String,
}

#[async_trait]
impl DbAction for RenameColumn {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run(&format!(
            r#"ALTER TABLE "{}" RENAME COLUMN "{}" TO "{}""#,
            self.table, self.from, self.to
        ))
        .await
    }
}

pub struct DropColumn {
    pub table: String,
    pub column: String,
}

#[async_trait]
impl DbAction for DropColumn {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run(&format!(
            r#"ALTER TABLE "{}" DROP COLUMN IF EXISTS "{}""#,
            self.table, self.column
        ))
        .await
    }
}

pub struct DropFunction {
    pub name: String,
}

#[async_trait]
impl DbAction for DropFunction {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run(&format!(r#"DROP FUNCTION IF EXISTS "{}" CASCADE"#, self.name))
            .await
    }
}

pub struct DropTrigger {
    pub table: String,
    pub name: String,
}

#[async_trait]
impl DbAction for DropTrigger {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run(&format!(
            r#"DROP TRIGGER IF EXISTS "{}" ON "{}""#,
            self.name, self.table
        ))
        .await
    }
}

/// Transfers ownership of a column's backing sequence to the shadow column
/// so that `SERIAL`/`IDENTITY` defaults keep working once the shadow is
/// renamed into place at Complete.
pub struct AlterSequenceOwnedBy {
    pub sequence: String,
    pub table: String,
    pub column: String,
}

#[async_trait]
impl DbAction for AlterSequenceOwnedBy {
    async fn execute(&self, conn: &mut dyn Connection) -> anyhow::Result<()> {
        conn.run(&format!(
            r#"ALTER SEQUENCE IF EXISTS "{}" OWNED BY "{}"."{}""#,
            self.sequence, self.table, self.column
        ))
        .await
    }
}
