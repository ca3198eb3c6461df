pub mod common;
pub mod db_action;

pub mod add_column;
pub mod alter_column;
pub mod create_constraint;
pub mod create_index;
pub mod create_table;
pub mod drop_column;
pub mod drop_constraint;
pub mod drop_index;
pub mod drop_multi_column_constraint;
pub mod drop_table;
pub mod raw_sql;
pub mod rename_column;
pub mod rename_constraint;
pub mod rename_table;
pub mod set_replica_identity;

pub use add_column::AddColumn;
pub use alter_column::AlterColumn;
pub use create_constraint::CreateConstraint;
pub use create_index::CreateIndex;
pub use create_table::CreateTable;
pub use drop_column::DropColumn;
pub use drop_constraint::DropConstraint;
pub use drop_index::DropIndex;
pub use drop_multi_column_constraint::DropMultiColumnConstraint;
pub use drop_table::DropTable;
pub use raw_sql::RawSql;
pub use rename_column::RenameColumn;
pub use rename_constraint::RenameConstraint;
pub use rename_table::RenameTable;
pub use set_replica_identity::SetReplicaIdentity;

use async_trait::async_trait;

use crate::backfill::BackfillTask;
use crate::cancellation::CancellationToken;
use crate::db::Connection;
use crate::error::Result as ValidateResult;
use crate::schema::VirtualSchema;

/// Context threaded through the lifecycle calls of a single operation
/// within one migration.
#[derive(Clone)]
pub struct OperationContext {
    pub migration_name: String,
    pub version_schema: String,
    pub cancellation: CancellationToken,
}

/// The Operation contract (spec 4.6): every concrete operation variant
/// implements these four lifecycle methods. `validate` never touches the
/// database; `start`/`complete`/`rollback` return the DB actions the
/// runner should execute, so operations stay testable without a live
/// connection.
#[async_trait]
#[typetag::serde(tag = "type")]
pub trait Operation: Send + Sync + std::fmt::Debug {
    /// Mutates `schema` (a fork, never the live model) to the shape this
    /// operation produces, or fails with a typed error before any DB
    /// mutation happens.
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()>;

    /// Returns the DB actions that expand the schema, plus a backfill task
    /// if existing rows need to be propagated through a new trigger pair.
    async fn start(
        &self,
        schema: &VirtualSchema,
        conn: &mut dyn Connection,
        ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn db_action::DbAction>>, Option<BackfillTask>)>;

    /// Returns the DB actions that contract the schema: drop the original
    /// physical column/constraint, rename the shadow into place, drop
    /// triggers.
    async fn complete(
        &self,
        schema: &VirtualSchema,
        conn: &mut dyn Connection,
        ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn db_action::DbAction>>>;

    /// Returns the DB actions that discard the shadow column/constraint
    /// and triggers, restoring the pre-Start physical shape.
    async fn rollback(
        &self,
        schema: &VirtualSchema,
        conn: &mut dyn Connection,
        ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn db_action::DbAction>>>;

    /// True for an operation that cannot be composed with any other
    /// operation in the same migration (raw SQL without `on_complete`).
    fn is_isolating(&self) -> bool {
        false
    }

    /// True for an operation whose statements must run during Complete
    /// rather than Start (e.g. `raw_sql` with `on_complete: true`).
    fn runs_on_complete(&self) -> bool {
        false
    }
}
