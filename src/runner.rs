//! The Migration Runner: drives Start/Complete/Rollback over an ordered
//! list of operations, per spec 4.8.

use std::collections::HashSet;

use tokio_postgres::Config;

use crate::actions::OperationContext;
use crate::backfill::BackfillTask;
use crate::cancellation::CancellationToken;
use crate::db::Connection;
use crate::identifiers::NEEDS_BACKFILL_COLUMN;
use crate::migration::Migration;
use crate::schema::VirtualSchema;
use crate::state::StateStore;
use crate::view;

pub struct Runner<'a> {
    pub state: &'a dyn StateStore,
    pub target_schema: String,
    pub db_config: Config,
    pub cancellation: CancellationToken,
}

impl<'a> Runner<'a> {
    pub fn new(state: &'a dyn StateStore, target_schema: impl Into<String>, db_config: Config) -> Self {
        Runner {
            state,
            target_schema: target_schema.into(),
            db_config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Step 1-5: validates the migration, expands the schema, and backfills
    /// existing rows. Leaves the migration marked active on success or
    /// failure alike; Rollback is the recovery path either way.
    pub async fn start(&self, conn: &mut dyn Connection, migration: &Migration) -> anyhow::Result<VirtualSchema> {
        migration.validate_shape()?;

        let mut schema = self.state.latest_schema(conn, &self.target_schema).await?;

        // Fail fast against a throwaway fork before touching the database
        // or recording the migration as active.
        let mut fork = schema.fork();
        for operation in &migration.operations {
            operation.validate(&mut fork)?;
        }

        let raw_payload = serde_json::to_value(migration)?;
        self.state
            .start(conn, &self.target_schema, &migration.name, &raw_payload)
            .await?;

        let ctx = OperationContext {
            migration_name: migration.name.clone(),
            version_schema: migration.version_schema().to_string(),
            cancellation: self.cancellation.clone(),
        };

        view::create_is_new_schema_function(conn, &ctx.version_schema).await?;

        let mut backfills: Vec<BackfillTask> = Vec::new();
        let mut sentinel_tables: HashSet<String> = HashSet::new();

        for operation in &migration.operations {
            self.cancellation.check()?;

            let (actions, backfill) = operation.start(&schema, conn, &ctx).await?;
            for action in &actions {
                action.execute(conn).await?;
            }

            // Commit this operation's effect on the live model so later
            // operations in the same migration see it.
            operation.validate(&mut schema)?;

            if let Some(task) = backfill {
                sentinel_tables.insert(task.table.clone());
                backfills.push(task);
            }
        }

        view::create_version_schema(conn, &schema, &ctx.version_schema).await?;

        for table in &sentinel_tables {
            conn.run(&format!(
                r#"ALTER TABLE "{table}" ADD COLUMN IF NOT EXISTS "{sentinel}" boolean DEFAULT false"#,
                table = table,
                sentinel = NEEDS_BACKFILL_COLUMN,
            ))
            .await?;
        }

        for task in &backfills {
            task.run(&self.db_config, &self.cancellation).await?;
        }

        Ok(schema)
    }

    /// Step 6: contracts the schema and marks the migration completed.
    pub async fn complete(
        &self,
        conn: &mut dyn Connection,
        migration: &Migration,
        previous_version_schema: Option<&str>,
    ) -> anyhow::Result<()> {
        let schema = self.state.latest_schema(conn, &self.target_schema).await?;
        let ctx = OperationContext {
            migration_name: migration.name.clone(),
            version_schema: migration.version_schema().to_string(),
            cancellation: self.cancellation.clone(),
        };

        let mut sentinel_tables: HashSet<String> = HashSet::new();
        for table in schema.tables() {
            if table.get_column(NEEDS_BACKFILL_COLUMN).is_some() {
                sentinel_tables.insert(table.name.clone());
            }
        }

        for operation in &migration.operations {
            self.cancellation.check()?;
            let actions = operation.complete(&schema, conn, &ctx).await?;
            for action in &actions {
                action.execute(conn).await?;
            }
        }

        drop_sentinel_columns(conn, &sentinel_tables).await?;
        view::drop_is_new_schema_function(conn).await?;

        if let Some(previous) = previous_version_schema {
            view::drop_version_schema(conn, previous).await?;
        }

        self.state.complete(conn, &self.target_schema, &migration.name).await?;
        Ok(())
    }

    /// Step 7: discards the expanded shape in reverse operation order and
    /// marks the migration rolled back.
    pub async fn rollback(&self, conn: &mut dyn Connection, migration: &Migration) -> anyhow::Result<()> {
        let schema = self.state.latest_schema(conn, &self.target_schema).await?;
        let ctx = OperationContext {
            migration_name: migration.name.clone(),
            version_schema: migration.version_schema().to_string(),
            cancellation: self.cancellation.clone(),
        };

        let mut sentinel_tables: HashSet<String> = HashSet::new();
        for table in schema.tables() {
            if table.get_column(NEEDS_BACKFILL_COLUMN).is_some() {
                sentinel_tables.insert(table.name.clone());
            }
        }

        for operation in migration.operations.iter().rev() {
            let actions = operation.rollback(&schema, conn, &ctx).await?;
            for action in &actions {
                action.execute(conn).await?;
            }
        }

        drop_sentinel_columns(conn, &sentinel_tables).await?;
        view::drop_is_new_schema_function(conn).await?;
        view::drop_version_schema(conn, &ctx.version_schema).await?;

        self.state.rollback(conn, &self.target_schema, &migration.name).await?;
        Ok(())
    }
}

async fn drop_sentinel_columns(conn: &mut dyn Connection, tables: &HashSet<String>) -> anyhow::Result<()> {
    for table in tables {
        conn.run(&format!(
            r#"ALTER TABLE "{table}" DROP COLUMN IF EXISTS "{sentinel}""#,
            table = table,
            sentinel = NEEDS_BACKFILL_COLUMN,
        ))
        .await?;
    }
    Ok(())
}
