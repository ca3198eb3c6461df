//! `create_index`: builds an index concurrently at Start so it is visible
//! to both schema versions as soon as it exists; Complete is a no-op.
//! Rollback drops it, since an index with no migration behind it is safe
//! to discard outright.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::common::IndexDef;
use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::{MigrationError, Result as ValidateResult};
use crate::identifiers::validate_identifier;
use crate::schema::VirtualSchema;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateIndex {
    pub table: String,
    #[serde(flatten)]
    pub index: IndexDef,
}

#[async_trait]
#[typetag::serde(name = "create_index")]
impl Operation for CreateIndex {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        validate_identifier(&self.index.name)?;
        if self.index.columns.is_empty() {
            return Err(MigrationError::invalid("index must cover at least one column"));
        }

        let table = schema.get_table(&self.table).ok_or_else(|| {
            MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        for column in &self.index.columns {
            if table.get_column(column).is_none() {
                return Err(MigrationError::schema_mismatch(format!(
                    "column \"{column}\" does not exist on table \"{}\"",
                    self.table
                )));
            }
        }
        Ok(())
    }

    async fn start(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        let unique = if self.index.unique { "UNIQUE " } else { "" };
        let using = self
            .index
            .index_type
            .as_ref()
            .map(|t| format!("USING {t} "))
            .unwrap_or_default();

        let actions = vec![Raw::new(format!(
            r#"CREATE {unique}INDEX CONCURRENTLY IF NOT EXISTS "{name}" ON "{table}" {using}({columns})"#,
            name = self.index.name,
            table = self.table,
            columns = self.index.quoted_columns(),
        ))];
        Ok((actions, None))
    }

    async fn complete(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(Vec::new())
    }

    async fn rollback(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(vec![Raw::new(format!(
            r#"DROP INDEX CONCURRENTLY IF EXISTS "{name}""#,
            name = self.index.name,
        ))])
    }
}
