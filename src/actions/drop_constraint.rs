//! `drop_constraint`: removes a single-column constraint. Dropping it
//! early would either disable a check the old schema view still expects,
//! or (for a foreign key) create a window where referential integrity
//! isn't enforced for either view; both are undesirable, and if the
//! migration were rolled back the constraint would need to be recreated
//! with no guarantee the data still satisfies it. So the constraint stays
//! physically in place until Complete.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::{MigrationError, Result as ValidateResult};
use crate::schema::VirtualSchema;

#[derive(Debug, Serialize, Deserialize)]
pub struct DropConstraint {
    pub table: String,
    pub name: String,
}

#[async_trait]
#[typetag::serde(name = "drop_constraint")]
impl Operation for DropConstraint {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        let table = schema.get_table_mut(&self.table).ok_or_else(|| {
            MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        let columns = table.get_constraint_columns(&self.name).ok_or_else(|| {
            MigrationError::schema_mismatch(format!(
                "constraint \"{}\" does not exist on table \"{}\"",
                self.name, self.table
            ))
        })?;
        if columns.len() > 1 {
            return Err(MigrationError::schema_mismatch(format!(
                "constraint \"{}\" covers more than one column; use drop_multi_column_constraint",
                self.name
            )));
        }
        table.remove_constraint(&self.name)?;
        Ok(())
    }

    async fn start(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        Ok((Vec::new(), None))
    }

    async fn complete(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(vec![Raw::new(format!(
            r#"ALTER TABLE "{table}" DROP CONSTRAINT IF EXISTS "{name}""#,
            table = self.table,
            name = self.name,
        ))])
    }

    async fn rollback(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(Vec::new())
    }
}
