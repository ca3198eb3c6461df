//! `rename_column`: spec 4.6, the per-column twin of `rename_table`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::Result as ValidateResult;
use crate::identifiers::validate_identifier;
use crate::schema::VirtualSchema;

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameColumn {
    pub table: String,
    pub column: String,
    pub new_name: String,
}

#[async_trait]
#[typetag::serde(name = "rename_column")]
impl Operation for RenameColumn {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        validate_identifier(&self.new_name)?;
        let table = schema.get_table_mut(&self.table).ok_or_else(|| {
            crate::error::MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        table.rename_column(&self.column, &self.new_name)
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
            r#"ALTER TABLE "{table}" RENAME COLUMN "{column}" TO "{new_name}""#,
            table = self.table,
            column = self.column,
            new_name = self.new_name,
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
