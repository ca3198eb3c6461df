//! `rename_table`: spec 4.6. Start renames only in the virtual schema, so
//! the new version view uses the new name while the underlying table
//! still has the old one; Complete issues the physical rename; Rollback
//! reverts nothing physical since Start never touched the table.

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
pub struct RenameTable {
    pub table: String,
    pub new_name: String,
}

#[async_trait]
#[typetag::serde(name = "rename_table")]
impl Operation for RenameTable {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        validate_identifier(&self.new_name)?;
        schema.rename_table(&self.table, &self.new_name)
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
            r#"ALTER TABLE IF EXISTS "{table}" RENAME TO "{new_name}""#,
            table = self.table,
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
