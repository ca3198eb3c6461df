//! `drop_column`: the inverse of `add_column`. The column still exists in
//! the pre-migration view after Start; an optional `down` expression
//! computes a value for it whenever a row is written through the
//! post-migration view, which never mentions the column. Complete drops
//! the physical column; Rollback is a no-op since Start never touched it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::db_action::{DbAction, DropColumn as DropColumnAction, DropFunction, DropTrigger, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::Result as ValidateResult;
use crate::identifiers::{trigger_function_name, trigger_name};
use crate::schema::VirtualSchema;

#[derive(Debug, Serialize, Deserialize)]
pub struct DropColumn {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub down: Option<String>,
}

impl DropColumn {
    fn trigger_name(&self) -> String {
        trigger_name(&self.table, &self.column, "drop")
    }

    fn function_name(&self) -> String {
        trigger_function_name(&self.table, &self.column, "drop")
    }
}

#[async_trait]
#[typetag::serde(name = "drop_column")]
impl Operation for DropColumn {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        let table = schema.get_table_mut(&self.table).ok_or_else(|| {
            crate::error::MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        table.remove_column(&self.column)
    }

    async fn start(
        &self,
        schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        let Some(down) = &self.down else {
            return Ok((Vec::new(), None));
        };

        let declarations: String = schema
            .get_table(&self.table)
            .map(|t| {
                t.columns()
                    .filter(|c| !c.is_removed())
                    .map(|c| {
                        format!(
                            r#"  "{name}" public."{table}"."{physical}"%TYPE := NEW."{physical}";"#,
                            name = c.name,
                            table = self.table,
                            physical = c.physical_name,
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let actions: Vec<Box<dyn DbAction>> = vec![
            Raw::new(format!(
                r#"CREATE OR REPLACE FUNCTION "{function}"() RETURNS TRIGGER AS $$
DECLARE
{declarations}
BEGIN
  IF pgroll.is_new_schema() THEN
    NEW."{column}" := {down};
  END IF;
  RETURN NEW;
END;
$$ LANGUAGE plpgsql"#,
                function = self.function_name(),
                column = self.column,
                down = down,
            )),
            Raw::new(format!(
                r#"DROP TRIGGER IF EXISTS "{trigger}" ON "{table}""#,
                trigger = self.trigger_name(),
                table = self.table,
            )),
            Raw::new(format!(
                r#"CREATE TRIGGER "{trigger}" BEFORE INSERT OR UPDATE ON "{table}" FOR EACH ROW EXECUTE PROCEDURE "{function}"()"#,
                trigger = self.trigger_name(),
                table = self.table,
                function = self.function_name(),
            )),
        ];

        Ok((actions, None))
    }

    async fn complete(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(vec![
            Box::new(DropTrigger {
                table: self.table.clone(),
                name: self.trigger_name(),
            }),
            Box::new(DropFunction {
                name: self.function_name(),
            }),
            Box::new(DropColumnAction {
                table: self.table.clone(),
                column: self.column.clone(),
            }),
        ])
    }

    async fn rollback(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(vec![
            Box::new(DropTrigger {
                table: self.table.clone(),
                name: self.trigger_name(),
            }),
            Box::new(DropFunction {
                name: self.function_name(),
            }),
        ])
    }
}
