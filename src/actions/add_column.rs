//! `add_column`: spec 4.6. The new column does not exist in the
//! pre-migration view, so no shadow/duplicate dance is needed: the runner
//! simply adds the physical column at Start, nullable regardless of the
//! declared nullability, and installs a trigger that computes its value
//! from `up` whenever a row is written through the pre-migration view.
//! Existing rows are backfilled the same way. Complete validates and
//! enforces the declared `NOT NULL`; Rollback drops the column and
//! trigger.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::common::ColumnDef;
use crate::actions::db_action::{DbAction, DropColumn, DropFunction, DropTrigger, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::{backfill_key_column, BackfillTask};
use crate::db::Connection;
use crate::error::Result as ValidateResult;
use crate::identifiers::{trigger_function_name, trigger_name, validate_identifier};
use crate::schema::{Column, VirtualSchema};

#[derive(Debug, Serialize, Deserialize)]
pub struct AddColumn {
    pub table: String,
    pub column: ColumnDef,
    #[serde(default)]
    pub up: Option<String>,
}

impl AddColumn {
    fn trigger_name(&self) -> String {
        trigger_name(&self.table, &self.column.name, "add")
    }

    fn function_name(&self) -> String {
        trigger_function_name(&self.table, &self.column.name, "add")
    }

    fn not_null_constraint_name(&self) -> String {
        format!("_pgroll_not_null_{}_{}", self.table, self.column.name)
    }
}

#[async_trait]
#[typetag::serde(name = "add_column")]
impl Operation for AddColumn {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        validate_identifier(&self.column.name)?;
        let table = schema.get_table_mut(&self.table).ok_or_else(|| {
            crate::error::MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        let mut column = Column::new(&self.column.name, &self.column.data_type);
        column.nullable = self.column.nullable;
        column.default = self.column.default.clone();
        column.comment = self.column.comment.clone();
        table.add_column(column)
    }

    async fn start(
        &self,
        schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        let mut definition_parts = vec![format!("\"{}\"", self.column.name), self.column.data_type.clone()];
        if let Some(default) = &self.column.default {
            definition_parts.push("DEFAULT".to_string());
            definition_parts.push(default.clone());
        }

        let mut actions: Vec<Box<dyn DbAction>> = vec![Raw::new(format!(
            r#"ALTER TABLE "{table}" ADD COLUMN IF NOT EXISTS {definition}"#,
            table = self.table,
            definition = definition_parts.join(" "),
        ))];

        let mut backfill = None;

        if let Some(up) = &self.up {
            let table_schema = schema.get_table(&self.table);
            let declarations: String = table_schema
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

            actions.push(Raw::new(format!(
                r#"CREATE OR REPLACE FUNCTION "{function}"() RETURNS TRIGGER AS $$
DECLARE
{declarations}
BEGIN
  IF NOT pgroll.is_new_schema() THEN
    NEW."{column}" := {up};
  END IF;
  RETURN NEW;
END;
$$ LANGUAGE plpgsql"#,
                function = self.function_name(),
                column = self.column.name,
                up = up,
            )));
            actions.push(Raw::new(format!(
                r#"DROP TRIGGER IF EXISTS "{trigger}" ON "{table}""#,
                trigger = self.trigger_name(),
                table = self.table,
            )));
            actions.push(Raw::new(format!(
                r#"CREATE TRIGGER "{trigger}" BEFORE INSERT OR UPDATE ON "{table}" FOR EACH ROW EXECUTE PROCEDURE "{function}"()"#,
                trigger = self.trigger_name(),
                table = self.table,
                function = self.function_name(),
            )));

            if let Some(table) = table_schema {
                if let Ok(key_column) = backfill_key_column(table) {
                    backfill = Some(BackfillTask::new(self.table.as_str(), key_column));
                }
            }
        }

        if !self.column.nullable {
            actions.push(Raw::new(format!(
                r#"DO $$ BEGIN
  ALTER TABLE "{table}" ADD CONSTRAINT "{constraint}" CHECK ("{column}" IS NOT NULL) NOT VALID;
EXCEPTION
  WHEN duplicate_object THEN NULL;
END $$"#,
                table = self.table,
                constraint = self.not_null_constraint_name(),
                column = self.column.name,
            )));
        }

        Ok((actions, backfill))
    }

    async fn complete(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        let mut actions: Vec<Box<dyn DbAction>> = vec![
            Box::new(DropTrigger {
                table: self.table.clone(),
                name: self.trigger_name(),
            }),
            Box::new(DropFunction {
                name: self.function_name(),
            }),
        ];

        if !self.column.nullable {
            actions.push(Raw::new(format!(
                r#"DO $$ BEGIN
  ALTER TABLE "{table}" VALIDATE CONSTRAINT "{constraint}";
EXCEPTION
  WHEN undefined_object THEN NULL;
END $$"#,
                table = self.table,
                constraint = self.not_null_constraint_name(),
            )));
            actions.push(Raw::new(format!(
                r#"DO $$ BEGIN
  ALTER TABLE "{table}" ALTER COLUMN "{column}" SET NOT NULL;
EXCEPTION
  WHEN undefined_column THEN NULL;
END $$"#,
                table = self.table,
                column = self.column.name,
            )));
            actions.push(Raw::new(format!(
                r#"ALTER TABLE "{table}" DROP CONSTRAINT IF EXISTS "{constraint}""#,
                table = self.table,
                constraint = self.not_null_constraint_name(),
            )));
        }

        Ok(actions)
    }

    async fn rollback(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(vec![
            Box::new(DropColumn {
                table: self.table.clone(),
                column: self.column.name.clone(),
            }),
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
