//! `create_constraint`: spec 4.6. Adds a unique, check, foreign-key or
//! exclusion constraint that may span several columns. All covered
//! columns are duplicated in tandem (the Column Duplicator also carries
//! over any other constraint already touching one of them), with a
//! matching `up`/`down` expression map keyed by column name so rows that
//! would otherwise violate the new constraint are corrected as they are
//! written, not just validated on existing data. Complete promotes the
//! shadow columns into place; Rollback discards them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::common::rewrite_column_reference;
use crate::actions::db_action::{DbAction, DropColumn, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::{backfill_key_column, BackfillTask};
use crate::db::Connection;
use crate::duplicator::{ColumnDuplicator, DuplicateSpec};
use crate::error::{MigrationError, Result as ValidateResult};
use crate::identifiers::{duplicate_name, temporary_name, validate_identifier};
use crate::schema::{Constraint, Table, VirtualSchema};
use crate::trigger::{identity_expression, TriggerNames};

fn default_action() -> String {
    "NO ACTION".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    Check {
        expression: String,
    },
    ForeignKey {
        referenced_table: String,
        referenced_columns: Vec<String>,
        #[serde(default = "default_action")]
        on_delete: String,
        #[serde(default = "default_action")]
        on_update: String,
    },
    Exclude {
        using: String,
        elements: String,
        #[serde(default)]
        predicate: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConstraint {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    #[serde(flatten)]
    pub kind: ConstraintKind,
    #[serde(default)]
    pub up: HashMap<String, String>,
    #[serde(default)]
    pub down: HashMap<String, String>,
}

impl CreateConstraint {
    fn shadow_name(&self, column: &str) -> String {
        temporary_name(column)
    }

    fn trigger_names(&self) -> TriggerNames {
        TriggerNames::for_column(&self.table, &self.columns.join("_"))
    }

    fn declare_block(&self, table: &Table) -> String {
        table
            .columns()
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
    }
}

#[async_trait]
#[typetag::serde(name = "create_constraint")]
impl Operation for CreateConstraint {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        validate_identifier(&self.name)?;
        if self.columns.is_empty() {
            return Err(MigrationError::invalid("constraint must cover at least one column"));
        }

        if self.columns.len() > 1 {
            let declared: std::collections::HashSet<&String> = self.down.keys().collect();
            let required: std::collections::HashSet<&String> = self.columns.iter().collect();
            if declared != required {
                return Err(MigrationError::invalid(
                    "down must cover exactly the constraint's columns, with no extraneous keys",
                ));
            }
        }

        {
            let table = schema.get_table(&self.table).ok_or_else(|| {
                MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
            })?;
            for column in &self.columns {
                if table.get_column(column).is_none() {
                    return Err(MigrationError::schema_mismatch(format!(
                        "column \"{column}\" does not exist on table \"{}\"",
                        self.table
                    )));
                }
            }
        }

        let constraint = match &self.kind {
            ConstraintKind::Unique => Constraint::Unique {
                name: self.name.clone(),
                columns: self.columns.clone(),
            },
            ConstraintKind::Check { expression } => Constraint::Check {
                name: self.name.clone(),
                columns: self.columns.clone(),
                expression: expression.clone(),
            },
            ConstraintKind::ForeignKey {
                referenced_table,
                referenced_columns,
                on_delete,
                on_update,
            } => {
                let referenced = schema.get_table(referenced_table).ok_or_else(|| {
                    MigrationError::invalid_reference(format!("unknown table \"{referenced_table}\""))
                })?;
                for column in referenced_columns {
                    if referenced.get_column(column).is_none() {
                        return Err(MigrationError::invalid_reference(format!(
                            "unknown column \"{referenced_table}.{column}\""
                        )));
                    }
                }
                Constraint::ForeignKey {
                    name: self.name.clone(),
                    columns: self.columns.clone(),
                    referenced_table: referenced_table.clone(),
                    referenced_columns: referenced_columns.clone(),
                    on_delete: on_delete.parse()?,
                    on_update: on_update.parse()?,
                }
            }
            ConstraintKind::Exclude { using, elements, predicate } => Constraint::Exclude {
                name: self.name.clone(),
                columns: self.columns.clone(),
                using: using.clone(),
                elements: elements.clone(),
                predicate: predicate.clone(),
            },
        };

        let table = schema.get_table_mut(&self.table).ok_or_else(|| {
            MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        table.add_constraint(constraint)
    }

    async fn start(
        &self,
        schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        let table = schema
            .get_table(&self.table)
            .ok_or_else(|| MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table)))?;

        let specs: Vec<DuplicateSpec> = self
            .columns
            .iter()
            .map(|c| {
                let data_type = table
                    .get_column(c)
                    .map(|col| col.data_type.clone())
                    .unwrap_or_default();
                DuplicateSpec::new(c.as_str(), self.shadow_name(c), data_type)
            })
            .collect();
        let plan = ColumnDuplicator::new(table, specs).plan();
        let mut actions = plan.start_actions;

        let names = self.trigger_names();
        let declarations = self.declare_block(table);

        let up_assignments: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let shadow = self.shadow_name(c);
                let data_type = table.get_column(c).map(|col| col.data_type.clone()).unwrap_or_default();
                let expr = self.up.get(c).cloned().unwrap_or_else(|| identity_expression(c, &data_type));
                format!(r#"    NEW."{shadow}" := {expr};"#)
            })
            .collect();
        let down_assignments: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let shadow = self.shadow_name(c);
                let data_type = table.get_column(c).map(|col| col.data_type.clone()).unwrap_or_default();
                let expr = self
                    .down
                    .get(c)
                    .cloned()
                    .unwrap_or_else(|| identity_expression(&shadow, &data_type));
                format!(r#"    NEW."{c}" := {expr};"#)
            })
            .collect();

        actions.push(Raw::new(format!(
            r#"CREATE OR REPLACE FUNCTION "{up_function}"() RETURNS TRIGGER AS $$
DECLARE
{declarations}
BEGIN
  IF NOT pgroll.is_new_schema() THEN
{up_body}
  END IF;
  RETURN NEW;
END;
$$ LANGUAGE plpgsql"#,
            up_function = names.up_function,
            up_body = up_assignments.join("\n"),
        )));
        actions.push(Raw::new(format!(
            r#"DROP TRIGGER IF EXISTS "{trigger}" ON "{table}""#,
            trigger = names.up_trigger,
            table = self.table,
        )));
        actions.push(Raw::new(format!(
            r#"CREATE TRIGGER "{trigger}" BEFORE INSERT OR UPDATE ON "{table}" FOR EACH ROW EXECUTE PROCEDURE "{function}"()"#,
            trigger = names.up_trigger,
            table = self.table,
            function = names.up_function,
        )));
        actions.push(Raw::new(format!(
            r#"CREATE OR REPLACE FUNCTION "{down_function}"() RETURNS TRIGGER AS $$
DECLARE
{declarations}
BEGIN
  IF pgroll.is_new_schema() THEN
{down_body}
  END IF;
  RETURN NEW;
END;
$$ LANGUAGE plpgsql"#,
            down_function = names.down_function,
            down_body = down_assignments.join("\n"),
        )));
        actions.push(Raw::new(format!(
            r#"DROP TRIGGER IF EXISTS "{trigger}" ON "{table}""#,
            trigger = names.down_trigger,
            table = self.table,
        )));
        actions.push(Raw::new(format!(
            r#"CREATE TRIGGER "{trigger}" BEFORE INSERT OR UPDATE ON "{table}" FOR EACH ROW EXECUTE PROCEDURE "{function}"()"#,
            trigger = names.down_trigger,
            table = self.table,
            function = names.down_function,
        )));

        let shadow_columns: Vec<String> = self.columns.iter().map(|c| self.shadow_name(c)).collect();
        let quoted_shadow = shadow_columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ");

        match &self.kind {
            ConstraintKind::Unique => {
                actions.push(Raw::new(format!(
                    r#"CREATE UNIQUE INDEX CONCURRENTLY IF NOT EXISTS "{name}" ON "{table}" ({columns})"#,
                    name = self.name,
                    table = self.table,
                    columns = quoted_shadow,
                )));
            }
            ConstraintKind::Check { expression } => {
                let mut rewritten = expression.clone();
                for column in &self.columns {
                    rewritten = rewrite_column_reference(&rewritten, column, &self.shadow_name(column));
                }
                actions.push(Raw::new(format!(
                    r#"DO $$ BEGIN
  ALTER TABLE "{table}" ADD CONSTRAINT "{name}" CHECK ({expr}) NOT VALID;
EXCEPTION
  WHEN duplicate_object THEN NULL;
END $$"#,
                    table = self.table,
                    name = self.name,
                    expr = rewritten,
                )));
            }
            ConstraintKind::ForeignKey {
                referenced_table,
                referenced_columns,
                on_delete,
                on_update,
            } => {
                let referenced = referenced_columns
                    .iter()
                    .map(|c| format!("\"{c}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                actions.push(Raw::new(format!(
                    r#"DO $$ BEGIN
  ALTER TABLE "{table}" ADD CONSTRAINT "{name}" FOREIGN KEY ({columns}) REFERENCES "{ref_table}" ({referenced}) ON DELETE {on_delete} ON UPDATE {on_update} NOT VALID;
EXCEPTION
  WHEN duplicate_object THEN NULL;
END $$"#,
                    table = self.table,
                    name = self.name,
                    columns = quoted_shadow,
                    ref_table = referenced_table,
                    referenced = referenced,
                    on_delete = on_delete,
                    on_update = on_update,
                )));
            }
            ConstraintKind::Exclude { using, elements, predicate } => {
                let mut rewritten = elements.clone();
                for column in &self.columns {
                    rewritten = rewrite_column_reference(&rewritten, column, &self.shadow_name(column));
                }
                let predicate_clause = predicate.as_ref().map(|p| format!(" WHERE ({p})")).unwrap_or_default();
                actions.push(Raw::new(format!(
                    r#"DO $$ BEGIN
  ALTER TABLE "{table}" ADD CONSTRAINT "{name}" EXCLUDE USING {using} ({elements}){predicate};
EXCEPTION
  WHEN duplicate_object THEN NULL;
END $$"#,
                    table = self.table,
                    name = self.name,
                    using = using,
                    elements = rewritten,
                    predicate = predicate_clause,
                )));
            }
        }

        let backfill = backfill_key_column(table).ok().map(|key| BackfillTask::new(self.table.as_str(), key));
        Ok((actions, backfill))
    }

    async fn complete(
        &self,
        schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        let table = schema
            .get_table(&self.table)
            .ok_or_else(|| MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table)))?;

        let names = self.trigger_names();
        let mut actions = names.drop_actions(&self.table);

        for constraint in table.constraints() {
            if constraint.name() == self.name {
                continue;
            }
            if !constraint.columns().iter().any(|c| self.columns.contains(c)) {
                continue;
            }
            let dup_name = duplicate_name(constraint.name());
            match constraint {
                Constraint::Unique { name, .. } | Constraint::PrimaryKey { name, .. } => {
                    actions.push(Raw::new(format!(r#"ALTER TABLE "{table}" DROP CONSTRAINT IF EXISTS "{name}""#, table = self.table)));
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" ADD CONSTRAINT "{name}" UNIQUE USING INDEX "{dup_name}""#,
                        table = self.table,
                    )));
                }
                Constraint::Check { name, .. } | Constraint::Exclude { name, .. } | Constraint::ForeignKey { name, .. } => {
                    actions.push(Raw::new(format!(r#"ALTER TABLE "{table}" VALIDATE CONSTRAINT "{dup_name}""#, table = self.table)));
                    actions.push(Raw::new(format!(r#"ALTER TABLE "{table}" DROP CONSTRAINT IF EXISTS "{name}""#, table = self.table)));
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" RENAME CONSTRAINT "{dup_name}" TO "{name}""#,
                        table = self.table,
                    )));
                }
            }
        }

        if matches!(self.kind, ConstraintKind::Unique) {
            // start() built the shadow as a plain unique index named
            // self.name; promote it to a real constraint here.
            actions.push(Raw::new(format!(
                r#"ALTER TABLE "{table}" ADD CONSTRAINT "{name}" UNIQUE USING INDEX "{name}""#,
                table = self.table,
                name = self.name,
            )));
        } else {
            actions.push(Raw::new(format!(
                r#"ALTER TABLE "{table}" VALIDATE CONSTRAINT "{name}""#,
                table = self.table,
                name = self.name,
            )));
        }

        for column in &self.columns {
            actions.push(Box::new(DropColumn {
                table: self.table.clone(),
                column: column.clone(),
            }));
            actions.push(Raw::new(format!(
                r#"ALTER TABLE "{table}" RENAME COLUMN "{shadow}" TO "{column}""#,
                table = self.table,
                shadow = self.shadow_name(column),
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
        let names = self.trigger_names();
        let mut actions = names.drop_actions(&self.table);
        for column in &self.columns {
            actions.push(Box::new(DropColumn {
                table: self.table.clone(),
                column: self.shadow_name(column),
            }));
        }
        Ok(actions)
    }
}
