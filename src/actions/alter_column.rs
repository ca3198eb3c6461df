//! `alter_column`: spec 4.6, the most composite operation. Must change at
//! least one of type, nullability, default, comment, or add a unique,
//! check or foreign-key constraint. A change that cannot be applied in
//! place (type change, tightening nullability, or adding unique/check/FK)
//! drives the Column Duplicator and a trigger pair exactly like the
//! duplication half of `add_column`, except the shadow column starts out
//! a full copy rather than an empty one. Default-only and comment-only
//! changes, and relaxing a column to nullable, are applied directly with
//! no duplication.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::common::{rewrite_column_reference, CheckDef, ForeignKeyDef};
use crate::actions::db_action::{DbAction, DropColumn, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::{backfill_key_column, BackfillTask};
use crate::db::Connection;
use crate::duplicator::{ColumnDuplicator, DuplicateSpec};
use crate::error::{MigrationError, Result as ValidateResult};
use crate::identifiers::{duplicate_name, temporary_name, validate_identifier};
use crate::schema::{Constraint, VirtualSchema};
use crate::trigger::{self, identity_expression, TriggerNames};

#[derive(Debug, Serialize, Deserialize)]
pub struct AlterColumn {
    pub table: String,
    pub column: String,
    #[serde(default, rename = "type")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub check: Option<CheckDef>,
    #[serde(default)]
    pub references: Option<ForeignKeyDef>,
    #[serde(default)]
    pub up: Option<String>,
    #[serde(default)]
    pub down: Option<String>,
}

impl AlterColumn {
    fn shadow_name(&self) -> String {
        temporary_name(&self.column)
    }

    fn needs_duplication(&self) -> bool {
        self.data_type.is_some()
            || self.nullable == Some(false)
            || self.unique
            || self.check.is_some()
            || self.references.is_some()
    }

    fn unique_constraint_name(&self) -> String {
        format!("{}_{}_key", self.table, self.column)
    }
}

#[async_trait]
#[typetag::serde(name = "alter_column")]
impl Operation for AlterColumn {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        if self.data_type.is_none()
            && self.nullable.is_none()
            && self.default.is_none()
            && self.comment.is_none()
            && !self.unique
            && self.check.is_none()
            && self.references.is_none()
        {
            return Err(MigrationError::invalid(
                "alter_column must change at least one property",
            ));
        }

        if self.data_type.is_some() && (self.up.is_none() || self.down.is_none()) {
            return Err(MigrationError::invalid(
                "changing a column's type requires both up and down expressions",
            ));
        }
        if self.nullable == Some(false) && (self.up.is_none() || self.down.is_none()) {
            return Err(MigrationError::invalid(
                "adding NOT NULL requires both up and down expressions",
            ));
        }
        if self.unique && self.up.is_none() {
            return Err(MigrationError::invalid(
                "setting a unique constraint requires an up expression to deduplicate backfilled values",
            ));
        }

        let table = schema.get_table_mut(&self.table).ok_or_else(|| {
            MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        let column = table.get_column_mut(&self.column).ok_or_else(|| {
            MigrationError::schema_mismatch(format!(
                "column \"{}\" does not exist on table \"{}\"",
                self.column, self.table
            ))
        })?;

        if let Some(data_type) = &self.data_type {
            column.data_type = data_type.clone();
        }
        if let Some(nullable) = self.nullable {
            column.nullable = nullable;
        }
        if let Some(default) = &self.default {
            column.default = Some(default.clone());
        }
        if let Some(comment) = &self.comment {
            column.comment = Some(comment.clone());
        }

        if self.unique {
            table.add_constraint(Constraint::Unique {
                name: self.unique_constraint_name(),
                columns: vec![self.column.clone()],
            })?;
        }
        if let Some(check) = &self.check {
            validate_identifier(&check.name)?;
            table.add_constraint(Constraint::Check {
                name: check.name.clone(),
                columns: check.columns.clone(),
                expression: check.expression.clone(),
            })?;
        }
        if let Some(fk) = &self.references {
            fk.validate()?;
            let name = fk
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_fkey", self.table, self.column));
            table.add_constraint(Constraint::ForeignKey {
                name,
                columns: fk.columns.clone(),
                referenced_table: fk.referenced_table.clone(),
                referenced_columns: fk.referenced_columns.clone(),
                on_delete: fk.on_delete()?,
                on_update: fk.on_update()?,
            })?;
        }

        Ok(())
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
        let column = table.get_column(&self.column).ok_or_else(|| {
            MigrationError::schema_mismatch(format!(
                "column \"{}\" does not exist on table \"{}\"",
                self.column, self.table
            ))
        })?;

        if !self.needs_duplication() {
            let mut actions: Vec<Box<dyn DbAction>> = Vec::new();
            if let Some(default) = &self.default {
                actions.push(Raw::new(format!(
                    r#"ALTER TABLE "{table}" ALTER COLUMN "{column}" SET DEFAULT {default}"#,
                    table = self.table,
                    column = self.column,
                )));
            }
            if let Some(comment) = &self.comment {
                actions.push(Raw::new(format!(
                    r#"COMMENT ON COLUMN "{table}"."{column}" IS '{comment}'"#,
                    table = self.table,
                    column = self.column,
                    comment = comment.replace('\'', "''"),
                )));
            }
            if self.nullable == Some(true) {
                actions.push(Raw::new(format!(
                    r#"ALTER TABLE "{table}" ALTER COLUMN "{column}" DROP NOT NULL"#,
                    table = self.table,
                    column = self.column,
                )));
            }
            return Ok((actions, None));
        }

        let shadow = self.shadow_name();
        let new_type = self.data_type.clone().unwrap_or_else(|| column.data_type.clone());
        let spec =
            DuplicateSpec::new(self.column.as_str(), shadow.as_str(), new_type.as_str()).with_default(self.default.clone());
        let plan = ColumnDuplicator::new(table, vec![spec]).plan();

        let up_expr = self
            .up
            .clone()
            .unwrap_or_else(|| identity_expression(&self.column, &new_type));
        let down_expr = self
            .down
            .clone()
            .unwrap_or_else(|| identity_expression(&shadow, &column.data_type));
        let (trigger_actions, _names) = trigger::build(table, &self.column, &shadow, &up_expr, &down_expr);

        let mut actions = plan.start_actions;
        actions.extend(trigger_actions);

        if self.unique {
            actions.push(Raw::new(format!(
                r#"CREATE UNIQUE INDEX CONCURRENTLY IF NOT EXISTS "{name}" ON "{table}" ("{shadow}")"#,
                name = self.unique_constraint_name(),
                table = self.table,
                shadow = shadow,
            )));
        }
        if let Some(check) = &self.check {
            let rewritten = rewrite_column_reference(&check.expression, &self.column, &shadow);
            actions.push(Raw::new(format!(
                r#"DO $$ BEGIN
  ALTER TABLE "{table}" ADD CONSTRAINT "{name}" CHECK ({expr}) NOT VALID;
EXCEPTION
  WHEN duplicate_object THEN NULL;
END $$"#,
                table = self.table,
                name = check.name,
                expr = rewritten,
            )));
        }
        if let Some(fk) = &self.references {
            let name = fk
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_fkey", self.table, self.column));
            let referenced = fk
                .referenced_columns
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            actions.push(Raw::new(format!(
                r#"DO $$ BEGIN
  ALTER TABLE "{table}" ADD CONSTRAINT "{name}" FOREIGN KEY ("{shadow}") REFERENCES "{ref_table}" ({referenced}) ON DELETE {on_delete} ON UPDATE {on_update} NOT VALID;
EXCEPTION
  WHEN duplicate_object THEN NULL;
END $$"#,
                table = self.table,
                name = name,
                shadow = shadow,
                ref_table = fk.referenced_table,
                referenced = referenced,
                on_delete = fk.on_delete()?.as_sql(),
                on_update = fk.on_update()?.as_sql(),
            )));
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
        if !self.needs_duplication() {
            return Ok(Vec::new());
        }

        let table = schema
            .get_table(&self.table)
            .ok_or_else(|| MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table)))?;
        let shadow = self.shadow_name();
        let names = TriggerNames::for_column(&self.table, &self.column);

        let mut actions = names.drop_actions(&self.table);

        for constraint in table.constraints() {
            if !constraint.columns().iter().any(|c| c == &self.column) {
                continue;
            }
            let dup_name = duplicate_name(constraint.name());
            match constraint {
                Constraint::Unique { name, .. } | Constraint::PrimaryKey { name, .. } => {
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" DROP CONSTRAINT IF EXISTS "{original}""#,
                        table = self.table,
                        original = name,
                    )));
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" ADD CONSTRAINT "{original}" UNIQUE USING INDEX "{dup}""#,
                        table = self.table,
                        original = name,
                        dup = dup_name,
                    )));
                }
                Constraint::Check { name, .. } | Constraint::Exclude { name, .. } => {
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" VALIDATE CONSTRAINT "{dup}""#,
                        table = self.table,
                        dup = dup_name,
                    )));
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" DROP CONSTRAINT IF EXISTS "{original}""#,
                        table = self.table,
                        original = name,
                    )));
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" RENAME CONSTRAINT "{dup}" TO "{original}""#,
                        table = self.table,
                        dup = dup_name,
                        original = name,
                    )));
                }
                Constraint::ForeignKey { name, .. } => {
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" VALIDATE CONSTRAINT "{dup}""#,
                        table = self.table,
                        dup = dup_name,
                    )));
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" DROP CONSTRAINT IF EXISTS "{original}""#,
                        table = self.table,
                        original = name,
                    )));
                    actions.push(Raw::new(format!(
                        r#"ALTER TABLE "{table}" RENAME CONSTRAINT "{dup}" TO "{original}""#,
                        table = self.table,
                        dup = dup_name,
                        original = name,
                    )));
                }
            }
        }

        if let Some(check) = &self.check {
            actions.push(Raw::new(format!(
                r#"ALTER TABLE "{table}" VALIDATE CONSTRAINT "{name}""#,
                table = self.table,
                name = check.name,
            )));
        }
        if let Some(fk) = &self.references {
            let name = fk
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_fkey", self.table, self.column));
            actions.push(Raw::new(format!(
                r#"ALTER TABLE "{table}" VALIDATE CONSTRAINT "{name}""#,
                table = self.table,
                name = name,
            )));
        }

        actions.push(Box::new(DropColumn {
            table: self.table.clone(),
            column: self.column.clone(),
        }));
        actions.push(Raw::new(format!(
            r#"ALTER TABLE "{table}" RENAME COLUMN "{shadow}" TO "{column}""#,
            table = self.table,
            shadow = shadow,
            column = self.column,
        )));

        Ok(actions)
    }

    async fn rollback(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        if !self.needs_duplication() {
            return Ok(Vec::new());
        }

        let names = TriggerNames::for_column(&self.table, &self.column);
        let mut actions = names.drop_actions(&self.table);
        actions.push(Box::new(DropColumn {
            table: self.table.clone(),
            column: self.shadow_name(),
        }));
        Ok(actions)
    }
}

