//! `create_table`: spec 4.6. Validates identifier lengths, column
//! uniqueness, foreign-key references into the virtual schema, and
//! at-most-one primary-key source (inline `pk: true` or a table-level
//! `primary_key` list, never both). Complete is a no-op beyond the version
//! view refresh the runner already performs; Rollback drops the table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::common::{ColumnDef, ForeignKeyDef};
use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::db::Connection;
use crate::error::{MigrationError, Result as ValidateResult};
use crate::identifiers::validate_identifier;
use crate::backfill::BackfillTask;
use crate::schema::{Column, Constraint, ReferentialAction, Table, VirtualSchema};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

#[async_trait]
#[typetag::serde(name = "create_table")]
impl Operation for CreateTable {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        validate_identifier(&self.name)?;

        let inline_pk: Vec<&ColumnDef> = self.columns.iter().filter(|c| c.pk).collect();
        if !inline_pk.is_empty() && !self.primary_key.is_empty() {
            return Err(MigrationError::invalid(
                "primary key must be declared either inline on a column or as a table constraint, not both",
            ));
        }

        let mut table = Table::new(&self.name);
        for column_def in &self.columns {
            validate_identifier(&column_def.name)?;
            let mut column = Column::new(&column_def.name, &column_def.data_type);
            column.nullable = column_def.nullable;
            column.default = column_def.default.clone();
            column.comment = column_def.comment.clone();
            table.add_column(column)?;
        }

        let primary_key = if !inline_pk.is_empty() {
            inline_pk.iter().map(|c| c.name.clone()).collect()
        } else {
            self.primary_key.clone()
        };
        if !primary_key.is_empty() {
            table.set_primary_key(primary_key.clone())?;
            table.add_constraint(Constraint::PrimaryKey {
                name: format!("{}_pkey", self.name),
                columns: primary_key,
            })?;
        }

        for fk in &self.foreign_keys {
            fk.validate()?;
            let referenced = schema.get_table(&fk.referenced_table).ok_or_else(|| {
                MigrationError::invalid_reference(format!(
                    "foreign key references unknown table \"{}\"",
                    fk.referenced_table
                ))
            })?;
            for column in &fk.referenced_columns {
                if referenced.get_column(column).is_none() {
                    return Err(MigrationError::invalid_reference(format!(
                        "foreign key references unknown column \"{}.{}\"",
                        fk.referenced_table, column
                    )));
                }
            }
            let name = fk
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_fkey", self.name, fk.columns.join("_")));
            table.add_constraint(Constraint::ForeignKey {
                name,
                columns: fk.columns.clone(),
                referenced_table: fk.referenced_table.clone(),
                referenced_columns: fk.referenced_columns.clone(),
                on_delete: fk.on_delete()?,
                on_update: fk.on_update()?,
            })?;
        }

        schema.add_table(table)
    }

    async fn start(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        let mut definition_rows: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut parts = vec![format!("\"{}\"", column.name), column.data_type.clone()];
                if !column.nullable {
                    parts.push("NOT NULL".to_string());
                }
                if let Some(default) = &column.default {
                    parts.push("DEFAULT".to_string());
                    parts.push(default.clone());
                }
                parts.join(" ")
            })
            .collect();

        let inline_pk: Vec<&ColumnDef> = self.columns.iter().filter(|c| c.pk).collect();
        let primary_key: Vec<String> = if !inline_pk.is_empty() {
            inline_pk.iter().map(|c| c.name.clone()).collect()
        } else {
            self.primary_key.clone()
        };
        if !primary_key.is_empty() {
            let quoted = primary_key
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            definition_rows.push(format!("PRIMARY KEY ({quoted})"));
        }

        for fk in &self.foreign_keys {
            let columns = fk
                .columns
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            let referenced_columns = fk
                .referenced_columns
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            let deferrable = if fk.deferrable {
                format!(
                    " DEFERRABLE INITIALLY {}",
                    if fk.initially_deferred { "DEFERRED" } else { "IMMEDIATE" }
                )
            } else {
                String::new()
            };
            definition_rows.push(format!(
                r#"FOREIGN KEY ({columns}) REFERENCES "{ref_table}" ({referenced}) ON DELETE {on_delete} ON UPDATE {on_update}{deferrable}"#,
                ref_table = fk.referenced_table,
                referenced = referenced_columns,
                on_delete = fk.on_delete().unwrap_or(ReferentialAction::NoAction).as_sql(),
                on_update = fk.on_update().unwrap_or(ReferentialAction::NoAction).as_sql(),
            ));
        }

        let action = Raw::new(format!(
            "CREATE TABLE \"{name}\" (\n{definition}\n)",
            name = self.name,
            definition = definition_rows.join(",\n"),
        ));

        Ok((vec![action], None))
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
        Ok(vec![Raw::new(format!(r#"DROP TABLE IF EXISTS "{}""#, self.name))])
    }
}
