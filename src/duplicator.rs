//! The Column Duplicator: builds the statement sequence that clones one or
//! more columns onto shadow columns, together with shadow copies of every
//! constraint and index that touches them.

use std::collections::{HashMap, HashSet};

use crate::actions::common::rewrite_column_reference;
use crate::actions::db_action::{DbAction, Raw};
use crate::identifiers::duplicate_name;
use crate::schema::{Constraint, Table};

/// Describes the shadow column to create for one logical column.
pub struct DuplicateSpec {
    pub column: String,
    pub shadow_name: String,
    pub data_type: String,
    pub default: Option<String>,
    pub comment: Option<String>,
}

impl DuplicateSpec {
    pub fn new(column: impl Into<String>, shadow_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        DuplicateSpec {
            column: column.into(),
            shadow_name: shadow_name.into(),
            data_type: data_type.into(),
            default: None,
            comment: None,
        }
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    Check,
    ForeignKey,
    Exclude,
}

/// A shadow constraint created during Start; the owning operation uses this
/// at Complete to promote it (validate + rename, or drop the original and
/// rename the shadow into its place).
pub struct DuplicatedConstraint {
    pub original_name: String,
    pub duplicate_name: String,
    pub kind: ConstraintKind,
}

pub struct DuplicationPlan {
    pub start_actions: Vec<Box<dyn DbAction>>,
    pub duplicated_constraints: Vec<DuplicatedConstraint>,
}

pub struct ColumnDuplicator<'a> {
    table: &'a Table,
    specs: Vec<DuplicateSpec>,
    skip_constraints: HashSet<String>,
    name_overrides: HashMap<String, String>,
}

impl<'a> ColumnDuplicator<'a> {
    pub fn new(table: &'a Table, specs: Vec<DuplicateSpec>) -> Self {
        ColumnDuplicator {
            table,
            specs,
            skip_constraints: HashSet::new(),
            name_overrides: HashMap::new(),
        }
    }

    /// Skips duplicating a constraint, for example one being dropped by the
    /// same operation that is duplicating the column.
    pub fn without_constraint(mut self, name: impl Into<String>) -> Self {
        self.skip_constraints.insert(name.into());
        self
    }

    /// Overrides the generated name for a duplicated constraint.
    pub fn with_name(mut self, original: impl Into<String>, duplicate: impl Into<String>) -> Self {
        self.name_overrides.insert(original.into(), duplicate.into());
        self
    }

    fn shadow_name_for(&self, column: &str) -> Option<&str> {
        self.specs
            .iter()
            .find(|s| s.column == column)
            .map(|s| s.shadow_name.as_str())
    }

    fn physical_name(&self, column: &str) -> String {
        self.shadow_name_for(column)
            .map(|s| s.to_string())
            .or_else(|| self.table.get_column(column).map(|c| c.physical_name.clone()))
            .unwrap_or_else(|| column.to_string())
    }

    pub fn plan(&self) -> DuplicationPlan {
        let mut actions: Vec<Box<dyn DbAction>> = Vec::new();

        for spec in &self.specs {
            let default_clause = spec
                .default
                .as_ref()
                .map(|d| format!(" DEFAULT {d}"))
                .unwrap_or_default();
            actions.push(Raw::new(format!(
                r#"ALTER TABLE "{table}" ADD COLUMN IF NOT EXISTS "{shadow}" {data_type}{default}"#,
                table = self.table.name,
                shadow = spec.shadow_name,
                data_type = spec.data_type,
                default = default_clause,
            )));
            if let Some(comment) = &spec.comment {
                actions.push(Raw::new(format!(
                    r#"COMMENT ON COLUMN "{table}"."{shadow}" IS '{comment}'"#,
                    table = self.table.name,
                    shadow = spec.shadow_name,
                    comment = comment.replace('\'', "''"),
                )));
            }
        }

        let duplicated_columns: HashSet<&str> = self.specs.iter().map(|s| s.column.as_str()).collect();
        let mut duplicated_constraints = Vec::new();

        for constraint in self.table.constraints() {
            if self.skip_constraints.contains(constraint.name()) {
                continue;
            }
            if !constraint.columns().iter().any(|c| duplicated_columns.contains(c.as_str())) {
                continue;
            }

            let dup_name = self
                .name_overrides
                .get(constraint.name())
                .cloned()
                .unwrap_or_else(|| duplicate_name(constraint.name()));

            let shadow_columns: Vec<String> = constraint
                .columns()
                .iter()
                .map(|c| self.physical_name(c))
                .collect();
            let quoted_columns = shadow_columns
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");

            match constraint {
                Constraint::Unique { .. } => {
                    actions.push(Raw::new(format!(
                        r#"CREATE UNIQUE INDEX CONCURRENTLY IF NOT EXISTS "{dup_name}" ON "{table}" ({columns})"#,
                        dup_name = dup_name,
                        table = self.table.name,
                        columns = quoted_columns,
                    )));
                    duplicated_constraints.push(DuplicatedConstraint {
                        original_name: constraint.name().to_string(),
                        duplicate_name: dup_name,
                        kind: ConstraintKind::Unique,
                    });
                }
                Constraint::Check { expression, columns, .. } => {
                    let rewritten = rewrite_expression(expression, columns, |c| self.physical_name(c));
                    actions.push(tolerant_add_constraint(
                        &self.table.name,
                        &dup_name,
                        &format!("CHECK ({rewritten}) NOT VALID"),
                    ));
                    duplicated_constraints.push(DuplicatedConstraint {
                        original_name: constraint.name().to_string(),
                        duplicate_name: dup_name,
                        kind: ConstraintKind::Check,
                    });
                }
                Constraint::ForeignKey {
                    referenced_table,
                    referenced_columns,
                    on_delete,
                    on_update,
                    ..
                } => {
                    let referenced = referenced_columns
                        .iter()
                        .map(|c| format!("\"{c}\""))
                        .collect::<Vec<_>>()
                        .join(", ");
                    actions.push(tolerant_add_constraint(
                        &self.table.name,
                        &dup_name,
                        &format!(
                            r#"FOREIGN KEY ({columns}) REFERENCES "{ref_table}" ({referenced}) ON DELETE {on_delete} ON UPDATE {on_update} NOT VALID"#,
                            columns = quoted_columns,
                            ref_table = referenced_table,
                            referenced = referenced,
                            on_delete = on_delete.as_sql(),
                            on_update = on_update.as_sql(),
                        ),
                    ));
                    duplicated_constraints.push(DuplicatedConstraint {
                        original_name: constraint.name().to_string(),
                        duplicate_name: dup_name,
                        kind: ConstraintKind::ForeignKey,
                    });
                }
                Constraint::Exclude { columns, using, elements, predicate, .. } => {
                    let rewritten_elements = rewrite_expression(elements, columns, |c| self.physical_name(c));
                    let predicate_clause = predicate
                        .as_ref()
                        .map(|p| format!(" WHERE ({p})"))
                        .unwrap_or_default();
                    actions.push(tolerant_add_constraint(
                        &self.table.name,
                        &dup_name,
                        &format!("EXCLUDE USING {using} ({rewritten_elements}){predicate_clause}"),
                    ));
                    duplicated_constraints.push(DuplicatedConstraint {
                        original_name: constraint.name().to_string(),
                        duplicate_name: dup_name,
                        kind: ConstraintKind::Exclude,
                    });
                }
                Constraint::PrimaryKey { .. } => {
                    actions.push(Raw::new(format!(
                        r#"CREATE UNIQUE INDEX CONCURRENTLY IF NOT EXISTS "{dup_name}" ON "{table}" ({columns})"#,
                        dup_name = dup_name,
                        table = self.table.name,
                        columns = quoted_columns,
                    )));
                    duplicated_constraints.push(DuplicatedConstraint {
                        original_name: constraint.name().to_string(),
                        duplicate_name: dup_name,
                        kind: ConstraintKind::Unique,
                    });
                }
            }
        }

        DuplicationPlan {
            start_actions: actions,
            duplicated_constraints,
        }
    }
}

fn tolerant_add_constraint(table: &str, name: &str, definition: &str) -> Box<dyn DbAction> {
    Raw::new(format!(
        r#"DO $$ BEGIN
  ALTER TABLE "{table}" ADD CONSTRAINT "{name}" {definition};
EXCEPTION
  WHEN duplicate_object THEN NULL;
END $$"#,
    ))
}

/// Replaces bare or quoted occurrences of each of `columns` in `expression`
/// with the name `rename(column)` produces. Used to retarget a check
/// constraint or exclusion element list at the shadow column(s).
fn rewrite_expression(expression: &str, columns: &[String], rename: impl Fn(&str) -> String) -> String {
    let mut result = expression.to_string();
    for column in columns {
        let replacement = rename(column);
        result = rewrite_column_reference(&result, column, &replacement);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn orders_table() -> Table {
        let mut table = Table::new("orders");
        table.add_column(Column::new("id", "bigint")).unwrap();
        table.add_column(Column::new("status", "text")).unwrap();
        table
            .add_constraint(Constraint::Check {
                name: "orders_status_check".to_string(),
                columns: vec!["status".to_string()],
                expression: "\"status\" IN ('open', 'closed')".to_string(),
            })
            .unwrap();
        table
    }

    #[test]
    fn duplicates_shadow_column() {
        let table = orders_table();
        let plan = ColumnDuplicator::new(
            &table,
            vec![DuplicateSpec::new("status", "_pgroll_new_status", "integer")],
        )
        .plan();
        assert!(plan.start_actions.len() >= 2);
        assert_eq!(plan.duplicated_constraints.len(), 1);
        assert_eq!(plan.duplicated_constraints[0].kind, ConstraintKind::Check);
    }

    #[test]
    fn without_constraint_skips_it() {
        let table = orders_table();
        let plan = ColumnDuplicator::new(
            &table,
            vec![DuplicateSpec::new("status", "_pgroll_new_status", "integer")],
        )
        .without_constraint("orders_status_check")
        .plan();
        assert!(plan.duplicated_constraints.is_empty());
    }

    #[test]
    fn rewrite_expression_replaces_whole_words_only() {
        let rewritten = rewrite_expression(
            "\"status\" IN ('open') AND status_history IS NOT NULL",
            &["status".to_string()],
            |_| "_pgroll_new_status".to_string(),
        );
        assert_eq!(
            rewritten,
            "\"_pgroll_new_status\" IN ('open') AND status_history IS NOT NULL"
        );
    }
}
