//! The Trigger Builder: generates the up/down trigger pair that keeps a
//! column and its shadow column synchronised while a migration is active.
//!
//! Both triggers fire `BEFORE INSERT OR UPDATE` on the same row, so there
//! is no cross-statement recursion to guard against: a `BEFORE` trigger
//! that assigns into `NEW` does not cause itself (or any other trigger) to
//! re-fire for that row. The "up"/"down" split instead decides, via
//! `pgroll.is_new_schema()`, which of the two columns is authoritative for
//! a given write: writes arriving through the pre-migration view run the
//! up expression to populate the shadow column; writes arriving through
//! the post-migration view run the down expression to populate the
//! original.

use crate::actions::db_action::{DbAction, DropFunction, DropTrigger, Raw};
use crate::identifiers::{trigger_function_name, trigger_name};
use crate::schema::Table;

/// Identity expression used when the caller doesn't supply an explicit
/// up/down transform: the shadow (or original) column is simply assigned
/// the other's value, cast to its own type.
pub fn identity_expression(source_column: &str, target_type: &str) -> String {
    format!("NEW.\"{source_column}\"::{target_type}")
}

pub struct TriggerNames {
    pub up_trigger: String,
    pub up_function: String,
    pub down_trigger: String,
    pub down_function: String,
}

impl TriggerNames {
    pub fn for_column(table: &str, column: &str) -> Self {
        TriggerNames {
            up_trigger: trigger_name(table, column, "up"),
            up_function: trigger_function_name(table, column, "up"),
            down_trigger: trigger_name(table, column, "down"),
            down_function: trigger_function_name(table, column, "down"),
        }
    }

    /// Statements that drop the trigger pair and their backing functions;
    /// used by both Complete (function no longer needed) and Rollback.
    pub fn drop_actions(&self, table: &str) -> Vec<Box<dyn DbAction>> {
        vec![
            Box::new(DropTrigger {
                table: table.to_string(),
                name: self.up_trigger.clone(),
            }),
            Box::new(DropTrigger {
                table: table.to_string(),
                name: self.down_trigger.clone(),
            }),
            Box::new(DropFunction {
                name: self.up_function.clone(),
            }),
            Box::new(DropFunction {
                name: self.down_function.clone(),
            }),
        ]
    }
}

/// Builds the statements that create the up/down trigger pair syncing
/// `original_column` (physical name) with `shadow_column` on `table`.
///
/// `up_expr`/`down_expr` are plain SQL expressions evaluated with every
/// column of `table` bound to a same-named local variable, so user-supplied
/// expressions can reference any column by name (e.g. `"price" * 100`).
pub fn build(
    table: &Table,
    original_column: &str,
    shadow_column: &str,
    up_expr: &str,
    down_expr: &str,
) -> (Vec<Box<dyn DbAction>>, TriggerNames) {
    let names = TriggerNames::for_column(&table.name, original_column);
    let declarations = declare_block(table);

    let up_fn = format!(
        r#"CREATE OR REPLACE FUNCTION "{fn_name}"() RETURNS TRIGGER AS $$
DECLARE
{declarations}
BEGIN
  IF NOT pgroll.is_new_schema() THEN
    NEW."{shadow}" := {up_expr};
  END IF;
  RETURN NEW;
END;
$$ LANGUAGE plpgsql"#,
        fn_name = names.up_function,
        declarations = declarations,
        shadow = shadow_column,
        up_expr = up_expr,
    );

    let up_trigger = format!(
        r#"CREATE TRIGGER "{trig}" BEFORE INSERT OR UPDATE ON "{table}" FOR EACH ROW EXECUTE PROCEDURE "{fn_name}"()"#,
        trig = names.up_trigger,
        table = table.name,
        fn_name = names.up_function,
    );

    let down_fn = format!(
        r#"CREATE OR REPLACE FUNCTION "{fn_name}"() RETURNS TRIGGER AS $$
DECLARE
{declarations}
BEGIN
  IF pgroll.is_new_schema() THEN
    NEW."{original}" := {down_expr};
  END IF;
  RETURN NEW;
END;
$$ LANGUAGE plpgsql"#,
        fn_name = names.down_function,
        declarations = declarations,
        original = original_column,
        down_expr = down_expr,
    );

    let down_trigger = format!(
        r#"CREATE TRIGGER "{trig}" BEFORE INSERT OR UPDATE ON "{table}" FOR EACH ROW EXECUTE PROCEDURE "{fn_name}"()"#,
        trig = names.down_trigger,
        table = table.name,
        fn_name = names.down_function,
    );

    let actions: Vec<Box<dyn DbAction>> = vec![
        Raw::new(up_fn),
        Raw::new(up_trigger),
        Raw::new(down_fn),
        Raw::new(down_trigger),
    ];

    (actions, names)
}

fn declare_block(table: &Table) -> String {
    table
        .columns()
        .filter(|c| !c.is_removed())
        .map(|c| {
            format!(
                r#"  "{name}" public."{table}"."{physical}"%TYPE := NEW."{physical}";"#,
                name = c.name,
                table = table.name,
                physical = c.physical_name,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
