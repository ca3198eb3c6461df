//! The virtual schema: an in-memory model of tables, columns and
//! constraints that operations validate and mutate without touching the
//! database. See `runner.rs` for how it is forked for validation and
//! committed once an operation's DB actions have run.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// In-memory mapping from table name to `Table`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualSchema {
    tables: Vec<Table>,
    index: HashMap<String, usize>,
}

impl VirtualSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.index.get(name).map(|&i| &self.tables[i])
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.tables[i]),
            None => None,
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(|t| !t.removed)
    }

    pub fn add_table(&mut self, table: Table) -> Result<()> {
        if self.index.contains_key(&table.name) {
            return Err(MigrationError::schema_mismatch(format!(
                "table \"{}\" already exists",
                table.name
            )));
        }
        self.index.insert(table.name.clone(), self.tables.len());
        self.tables.push(table);
        Ok(())
    }

    pub fn remove_table(&mut self, name: &str) -> Result<()> {
        let table = self.get_table_mut(name).ok_or_else(|| {
            MigrationError::schema_mismatch(format!("table \"{name}\" does not exist"))
        })?;
        table.removed = true;
        Ok(())
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        if self.get_table(to).is_some() {
            return Err(MigrationError::schema_mismatch(format!(
                "table \"{to}\" already exists"
            )));
        }
        let index = *self
            .index
            .get(from)
            .ok_or_else(|| MigrationError::schema_mismatch(format!("table \"{from}\" does not exist")))?;
        self.tables[index].name = to.to_string();
        self.index.remove(from);
        self.index.insert(to.to_string(), index);
        Ok(())
    }

    /// Deep-copies the schema so validation can mutate a throwaway fork.
    pub fn fork(&self) -> VirtualSchema {
        self.clone()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    columns: Vec<Column>,
    column_index: HashMap<String, usize>,
    constraints: HashMap<String, Constraint>,
    pub primary_key: Vec<String>,
    pub replica_identity: ReplicaIdentity,
    #[serde(default)]
    removed: bool,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.column_index.get(name).map(|&i| &self.columns[i])
    }

    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut Column> {
        match self.column_index.get(name) {
            Some(&i) => Some(&mut self.columns[i]),
            None => None,
        }
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.column_index.contains_key(&column.name) {
            return Err(MigrationError::schema_mismatch(format!(
                "column \"{}\" already exists on table \"{}\"",
                column.name, self.name
            )));
        }
        self.column_index
            .insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<()> {
        let index = *self.column_index.get(name).ok_or_else(|| {
            MigrationError::schema_mismatch(format!(
                "column \"{name}\" does not exist on table \"{}\"",
                self.name
            ))
        })?;
        self.columns[index].removed = true;
        self.primary_key.retain(|c| c != name);
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if self.get_column(to).is_some() {
            return Err(MigrationError::schema_mismatch(format!(
                "column \"{to}\" already exists on table \"{}\"",
                self.name
            )));
        }
        let index = *self.column_index.get(from).ok_or_else(|| {
            MigrationError::schema_mismatch(format!(
                "column \"{from}\" does not exist on table \"{}\"",
                self.name
            ))
        })?;
        self.columns[index].name = to.to_string();
        self.column_index.remove(from);
        self.column_index.insert(to.to_string(), index);

        for name in self.primary_key.iter_mut() {
            if name == from {
                *name = to.to_string();
            }
        }
        self.rename_constraint_columns(from, to);
        Ok(())
    }

    /// Rewrites every constraint's column list to use `to` instead of
    /// `from`, so operations declared after a rename resolve against the
    /// new logical name.
    pub fn rename_constraint_columns(&mut self, from: &str, to: &str) {
        for constraint in self.constraints.values_mut() {
            for name in constraint.columns_mut() {
                if name == from {
                    *name = to.to_string();
                }
            }
            if let Constraint::ForeignKey {
                referenced_columns, ..
            } = constraint
            {
                for name in referenced_columns.iter_mut() {
                    if name == from {
                        *name = to.to_string();
                    }
                }
            }
        }
    }

    pub fn constraint_exists(&self, name: &str) -> bool {
        self.constraints.contains_key(name)
    }

    pub fn get_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.get(name)
    }

    pub fn get_constraint_columns(&self, name: &str) -> Option<&[String]> {
        self.constraints.get(name).map(|c| c.columns())
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<()> {
        let name = constraint.name().to_string();
        if self.constraints.contains_key(&name) {
            return Err(MigrationError::schema_mismatch(format!(
                "constraint \"{name}\" already exists on table \"{}\"",
                self.name
            )));
        }
        for column in constraint.columns() {
            if let Some(col) = self.get_column_mut(column) {
                col.constraints.insert(name.clone());
            }
        }
        self.constraints.insert(name, constraint);
        Ok(())
    }

    pub fn remove_constraint(&mut self, name: &str) -> Result<Constraint> {
        let constraint = self.constraints.remove(name).ok_or_else(|| {
            MigrationError::schema_mismatch(format!(
                "constraint \"{name}\" does not exist on table \"{}\"",
                self.name
            ))
        })?;
        for column in constraint.columns() {
            if let Some(col) = self.get_column_mut(column) {
                col.constraints.remove(name);
            }
        }
        Ok(constraint)
    }

    pub fn rename_constraint(&mut self, from: &str, to: &str) -> Result<()> {
        if self.constraints.contains_key(to) {
            return Err(MigrationError::schema_mismatch(format!(
                "constraint \"{to}\" already exists on table \"{}\"",
                self.name
            )));
        }
        let mut constraint = self.constraints.remove(from).ok_or_else(|| {
            MigrationError::schema_mismatch(format!(
                "constraint \"{from}\" does not exist on table \"{}\"",
                self.name
            ))
        })?;
        constraint.set_name(to.to_string());
        for column in constraint.columns() {
            if let Some(col) = self.get_column_mut(column) {
                col.constraints.remove(from);
                col.constraints.insert(to.to_string());
            }
        }
        self.constraints.insert(to.to_string(), constraint);
        Ok(())
    }

    pub fn set_primary_key(&mut self, columns: Vec<String>) -> Result<()> {
        if !self.primary_key.is_empty() {
            return Err(MigrationError::schema_mismatch(format!(
                "table \"{}\" already has a primary key",
                self.name
            )));
        }
        for column in &columns {
            if self.get_column(column).is_none() {
                return Err(MigrationError::schema_mismatch(format!(
                    "primary key column \"{column}\" does not exist on table \"{}\"",
                    self.name
                )));
            }
        }
        self.primary_key = columns;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Name the column currently has in the underlying physical table.
    /// Differs from `name` only while a migration is duplicating it.
    pub physical_name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    constraints: std::collections::HashSet<String>,
    #[serde(default)]
    removed: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        Column {
            physical_name: name.clone(),
            name,
            data_type: data_type.into(),
            nullable: true,
            default: None,
            comment: None,
            constraints: Default::default(),
            removed: false,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn constraint_names(&self) -> impl Iterator<Item = &String> {
        self.constraints.iter()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Constraint {
    Unique {
        name: String,
        columns: Vec<String>,
    },
    Check {
        name: String,
        columns: Vec<String>,
        expression: String,
    },
    PrimaryKey {
        name: String,
        columns: Vec<String>,
    },
    ForeignKey {
        name: String,
        columns: Vec<String>,
        referenced_table: String,
        referenced_columns: Vec<String>,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    },
    Exclude {
        name: String,
        columns: Vec<String>,
        using: String,
        elements: String,
        predicate: Option<String>,
    },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::Unique { name, .. }
            | Constraint::Check { name, .. }
            | Constraint::PrimaryKey { name, .. }
            | Constraint::ForeignKey { name, .. }
            | Constraint::Exclude { name, .. } => name,
        }
    }

    fn set_name(&mut self, new_name: String) {
        match self {
            Constraint::Unique { name, .. }
            | Constraint::Check { name, .. }
            | Constraint::PrimaryKey { name, .. }
            | Constraint::ForeignKey { name, .. }
            | Constraint::Exclude { name, .. } => *name = new_name,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            Constraint::Unique { columns, .. }
            | Constraint::Check { columns, .. }
            | Constraint::PrimaryKey { columns, .. }
            | Constraint::ForeignKey { columns, .. }
            | Constraint::Exclude { columns, .. } => columns,
        }
    }

    fn columns_mut(&mut self) -> &mut [String] {
        match self {
            Constraint::Unique { columns, .. }
            | Constraint::Check { columns, .. }
            | Constraint::PrimaryKey { columns, .. }
            | Constraint::ForeignKey { columns, .. }
            | Constraint::Exclude { columns, .. } => columns,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Cascade => "CASCADE",
        }
    }
}

impl FromStr for ReferentialAction {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NO ACTION" => Ok(ReferentialAction::NoAction),
            "RESTRICT" => Ok(ReferentialAction::Restrict),
            "SET NULL" => Ok(ReferentialAction::SetNull),
            "SET DEFAULT" => Ok(ReferentialAction::SetDefault),
            "CASCADE" => Ok(ReferentialAction::Cascade),
            other => Err(MigrationError::InvalidEnumValue {
                field: "on_delete/on_update",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaIdentity {
    #[default]
    Default,
    Nothing,
    Full,
    Index,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_table() -> Table {
        let mut table = Table::new("users");
        table.add_column(Column::new("id", "bigint")).unwrap();
        table.add_column(Column::new("email", "text")).unwrap();
        table
    }

    #[test]
    fn add_and_get_table() {
        let mut schema = VirtualSchema::new();
        schema.add_table(users_table()).unwrap();
        assert!(schema.get_table("users").is_some());
        assert!(schema.get_table("missing").is_none());
    }

    #[test]
    fn rename_table_updates_index() {
        let mut schema = VirtualSchema::new();
        schema.add_table(users_table()).unwrap();
        schema.rename_table("users", "accounts").unwrap();
        assert!(schema.get_table("users").is_none());
        assert!(schema.get_table("accounts").is_some());
    }

    #[test]
    fn rename_column_rewrites_constraints() {
        let mut table = users_table();
        table
            .add_constraint(Constraint::Unique {
                name: "users_email_key".to_string(),
                columns: vec!["email".to_string()],
            })
            .unwrap();
        table.rename_column("email", "email_address").unwrap();
        let constraint = table.get_constraint("users_email_key").unwrap();
        assert_eq!(constraint.columns(), &["email_address".to_string()]);
    }

    #[test]
    fn remove_table_marks_removed_not_deleted() {
        let mut schema = VirtualSchema::new();
        schema.add_table(users_table()).unwrap();
        schema.remove_table("users").unwrap();
        assert!(schema.tables().next().is_none());
        assert!(schema.get_table("users").unwrap().is_removed());
    }

    #[test]
    fn fork_is_independent_of_original() {
        let mut schema = VirtualSchema::new();
        schema.add_table(users_table()).unwrap();
        let mut fork = schema.fork();
        fork.remove_table("users").unwrap();
        assert!(!schema.get_table("users").unwrap().is_removed());
    }

    #[test]
    fn primary_key_requires_existing_columns() {
        let mut table = users_table();
        assert!(table.set_primary_key(vec!["missing".to_string()]).is_err());
        assert!(table.set_primary_key(vec!["id".to_string()]).is_ok());
        assert!(table.set_primary_key(vec!["email".to_string()]).is_err());
    }

    #[test]
    fn referential_action_round_trips_through_sql_strings() {
        for (text, action) in [
            ("NO ACTION", ReferentialAction::NoAction),
            ("CASCADE", ReferentialAction::Cascade),
            ("SET NULL", ReferentialAction::SetNull),
        ] {
            assert_eq!(text.parse::<ReferentialAction>().unwrap(), action);
            assert_eq!(action.as_sql(), text);
        }
        assert!("BOGUS".parse::<ReferentialAction>().is_err());
    }
}
