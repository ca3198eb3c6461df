//! Shared DTOs used by several operation variants: the user-facing shape of
//! a column, foreign key, or index definition before it is folded into the
//! virtual schema's own `Column`/`Constraint` types.

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::schema::ReferentialAction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Inline primary key marker; mutually exclusive with a table-level
    /// `primary_key` constraint (spec 4.6, create_table).
    #[serde(default)]
    pub pk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    #[serde(default = "default_action")]
    pub on_delete: String,
    #[serde(default = "default_action")]
    pub on_update: String,
    #[serde(default)]
    pub deferrable: bool,
    #[serde(default)]
    pub initially_deferred: bool,
}

fn default_action() -> String {
    "NO ACTION".to_string()
}

impl ForeignKeyDef {
    pub fn on_delete(&self) -> Result<ReferentialAction> {
        self.on_delete.parse()
    }

    pub fn on_update(&self) -> Result<ReferentialAction> {
        self.on_update.parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() || self.referenced_columns.is_empty() {
            return Err(MigrationError::invalid(
                "foreign key must reference at least one column",
            ));
        }
        if self.columns.len() != self.referenced_columns.len() {
            return Err(MigrationError::invalid_reference(
                "foreign key column count must match referenced column count",
            ));
        }
        self.on_delete()?;
        self.on_update()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(rename = "type")]
    pub index_type: Option<String>,
}

impl IndexDef {
    /// Builds the column list in exactly the user-declared order. Must
    /// never be implemented by filtering an unordered container.
    pub fn quoted_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDef {
    pub name: String,
    pub columns: Vec<String>,
    pub expression: String,
}

/// Replaces bare or quoted occurrences of `from` in `expression` with
/// `to`, respecting identifier boundaries. Used to retarget a check
/// constraint expression at a shadow column.
pub fn rewrite_column_reference(expression: &str, from: &str, to: &str) -> String {
    if from == to {
        return expression.to_string();
    }
    let quoted = format!("\"{from}\"");
    let result = expression.replace(&quoted, &format!("\"{to}\""));
    replace_word(&result, from, to)
}

fn replace_word(haystack: &str, word: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let bytes = haystack.as_bytes();
    let wlen = word.len();
    let mut i = 0;
    while i < bytes.len() {
        if haystack[i..].starts_with(word) {
            let before_ok = i == 0 || !is_ident_char(bytes[i - 1]);
            let after_ok = i + wlen >= bytes.len() || !is_ident_char(bytes[i + wlen]);
            if before_ok && after_ok {
                out.push_str(replacement);
                i += wlen;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
