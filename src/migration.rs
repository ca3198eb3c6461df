use serde::{Deserialize, Serialize};

use crate::actions::Operation;
use crate::error::{MigrationError, Result};

/// A migration: a name, an optional version view schema name, and an
/// ordered list of operations. The resulting in-memory shape is the
/// contract; decoding this from a file format is out of scope here.
#[derive(Serialize, Deserialize)]
pub struct Migration {
    pub name: String,
    pub version_schema: Option<String>,
    pub operations: Vec<Box<dyn Operation>>,
}

impl Migration {
    pub fn new(name: impl Into<String>) -> Self {
        Migration {
            name: name.into(),
            version_schema: None,
            operations: Vec::new(),
        }
    }

    pub fn with_version_schema(mut self, version_schema: impl Into<String>) -> Self {
        self.version_schema = Some(version_schema.into());
        self
    }

    pub fn with_operation(mut self, operation: Box<dyn Operation>) -> Self {
        self.operations.push(operation);
        self
    }

    /// Name of the schema that should contain this migration's version
    /// views; defaults to the migration name.
    pub fn version_schema(&self) -> &str {
        self.version_schema.as_deref().unwrap_or(&self.name)
    }

    /// Enforces the isolation rule: a raw-SQL operation without
    /// `on_complete` cannot be composed with any other operation (scenario
    /// 5, spec 4.6).
    pub fn validate_shape(&self) -> Result<()> {
        if self.operations.is_empty() {
            return Err(MigrationError::invalid("migration has no operations"));
        }

        let isolating_count = self.operations.iter().filter(|op| op.is_isolating()).count();
        if isolating_count > 0 && self.operations.len() > 1 {
            return Err(MigrationError::invalid(
                "an isolating operation must be the only operation in its migration",
            ));
        }

        Ok(())
    }
}
