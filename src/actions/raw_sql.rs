//! `raw_sql`: an escape hatch for DDL (or data fixes) the operation set
//! doesn't model. `up` runs at Start unless `on_complete` is set, in which
//! case it runs at Complete instead and may be combined with other
//! operations in the same migration. Without `on_complete` the statement
//! might itself change the schema the rest of the engine can't see, so it
//! must be the only operation in its migration. `down` undoes `up` on
//! Rollback; there is nothing to undo for an `on_complete` operation that
//! never ran.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::Result as ValidateResult;
use crate::schema::VirtualSchema;

#[derive(Debug, Serialize, Deserialize)]
pub struct RawSql {
    pub up: String,
    #[serde(default)]
    pub down: Option<String>,
    #[serde(default)]
    pub on_complete: bool,
    #[serde(default)]
    pub in_transaction: bool,
}

impl RawSql {
    fn wrapped(&self, sql: &str) -> String {
        if self.in_transaction {
            format!("BEGIN;\n{sql}\nCOMMIT;")
        } else {
            sql.to_string()
        }
    }
}

#[async_trait]
#[typetag::serde(name = "raw_sql")]
impl Operation for RawSql {
    fn validate(&self, _schema: &mut VirtualSchema) -> ValidateResult<()> {
        Ok(())
    }

    fn is_isolating(&self) -> bool {
        !self.on_complete
    }

    fn runs_on_complete(&self) -> bool {
        self.on_complete
    }

    async fn start(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        if self.on_complete {
            return Ok((Vec::new(), None));
        }
        Ok((vec![Raw::new(self.wrapped(&self.up))], None))
    }

    async fn complete(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        if !self.on_complete {
            return Ok(Vec::new());
        }
        Ok(vec![Raw::new(self.wrapped(&self.up))])
    }

    async fn rollback(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        if self.on_complete {
            return Ok(Vec::new());
        }
        let Some(down) = &self.down else {
            return Ok(Vec::new());
        };
        Ok(vec![Raw::new(self.wrapped(down))])
    }
}
