//! `drop_index`: unlike `create_index`, dropping is deferred entirely to
//! Complete. The index stays available to the pre-migration view for as
//! long as the migration might be rolled back; only once the migration is
//! committed is it safe to drop concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::Result as ValidateResult;
use crate::schema::VirtualSchema;

#[derive(Debug, Serialize, Deserialize)]
pub struct DropIndex {
    pub index: String,
}

#[async_trait]
#[typetag::serde(name = "drop_index")]
impl Operation for DropIndex {
    fn validate(&self, _schema: &mut VirtualSchema) -> ValidateResult<()> {
        Ok(())
    }

    async fn start(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        Ok((Vec::new(), None))
    }

    async fn complete(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(vec![Raw::new(format!(
            r#"DROP INDEX CONCURRENTLY IF EXISTS "{name}""#,
            name = self.index,
        ))])
    }

    async fn rollback(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        Ok(Vec::new())
    }
}
