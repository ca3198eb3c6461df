//! `drop_table`: spec 4.6. Start only marks the table absent in the
//! virtual schema, so the new version view omits it while the physical
//! table stays untouched; Complete drops it for real; Rollback is a no-op
//! since nothing physical changed during Start.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::Result as ValidateResult;
use crate::schema::VirtualSchema;

#[derive(Debug, Serialize, Deserialize)]
pub struct DropTable {
    pub table: String,
}

#[async_trait]
#[typetag::serde(name = "drop_table")]
impl Operation for DropTable {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        schema.remove_table(&self.table)
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
        Ok(vec![Raw::new(format!(r#"DROP TABLE IF EXISTS "{}""#, self.table))])
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
