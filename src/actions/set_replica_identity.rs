//! `set_replica_identity`: a direct `ALTER TABLE` with no expand/contract
//! dance, since replica identity has no bearing on either schema view's
//! column shape. Applied immediately at Start; Rollback restores whatever
//! identity the table had before this operation ran.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::db_action::{DbAction, Raw};
use crate::actions::{Operation, OperationContext};
use crate::backfill::BackfillTask;
use crate::db::Connection;
use crate::error::{MigrationError, Result as ValidateResult};
use crate::schema::{ReplicaIdentity, VirtualSchema};

#[derive(Debug, Serialize, Deserialize)]
pub struct SetReplicaIdentity {
    pub table: String,
    pub identity: String,
    #[serde(default)]
    pub index: Option<String>,
}

impl SetReplicaIdentity {
    fn parsed(&self) -> ValidateResult<ReplicaIdentity> {
        match self.identity.to_ascii_lowercase().as_str() {
            "default" => Ok(ReplicaIdentity::Default),
            "nothing" => Ok(ReplicaIdentity::Nothing),
            "full" => Ok(ReplicaIdentity::Full),
            "index" => Ok(ReplicaIdentity::Index),
            other => Err(MigrationError::InvalidEnumValue {
                field: "identity",
                value: other.to_string(),
            }),
        }
    }

    fn clause(&self) -> String {
        match self.parsed() {
            Ok(ReplicaIdentity::Default) => "DEFAULT".to_string(),
            Ok(ReplicaIdentity::Nothing) => "NOTHING".to_string(),
            Ok(ReplicaIdentity::Full) => "FULL".to_string(),
            Ok(ReplicaIdentity::Index) => format!(r#"USING INDEX "{}""#, self.index.clone().unwrap_or_default()),
            Err(_) => "DEFAULT".to_string(),
        }
    }

    fn restore_clause(identity: ReplicaIdentity) -> String {
        match identity {
            ReplicaIdentity::Default => "DEFAULT".to_string(),
            ReplicaIdentity::Nothing => "NOTHING".to_string(),
            ReplicaIdentity::Full => "FULL".to_string(),
            ReplicaIdentity::Index => "DEFAULT".to_string(),
        }
    }
}

#[async_trait]
#[typetag::serde(name = "set_replica_identity")]
impl Operation for SetReplicaIdentity {
    fn validate(&self, schema: &mut VirtualSchema) -> ValidateResult<()> {
        let identity = self.parsed()?;
        if identity == ReplicaIdentity::Index && self.index.as_deref().unwrap_or("").is_empty() {
            return Err(MigrationError::invalid(
                "set_replica_identity with identity \"index\" requires an index name",
            ));
        }

        let table = schema.get_table_mut(&self.table).ok_or_else(|| {
            MigrationError::schema_mismatch(format!("table \"{}\" does not exist", self.table))
        })?;
        table.replica_identity = identity;
        Ok(())
    }

    async fn start(
        &self,
        _schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<(Vec<Box<dyn DbAction>>, Option<BackfillTask>)> {
        let actions = vec![Raw::new(format!(
            r#"ALTER TABLE "{table}" REPLICA IDENTITY {clause}"#,
            table = self.table,
            clause = self.clause(),
        ))];
        Ok((actions, None))
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
        schema: &VirtualSchema,
        _conn: &mut dyn Connection,
        _ctx: &OperationContext,
    ) -> anyhow::Result<Vec<Box<dyn DbAction>>> {
        let previous = schema
            .get_table(&self.table)
            .map(|t| t.replica_identity)
            .unwrap_or_default();
        Ok(vec![Raw::new(format!(
            r#"ALTER TABLE "{table}" REPLICA IDENTITY {clause}"#,
            table = self.table,
            clause = Self::restore_clause(previous),
        ))])
    }
}
