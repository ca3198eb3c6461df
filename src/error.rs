use thiserror::Error;

/// Structured errors returned by validation and by the state layer.
///
/// DB errors raised during `start`/`complete`/`rollback` are not funneled
/// through this type: they propagate as `anyhow::Error` wrapping the
/// underlying `tokio_postgres::Error` so callers keep access to the
/// original SQLSTATE via `std::error::Error::source`.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid migration: {0}")]
    InvalidMigration(String),

    #[error("identifier \"{identifier}\" is {len} bytes, exceeding the {limit} byte limit")]
    InvalidIdentifierLength {
        identifier: String,
        len: usize,
        limit: usize,
    },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid value for {field}: \"{value}\"")]
    InvalidEnumValue { field: &'static str, value: String },

    #[error("cannot backfill table \"{table}\": {reason}")]
    BackfillInfeasible { table: String, reason: String },

    #[error("a migration is already active for schema \"{schema}\"")]
    ActiveMigrationExists { schema: String },

    #[error(transparent)]
    Database(#[from] tokio_postgres::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        MigrationError::InvalidMigration(msg.into())
    }

    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        MigrationError::SchemaMismatch(msg.into())
    }

    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        MigrationError::InvalidReference(msg.into())
    }
}
