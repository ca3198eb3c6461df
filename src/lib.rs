//! pgroll: zero-downtime, reversible schema migrations for Postgres.
//!
//! The public entry point is [`Migrator`]. Build a [`migration::Migration`]
//! out of the operations in [`actions`], then drive it through
//! [`Migrator::start`], [`Migrator::complete`] and [`Migrator::rollback`].

#[macro_use]
extern crate tracing;

pub mod actions;
pub mod backfill;
pub mod cancellation;
pub mod db;
pub mod duplicator;
pub mod error;
pub mod identifiers;
pub mod migration;
pub mod runner;
pub mod schema;
pub mod state;
pub mod trigger;
pub mod view;

use tokio_postgres::Config;

use crate::cancellation::CancellationToken;
use crate::db::Lock;
use crate::migration::Migration;
use crate::runner::Runner;
use crate::schema::VirtualSchema;
use crate::state::{PostgresStateStore, StateStore};

const DEFAULT_TARGET_SCHEMA: &str = "public";

/// Connection options resolved the same way the standalone CLI would, kept
/// here as the one piece of "ambient" configuration this library owns:
/// `PGROLL_URL` takes precedence; otherwise the discrete `PGROLL_HOST` /
/// `PGROLL_PORT` / `PGROLL_DATABASE` / `PGROLL_USERNAME` / `PGROLL_PASSWORD`
/// variables are assembled into a `tokio_postgres::Config`.
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            username: "postgres".to_string(),
            password: None,
        }
    }
}

impl ConnectionOptions {
    pub fn from_env() -> anyhow::Result<Config> {
        if let Ok(url) = std::env::var("PGROLL_URL") {
            return Ok(url.parse()?);
        }

        let defaults = ConnectionOptions::default();
        let mut config = Config::new();
        config
            .host(&std::env::var("PGROLL_HOST").unwrap_or(defaults.host))
            .port(
                std::env::var("PGROLL_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(defaults.port),
            )
            .dbname(&std::env::var("PGROLL_DATABASE").unwrap_or(defaults.database))
            .user(&std::env::var("PGROLL_USERNAME").unwrap_or(defaults.username));

        if let Ok(password) = std::env::var("PGROLL_PASSWORD") {
            config.password(password);
        }

        Ok(config)
    }
}

/// The entry point applications embed. Owns the advisory-locked connection
/// used to drive migrations and the state store recording history.
pub struct Migrator {
    lock: Lock,
    config: Config,
    state: Box<dyn StateStore>,
    target_schema: String,
    cancellation: CancellationToken,
}

impl Migrator {
    pub async fn new(connection_string: &str) -> anyhow::Result<Migrator> {
        let config: Config = connection_string.parse()?;
        Self::new_with_config(config).await
    }

    pub async fn new_with_options(
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
    ) -> anyhow::Result<Migrator> {
        let mut config = Config::new();
        config
            .host(host)
            .port(port)
            .user(username)
            .dbname(database)
            .password(password);

        Self::new_with_config(config).await
    }

    pub async fn from_env() -> anyhow::Result<Migrator> {
        let config = ConnectionOptions::from_env()?;
        Self::new_with_config(config).await
    }

    pub async fn new_with_config(config: Config) -> anyhow::Result<Migrator> {
        let cancellation = CancellationToken::new();
        let lock = Lock::connect(&config, cancellation.clone()).await?;
        Ok(Migrator {
            lock,
            config,
            state: Box::new(PostgresStateStore::new()),
            target_schema: DEFAULT_TARGET_SCHEMA.to_string(),
            cancellation,
        })
    }

    /// Swaps in a caller-provided state store. The persistence format
    /// behind `StateStore` is opaque to the rest of this crate.
    pub fn with_state_store(mut self, state: Box<dyn StateStore>) -> Self {
        self.state = state;
        self
    }

    pub fn with_target_schema(mut self, schema: impl Into<String>) -> Self {
        self.target_schema = schema.into();
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs Start for `migration`: validates it, expands the schema, and
    /// backfills existing rows. The migration remains active afterwards;
    /// call [`Migrator::complete`] or [`Migrator::rollback`] to resolve it.
    pub async fn start(&mut self, migration: &Migration) -> anyhow::Result<VirtualSchema> {
        info!(migration = %migration.name, "starting migration");
        let state = &*self.state;
        let target_schema = self.target_schema.clone();
        let db_config = self.config.clone();
        let cancellation = self.cancellation.clone();

        self.lock
            .lock(|client| async move {
                let mut runner = Runner::new(state, target_schema, db_config);
                runner.cancellation = cancellation;
                runner.start(client, migration).await
            })
            .await
    }

    /// Runs Complete for `migration`: drops the superseded physical
    /// columns, renames shadow columns into place, and drops the previous
    /// version view schema.
    pub async fn complete(&mut self, migration: &Migration) -> anyhow::Result<()> {
        info!(migration = %migration.name, "completing migration");
        let state = &*self.state;
        let target_schema = self.target_schema.clone();
        let db_config = self.config.clone();
        let cancellation = self.cancellation.clone();

        let previous = self
            .state
            .last_completed_migration(self.lock.client(), &target_schema)
            .await?
            .map(|m| m.version_schema().to_string());

        self.lock
            .lock(|client| async move {
                let mut runner = Runner::new(state, target_schema, db_config);
                runner.cancellation = cancellation;
                runner.complete(client, migration, previous.as_deref()).await
            })
            .await
    }

    /// Runs Rollback for `migration`: discards the shadow columns and
    /// triggers, restoring the pre-Start physical shape.
    pub async fn rollback(&mut self, migration: &Migration) -> anyhow::Result<()> {
        info!(migration = %migration.name, "rolling back migration");
        let state = &*self.state;
        let target_schema = self.target_schema.clone();
        let db_config = self.config.clone();
        let cancellation = self.cancellation.clone();

        self.lock
            .lock(|client| async move {
                let mut runner = Runner::new(state, target_schema, db_config);
                runner.cancellation = cancellation;
                runner.rollback(client, migration).await
            })
            .await
    }
}
