use std::{cmp::min, future::Future, time::Duration};

use rand::prelude::*;
use tokio_postgres::{self as postgres, types::ToSql, NoTls, Row};

use anyhow::{anyhow, Context};

use crate::cancellation::CancellationToken;
use crate::identifiers;

// Lock wraps a regular Postgres connection, only allowing access through
// the `lock` method. This acquires a Postgres advisory lock before handing
// out the connection and releases it afterwards.
//
// We use an advisory lock to avoid multiple pgroll instances working on
// the same database schema at the same time; the concurrency model allows
// at most one active migration per schema.
//
// Postgres docs on advisory locks:
//   https://www.postgresql.org/docs/current/explicit-locking.html#ADVISORY-LOCKS
pub struct Lock {
    client: Postgres,
}

impl Lock {
    // Advisory lock keys in Postgres are 64-bit integers. Derived from the
    // same digest the Name Generator uses for every other stable
    // identifier this crate produces, rather than a hand-picked constant,
    // so the key stays specific to this crate without needing its own
    // magic number.
    fn lock_key() -> i64 {
        let hash = identifiers::digest("pgroll.advisory_lock");
        u64::from_str_radix(&hash[..16], 16).unwrap() as i64
    }

    pub async fn connect(config: &postgres::Config, cancellation: CancellationToken) -> anyhow::Result<Self> {
        let (pg, conn) = config.connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::error!(error = %err, "postgres connection task failed");
            }
        });

        // When running DDL queries that acquire locks, we risk causing a
        // "lock queue": while waiting to acquire a lock, Postgres blocks
        // other queries on the table. Bounding how long we wait with
        // lock_timeout keeps us from holding up unrelated traffic; the
        // retry loop below handles the resulting LOCK_NOT_AVAILABLE errors.
        pg.simple_query("SET lock_timeout = '1s'")
            .await
            .context("failed to set lock_timeout")?;

        Ok(Self {
            client: Postgres::new(pg, cancellation),
        })
    }

    pub async fn lock<'a, F, Fut, T>(&'a mut self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&'a mut Postgres) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + 'a,
    {
        // Safety: the raw pointer only ever aliases `self.client`, which
        // outlives `'a` as part of `self`. Each dereference below is used
        // sequentially (acquire, then `f`, then release), never
        // concurrently, so this does not violate unique-borrow guarantees;
        // it only works around the borrow checker's inability to see that
        // the three accesses don't overlap in time.
        let client_ptr: *mut Postgres = &mut self.client;
        unsafe { Self::acquire_lock(&mut *client_ptr).await? };
        let result = f(unsafe { &mut *client_ptr }).await;
        unsafe { Self::release_lock(&mut *client_ptr).await? };

        result
    }

    pub fn client(&mut self) -> &mut Postgres {
        &mut self.client
    }

    async fn acquire_lock(client: &mut Postgres) -> anyhow::Result<()> {
        let success = client
            .query(&format!("SELECT pg_try_advisory_lock({})", Self::lock_key()))
            .await?
            .first()
            .ok_or_else(|| anyhow!("unexpectedly failed when acquiring advisory lock"))
            .map(|row| row.get::<'_, _, bool>(0))?;

        if success {
            Ok(())
        } else {
            Err(anyhow!("another instance of pgroll is already running against this database"))
        }
    }

    async fn release_lock(client: &mut Postgres) -> anyhow::Result<()> {
        client
            .query(&format!("SELECT pg_advisory_unlock({})", Self::lock_key()))
            .await?
            .first()
            .ok_or_else(|| anyhow!("unexpectedly failed when releasing advisory lock"))?;
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait Connection: Send {
    async fn run(&mut self, query: &str) -> anyhow::Result<()>;

    async fn query(&mut self, query: &str) -> anyhow::Result<Vec<Row>>;

    async fn query_with_params(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<Vec<Row>>;

    async fn transaction(&mut self) -> anyhow::Result<Transaction>;
}

pub struct Postgres {
    client: postgres::Client,
    cancellation: CancellationToken,
}

impl Postgres {
    fn new(client: postgres::Client, cancellation: CancellationToken) -> Self {
        Postgres { client, cancellation }
    }
}

#[async_trait::async_trait]
impl Connection for Postgres {
    async fn run(&mut self, query: &str) -> anyhow::Result<()> {
        self.cancellation.check()?;
        retry_automatically(|| self.client.batch_execute(query)).await?;
        Ok(())
    }

    async fn query(&mut self, query: &str) -> anyhow::Result<Vec<Row>> {
        self.cancellation.check()?;
        let rows = retry_automatically(|| self.client.query(query, &[])).await?;
        Ok(rows)
    }

    async fn query_with_params(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<Vec<Row>> {
        self.cancellation.check()?;
        let rows = retry_automatically(|| self.client.query(query, params)).await?;
        Ok(rows)
    }

    async fn transaction(&mut self) -> anyhow::Result<Transaction> {
        let transaction = self.client.transaction().await?;
        Ok(Transaction {
            transaction,
            cancellation: self.cancellation.clone(),
        })
    }
}

pub struct Transaction<'a> {
    transaction: postgres::Transaction<'a>,
    cancellation: CancellationToken,
}

impl Transaction<'_> {
    pub async fn commit(self) -> anyhow::Result<()> {
        self.transaction.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> anyhow::Result<()> {
        self.transaction.rollback().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connection for Transaction<'_> {
    async fn run(&mut self, query: &str) -> anyhow::Result<()> {
        self.cancellation.check()?;
        self.transaction.batch_execute(query).await?;
        Ok(())
    }

    async fn query(&mut self, query: &str) -> anyhow::Result<Vec<Row>> {
        self.cancellation.check()?;
        let rows = self.transaction.query(query, &[]).await?;
        Ok(rows)
    }

    async fn query_with_params(
        &mut self,
        query: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<Vec<Row>> {
        self.cancellation.check()?;
        let rows = self.transaction.query(query, params).await?;
        Ok(rows)
    }

    async fn transaction(&mut self) -> anyhow::Result<Transaction> {
        let transaction = self.transaction.transaction().await?;
        Ok(Transaction {
            transaction,
            cancellation: self.cancellation.clone(),
        })
    }
}

// Retry a database operation with exponential backoff and jitter.
async fn retry_automatically<T, F, Fut>(mut f: F) -> Result<T, postgres::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, postgres::Error>>,
{
    const STARTING_WAIT_TIME: u64 = 100;
    const MAX_WAIT_TIME: u64 = 3_200;
    const MAX_ATTEMPTS: u32 = 10;

    let mut rng = rand::rngs::OsRng;
    let mut attempts = 0;
    loop {
        let result = f().await;

        let error = match result {
            Ok(_) => return result,
            Err(err) => err,
        };

        // A DB error tells us whether it's worth retrying; the absence of
        // one usually means a connection-level failure, which we also
        // retry.
        if let Some(db_error) = error.as_db_error() {
            if !error_retryable(db_error) {
                return Err(error);
            }
        }

        attempts += 1;
        if attempts >= MAX_ATTEMPTS {
            return Err(error);
        }

        let wait_time = min(MAX_WAIT_TIME, STARTING_WAIT_TIME * u64::pow(2, attempts - 1));
        let jitter: u64 = rng.gen_range(0..wait_time / 2);

        tracing::debug!(attempt = attempts, wait_time_ms = wait_time + jitter, "retrying after transient database error");
        tokio::time::sleep(Duration::from_millis(wait_time + jitter)).await;
    }
}

// LOCK_NOT_AVAILABLE is caused by lock_timeout being exceeded; it is the
// only error class we treat as transient.
fn error_retryable(error: &postgres::error::DbError) -> bool {
    matches!(error.code(), &postgres::error::SqlState::LOCK_NOT_AVAILABLE)
}
