//! The Backfill Task: batched propagation of existing rows through the
//! up/down trigger pair installed for a column under migration.
//!
//! A backfill does not write data directly. It drives `UPDATE`s of the
//! `_pgroll_needs_backfill` sentinel column, which has no meaning of its
//! own beyond forcing the row's `BEFORE UPDATE` triggers to re-run and
//! recompute the shadow (or original) column from the row's current
//! values.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_postgres::{Config, NoTls};

use crate::cancellation::CancellationToken;
use crate::error::{MigrationError, Result};

const DEFAULT_BATCH_SIZE: i64 = 1_000;
const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(20);
const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct BackfillTask {
    pub table: String,
    /// Single-column primary key, or a `UNIQUE NOT NULL` column, used to
    /// order and partition batches. A table without one is backfill
    /// infeasible (spec 7, "Backfill infeasible").
    pub key_column: String,
    pub batch_size: i64,
    pub batch_delay: Duration,
    pub max_concurrency: usize,
}

impl BackfillTask {
    pub fn new(table: impl Into<String>, key_column: impl Into<String>) -> Self {
        BackfillTask {
            table: table.into(),
            key_column: key_column.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    /// Runs the backfill to completion against `config`, opening one
    /// connection per worker so batches genuinely execute concurrently,
    /// bounded by `max_concurrency`. Each batch commits on its own.
    pub async fn run(&self, config: &Config, cancellation: &CancellationToken) -> anyhow::Result<()> {
        let (control, conn) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        // Cast to bigint so the bounds come back as i64 regardless of the
        // key column's actual integer width (smallint/integer/bigint).
        let bounds_row = control
            .query_opt(
                &format!(
                    r#"SELECT min("{key}")::bigint, max("{key}")::bigint FROM "{table}""#,
                    key = self.key_column,
                    table = self.table
                ),
                &[],
            )
            .await?;

        let (min, max): (Option<i64>, Option<i64>) = match bounds_row {
            Some(row) => (row.get(0), row.get(1)),
            None => (None, None),
        };

        let (Some(min), Some(max)) = (min, max) else {
            // Table is empty; nothing to backfill.
            return Ok(());
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let mut handles = Vec::new();

        let mut lower = min;
        while lower <= max {
            cancellation.check()?;

            let upper = lower.saturating_add(self.batch_size);
            let permit = semaphore.clone().acquire_owned().await?;
            let config = config.clone();
            let table = self.table.clone();
            let key_column = self.key_column.clone();
            let delay = self.batch_delay;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let (client, conn) = config.connect(NoTls).await?;
                tokio::spawn(async move {
                    let _ = conn.await;
                });

                client
                    .execute(
                        &format!(
                            r#"UPDATE "{table}" SET "_pgroll_needs_backfill" = NOT "_pgroll_needs_backfill" WHERE "{key}" >= $1 AND "{key}" < $2"#,
                            table = table,
                            key = key_column,
                        ),
                        &[&lower, &upper],
                    )
                    .await?;

                tokio::time::sleep(delay).await;
                Ok::<(), anyhow::Error>(())
            }));

            lower = upper;
        }

        for handle in handles {
            handle.await??;
        }

        Ok(())
    }
}

/// Chooses the column a backfill should key on: the table's single-column
/// primary key if there is one, otherwise a `UNIQUE NOT NULL` column.
/// Composite primary keys and tables with neither fail with
/// `BackfillInfeasible`, matching spec 7.
pub fn backfill_key_column(table: &crate::schema::Table) -> Result<String> {
    if table.primary_key.len() == 1 {
        return Ok(table.primary_key[0].clone());
    }
    if table.primary_key.len() > 1 {
        return Err(MigrationError::BackfillInfeasible {
            table: table.name.clone(),
            reason: "composite primary keys are not supported as a backfill key".to_string(),
        });
    }

    for constraint in table.constraints() {
        if let crate::schema::Constraint::Unique { columns, .. } = constraint {
            if columns.len() == 1 {
                if let Some(column) = table.get_column(&columns[0]) {
                    if !column.nullable {
                        return Ok(column.name.clone());
                    }
                }
            }
        }
    }

    Err(MigrationError::BackfillInfeasible {
        table: table.name.clone(),
        reason: "table has no single-column primary key or UNIQUE NOT NULL column".to_string(),
    })
}
