//! Relational migration: batched row copy with row-count verification

use tracing::{debug, info, warn};

use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;
use crate::scheduler::run_bounded;
use crate::state::{Statistics, TableLedger, TableOutcome};
use crate::stores::{RelationalStore, StorePair, TableRef};

/// Copies every base table in fixed-size batches
#[derive(Debug, Clone)]
pub struct RelationalMigrator {
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
}

impl RelationalMigrator {
    pub fn new(batch_size: usize, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// Transfer every table and verify each one's row count on the target
    pub async fn migrate(
        &self,
        stores: &StorePair<dyn RelationalStore>,
        stats: &Statistics,
        ledger: &TableLedger,
    ) -> Result<()> {
        let tables = self
            .retry
            .run("table enumeration", || stores.source.list_tables())
            .await?;

        info!(
            tables = tables.len(),
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "Starting relational migration"
        );

        run_bounded(tables, self.concurrency, |table| {
            self.migrate_table(stores, stats, ledger, table)
        })
        .await?;

        Ok(())
    }

    async fn migrate_table(
        &self,
        stores: &StorePair<dyn RelationalStore>,
        stats: &Statistics,
        ledger: &TableLedger,
        table: TableRef,
    ) -> Result<()> {
        let unit = table.to_string();
        let (source, target) = (&stores.source, &stores.target);

        // Captured once; the loop bound never changes mid-transfer
        let total_rows = self.retry.run(&unit, || source.count_rows(&table)).await?;

        if total_rows == 0 {
            info!(table = %table, "Table is empty, skipping");
            ledger.record(TableOutcome {
                table: unit,
                source_rows: 0,
                target_rows: 0,
                skipped_empty: true,
            });
            stats.add_table();
            return Ok(());
        }

        info!(table = %table, rows = total_rows, "Migrating table");

        let step = self.batch_size as u64;
        let mut offset: u64 = 0;
        while offset < total_rows {
            let batch_unit = format!("{table} rows {offset}..{}", offset + step);

            let rows = self
                .retry
                .run(&batch_unit, || source.fetch_batch(&table, offset, self.batch_size))
                .await?;

            if rows.is_empty() {
                warn!(table = %table, offset, "Source returned no rows before reaching its counted total");
                break;
            }

            let inserted = self
                .retry
                .run(&batch_unit, || target.insert_batch(&table, &rows))
                .await?;
            let skipped = (rows.len() as u64).saturating_sub(inserted);

            if skipped > 0 {
                warn!(
                    table = %table,
                    offset,
                    skipped,
                    "Target already held rows with the same key; left unchanged"
                );
            }

            stats.add_rows(inserted, skipped);
            debug!(table = %table, offset, fetched = rows.len(), inserted, "Batch committed");

            offset += step;
        }

        let target_rows = self.retry.run(&unit, || target.count_rows(&table)).await?;

        ledger.record(TableOutcome {
            table: unit.clone(),
            source_rows: total_rows,
            target_rows,
            skipped_empty: false,
        });

        if target_rows != total_rows {
            return Err(MigrationError::RowCountMismatch {
                table: unit,
                expected: total_rows,
                actual: target_rows,
            });
        }

        stats.add_table();
        info!(table = %table, rows = total_rows, "Table verified");
        Ok(())
    }
}
