//! # Invoice Number Repair
//!
//! One-shot pass that gives every invoice a unique, well-formed number.
//!
//! ## Scan
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  invoices in ascending id order, keyset pages of batch_size             │
//! │                                                                         │
//! │  id 1  ""                  → blank      → 2024-06-BTQ001-0001           │
//! │  id 2  "2024-06-BTQ001-0001" held by id 1? no → kept                    │
//! │  id 3  "X"                 → malformed  → next free NNNN                │
//! │  id 4  same as id 2        → duplicate  → next free NNNN                │
//! │                                                                         │
//! │  next free NNNN: smallest c with YYYY-MM-TAG-c held by no lower id      │
//! │  (a later row holding it becomes a duplicate on its own turn)           │
//! │                                                                         │
//! │  after the scan:                                                        │
//! │    raise each (store, month) counter to its highest NNNN                │
//! │    if no row failed: CREATE UNIQUE INDEX idx_invoices_number            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "First seen wins": a row keeps its number when no lower id holds it, and
//! a reassigned row takes the smallest tail no lower id holds. Rows below
//! the scan position are already repaired, so the database answers both
//! checks. An aborted run resumes correctly and a second run changes
//! nothing.
//!
//! Assumes live allocation is quiesced while it runs.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::{RepairPeriod, RepairSettings};
use crate::error::{DbError, DbResult};
use crate::repository::invoice::InvoiceScanRow;
use crate::Database;
use factura_core::{Clock, InvoiceNumber, Period, PeriodZone, SequenceScope, StoreTag};

/// Outcome of a repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: u64,
    /// Rows whose number was already unique and well formed.
    pub retained: u64,
    pub reassigned: u64,
    /// Rows skipped after a non-fatal error.
    pub failed: u64,
    pub counters_raised: u64,
    pub index_created: bool,
}

enum RowOutcome {
    Retained(InvoiceNumber),
    Reassigned(InvoiceNumber),
}

/// State carried across rows of one run.
struct RepairRun<'a> {
    db: &'a Database,
    settings: &'a RepairSettings,
    zone: PeriodZone,
    /// Period stamped on reassigned numbers in wall-clock mode.
    now_period: Period,
    /// Per `YYYY-MM-TAG-` prefix, the smallest NNNN not known to be taken.
    cursors: HashMap<String, i64>,
    /// Highest NNNN seen per counter scope.
    floors: HashMap<SequenceScope, i64>,
}

/// Fills blank numbers and resolves duplicates across all invoices.
///
/// Single-row failures are logged and counted; the run only aborts when the
/// storage itself is unavailable.
pub async fn repair_invoice_numbers(
    db: &Database,
    clock: &dyn Clock,
    settings: &RepairSettings,
) -> DbResult<RepairReport> {
    let zone = db.allocator_settings().time_zone;
    let mut run = RepairRun {
        db,
        settings,
        zone,
        now_period: Period::containing(clock.now(), zone),
        cursors: HashMap::new(),
        floors: HashMap::new(),
    };
    let mut report = RepairReport::default();

    info!(
        period = %settings.period,
        now = %run.now_period,
        batch_size = settings.batch_size,
        "Starting invoice number repair"
    );

    let invoices = db.invoices();
    let mut after_id = 0;
    loop {
        let page = invoices.page_after(after_id, settings.batch_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        after_id = last.id;

        for row in &page {
            report.scanned += 1;

            match run.repair_row(row).await {
                Ok(RowOutcome::Retained(number)) => {
                    report.retained += 1;
                    run.track(row.store_id, &number);
                }
                Ok(RowOutcome::Reassigned(number)) => {
                    report.reassigned += 1;
                    run.track(row.store_id, &number);
                }
                Err(e) if e.is_storage_unavailable() => return Err(e),
                Err(e) => {
                    warn!(id = row.id, number = %row.number, error = %e, "Invoice repair failed, skipping");
                    report.failed += 1;
                }
            }
        }

        debug!(after_id, scanned = report.scanned, "Repair page done");
    }

    if settings.sync_counters {
        report.counters_raised = run.sync_counters().await?;
    }

    if report.failed == 0 {
        report.index_created = invoices.ensure_number_index().await?;
    } else {
        warn!(
            failed = report.failed,
            "Skipping unique number index, rerun repair after fixing failed rows"
        );
    }

    info!(
        scanned = report.scanned,
        retained = report.retained,
        reassigned = report.reassigned,
        failed = report.failed,
        counters_raised = report.counters_raised,
        "Invoice number repair complete"
    );
    Ok(report)
}

impl RepairRun<'_> {
    async fn repair_row(&mut self, row: &InvoiceScanRow) -> DbResult<RowOutcome> {
        let invoices = self.db.invoices();

        if let Ok(number) = InvoiceNumber::parse(&row.number) {
            if !invoices.number_held_before(&row.number, row.id).await? {
                return Ok(RowOutcome::Retained(number));
            }
        }

        let period = match self.settings.period {
            RepairPeriod::WallClock => self.now_period,
            RepairPeriod::CreatedAt => Period::containing(row.created_at, self.zone),
        };
        let tag = StoreTag::for_name(row.store_name.as_deref());
        let cursor = self
            .cursors
            .entry(InvoiceNumber::prefix(period, &tag))
            .or_insert(1);

        loop {
            let candidate = InvoiceNumber::new(period, tag.clone(), *cursor)?;
            *cursor += 1;

            let rendered = candidate.to_string();
            match invoices.update_number(row.id, &rendered).await {
                Ok(()) => {
                    info!(
                        id = row.id,
                        old = %row.number,
                        new = %rendered,
                        "Invoice number reassigned"
                    );
                    return Ok(RowOutcome::Reassigned(candidate));
                }
                Err(DbError::UniqueViolation { .. }) => {
                    debug!(id = row.id, candidate = %rendered, "Candidate taken");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn track(&mut self, store_id: Option<i64>, number: &InvoiceNumber) {
        let scope = SequenceScope::new(store_id, number.period());
        let floor = self.floors.entry(scope).or_insert(0);
        *floor = (*floor).max(number.sequence());
    }

    /// Raises every counter that lags behind the numbers now in the table.
    async fn sync_counters(&self) -> DbResult<u64> {
        let sequences = self.db.sequences();
        let mut raised = 0;

        for (scope, floor) in &self.floors {
            if sequences.raise_floor(*scope, *floor).await? {
                info!(%scope, value = floor, "Counter raised to repaired maximum");
                raised += 1;
            }
        }

        Ok(raised)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
