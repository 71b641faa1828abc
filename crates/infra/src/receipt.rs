//! Stock receipt application (two-phase).
//!
//! Receiving a shipment touches one catalog product per costed line, and the
//! product store offers no cross-product atomicity. Instead of a single
//! success/failure verdict over N independent writes, application is split
//! into an explicit stage/commit pair with a compensating revert:
//!
//! 1. [`StockReceiptProcessor::stage`]: read-only. Resolves every line's
//!    product (id first, then the name → short-name → SKU text chain) and
//!    captures the current buying price so an undo can restore it exactly.
//!    Unresolvable lines are collected, not fatal.
//! 2. [`StockReceiptProcessor::commit`]: applies `quantity += n` and
//!    `buying_price = applied` per staged line. A failing line is recorded
//!    and the loop continues; the returned [`ReceiptReport`] says exactly
//!    which lines landed and which did not.
//! 3. [`StockReceiptProcessor::revert`]: the inverse, driven by a report:
//!    `quantity -= n`, buying price restored to the captured previous value.
//!
//! The report is serializable so callers can persist it alongside the
//! shipment and hand it back for undo-receive later.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use shipstock_core::TenantId;
use shipstock_importing::ReceiptLine;
use shipstock_products::{ProductId, ProductStore, ProductStoreError};

/// Why a line could not be applied (or reverted).
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineError {
    /// No catalog product matched the line's id or any text fallback.
    #[error("no product matches '{0}'")]
    Unresolved(String),

    /// The product store rejected the write.
    #[error("product store write failed: {0}")]
    Store(String),
}

impl From<ProductStoreError> for LineError {
    fn from(value: ProductStoreError) -> Self {
        LineError::Store(value.to_string())
    }
}

/// A line resolved against the catalog, ready to commit.
///
/// `previous_buying_price` is captured at stage time; revert writes it back
/// verbatim, making undo-receive an exact inverse per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedLine {
    pub line: ReceiptLine,
    pub product_id: ProductId,
    pub previous_buying_price: i64,
}

/// A line that could not be staged or applied, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLine {
    pub line: ReceiptLine,
    pub error: LineError,
}

/// Stage output: resolved lines plus the ones that found no product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedReceipt {
    pub staged: Vec<StagedLine>,
    pub unresolved: Vec<FailedLine>,
}

/// Partial-success outcome of a commit.
///
/// `applied` lines carry everything revert needs; `failed` collects both the
/// lines that never resolved and the ones whose write was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptReport {
    pub applied: Vec<StagedLine>,
    pub failed: Vec<FailedLine>,
}

impl ReceiptReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a revert pass over a report's applied lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertReport {
    pub reverted: Vec<StagedLine>,
    pub failed: Vec<FailedLine>,
}

/// Applies a received shipment's costed lines to the product catalog.
#[derive(Debug)]
pub struct StockReceiptProcessor<S> {
    store: S,
}

impl<S> StockReceiptProcessor<S>
where
    S: ProductStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve every line and capture current buying prices. No writes.
    pub fn stage(&self, tenant_id: TenantId, lines: &[ReceiptLine]) -> StagedReceipt {
        let mut staged = Vec::with_capacity(lines.len());
        let mut unresolved = Vec::new();

        for line in lines {
            let record = line
                .product_id
                .and_then(|pid| self.store.get(tenant_id, &pid))
                .or_else(|| self.store.find_by_text(tenant_id, &line.name));

            match record {
                Some(product) => staged.push(StagedLine {
                    line: line.clone(),
                    product_id: product.product_id,
                    previous_buying_price: product.buying_price,
                }),
                None => {
                    warn!(
                        item = %line.name,
                        "receipt line resolved no catalog product"
                    );
                    unresolved.push(FailedLine {
                        line: line.clone(),
                        error: LineError::Unresolved(line.name.clone()),
                    });
                }
            }
        }

        StagedReceipt { staged, unresolved }
    }

    /// Apply the staged lines, one product write pair per line.
    ///
    /// A line whose price write fails after its quantity write succeeded gets
    /// the quantity write compensated before being reported as failed, so no
    /// line is ever half-applied.
    pub fn commit(&self, tenant_id: TenantId, staged: StagedReceipt) -> ReceiptReport {
        let mut applied = Vec::with_capacity(staged.staged.len());
        let mut failed = staged.unresolved;

        for entry in staged.staged {
            match self.apply_line(tenant_id, &entry) {
                Ok(()) => applied.push(entry),
                Err(error) => {
                    warn!(
                        product = %entry.product_id,
                        item = %entry.line.name,
                        %error,
                        "receipt line failed to apply"
                    );
                    failed.push(FailedLine {
                        line: entry.line,
                        error,
                    });
                }
            }
        }

        ReceiptReport { applied, failed }
    }

    /// Stage and commit in one step.
    pub fn apply(&self, tenant_id: TenantId, lines: &[ReceiptLine]) -> ReceiptReport {
        let staged = self.stage(tenant_id, lines);
        self.commit(tenant_id, staged)
    }

    /// Undo every applied line of a report: `quantity -= n`, buying price
    /// restored to the value captured at stage time.
    pub fn revert(&self, tenant_id: TenantId, report: &ReceiptReport) -> RevertReport {
        let mut reverted = Vec::with_capacity(report.applied.len());
        let mut failed = Vec::new();

        for entry in &report.applied {
            let outcome = self
                .store
                .adjust_quantity(tenant_id, &entry.product_id, -entry.line.quantity)
                .and_then(|()| {
                    self.store.set_buying_price(
                        tenant_id,
                        &entry.product_id,
                        entry.previous_buying_price,
                    )
                });

            match outcome {
                Ok(()) => reverted.push(entry.clone()),
                Err(e) => {
                    let error = LineError::from(e);
                    warn!(
                        product = %entry.product_id,
                        item = %entry.line.name,
                        %error,
                        "receipt line failed to revert"
                    );
                    failed.push(FailedLine {
                        line: entry.line.clone(),
                        error,
                    });
                }
            }
        }

        RevertReport { reverted, failed }
    }

    fn apply_line(&self, tenant_id: TenantId, entry: &StagedLine) -> Result<(), LineError> {
        self.store
            .adjust_quantity(tenant_id, &entry.product_id, entry.line.quantity)?;

        if let Err(e) = self.store.set_buying_price(
            tenant_id,
            &entry.product_id,
            entry.line.applied_price,
        ) {
            // Compensate the quantity write so the line fails whole.
            let _ = self
                .store
                .adjust_quantity(tenant_id, &entry.product_id, -entry.line.quantity);
            return Err(e.into());
        }

        Ok(())
    }
}
