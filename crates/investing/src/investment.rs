use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shipstock_core::{AggregateId, DomainError, DomainResult};
use shipstock_importing::{ImportOrderId, ShipmentId};

/// Investor identifier (the investor profile itself lives elsewhere).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestorId(pub AggregateId);

impl InvestorId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvestorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Investment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestmentId(pub AggregateId);

impl InvestmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvestmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sale/invoice reference from the external sales subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One investor's capital commitment against one shipment.
///
/// The contribution ratio is derived, never stored, so capital and cost can
/// be revised atomically; profit entries freeze the ratio they were computed
/// with at sale time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub investment_id: InvestmentId,
    pub investor_id: InvestorId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub capital_amount: Decimal,
    pub total_shipment_cost: Decimal,
    /// Percentage of attributable profit paid out, 0 < pct ≤ 100.
    pub profit_share_percentage: Decimal,
}

impl Investment {
    /// `capital / total shipment cost`. Guarded positive by [`validate`].
    ///
    /// [`validate`]: Investment::validate
    pub fn contribution_ratio(&self) -> Decimal {
        self.capital_amount / self.total_shipment_cost
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.capital_amount <= Decimal::ZERO {
            return Err(DomainError::validation("capital amount must be positive"));
        }
        if self.total_shipment_cost <= Decimal::ZERO {
            return Err(DomainError::validation(
                "total shipment cost must be positive",
            ));
        }
        if self.profit_share_percentage <= Decimal::ZERO
            || self.profit_share_percentage > Decimal::from(100)
        {
            return Err(DomainError::validation(
                "profit share percentage must be in (0, 100]",
            ));
        }
        Ok(())
    }
}
