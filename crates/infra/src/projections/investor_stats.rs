//! Investor stats projection.
//!
//! Folds the investor ledger stream into per-investor views: positions with
//! realized and projected profit, a chronological money ledger with a running
//! balance, and summary totals. Capital enters through investment events;
//! withdrawals are externally-owned payout records ingested via
//! [`InvestorStatsProjection::record_payout`] (the admin capital-management
//! flow owns them, this projection only reads them).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shipstock_core::{AggregateId, TenantId};
use shipstock_events::EventEnvelope;
use shipstock_importing::ShipmentId;
use shipstock_investing::{InvestmentId, InvestorId, InvestorLedgerEvent, LotId};
use shipstock_products::ProductId;

/// Stream type this projection consumes.
pub const LEDGER_AGGREGATE_TYPE: &str = "investing.ledger";

/// Source of current market (selling) prices, used to project profit on
/// positions with no sales history yet.
pub trait MarketPriceSource {
    fn market_price(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<Decimal>;
}

/// No prices available; unsold positions project zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMarketPrices;

impl MarketPriceSource for NoMarketPrices {
    fn market_price(&self, _tenant_id: TenantId, _product_id: &ProductId) -> Option<Decimal> {
        None
    }
}

/// Fixed per-product price table for tests/dev.
#[derive(Debug, Default)]
pub struct ProductMarketPrices {
    prices: RwLock<HashMap<(TenantId, ProductId), Decimal>>,
}

impl ProductMarketPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tenant_id: TenantId, product_id: ProductId, price: Decimal) {
        if let Ok(mut prices) = self.prices.write() {
            prices.insert((tenant_id, product_id), price);
        }
    }
}

impl MarketPriceSource for ProductMarketPrices {
    fn market_price(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<Decimal> {
        let prices = self.prices.read().ok()?;
        prices.get(&(tenant_id, *product_id)).copied()
    }
}

/// Externally-owned withdrawal record.
///
/// `shipment_id` carries the legacy per-shipment payout linkage where one
/// exists; newer payouts are global (None).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub payout_id: Uuid,
    pub investor_id: InvestorId,
    pub amount: Decimal,
    pub shipment_id: Option<ShipmentId>,
    pub occurred_at: DateTime<Utc>,
}

/// One funded position: a lot plus its realized/projected profit figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestorPosition {
    pub investment_id: InvestmentId,
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub buying_price: Decimal,
    pub total_quantity: i64,
    pub remaining_quantity: i64,
    pub quantity_sold: i64,
    pub realized_profit: Decimal,
    pub projected_profit: Decimal,
}

/// What a ledger line records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerLineKind {
    /// Capital committed (credit).
    Capital,
    /// Realized profit share (credit).
    ProfitShare,
    /// Withdrawal (debit).
    Payout,
}

/// One chronological ledger line with the balance after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestorLedgerLine {
    pub kind: LedgerLineKind,
    pub occurred_at: DateTime<Utc>,
    pub credit: Decimal,
    pub debit: Decimal,
    pub running_balance: Decimal,
}

/// Summary totals per investor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestorStatsSummary {
    pub capital: Decimal,
    pub realized_profit: Decimal,
    pub projected_profit: Decimal,
    pub withdrawn: Decimal,
    /// capital + realized + projected − withdrawn.
    pub withdrawable: Decimal,
    /// realized + projected − withdrawn; reported raw, may be negative.
    pub profit_withdrawable: Decimal,
}

/// Full per-investor rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestorStats {
    pub investor_id: InvestorId,
    pub summary: InvestorStatsSummary,
    pub positions: Vec<InvestorPosition>,
    pub ledger: Vec<InvestorLedgerLine>,
}

#[derive(Debug, Error)]
pub enum InvestorStatsError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InvestmentView {
    investment_id: InvestmentId,
    investor_id: InvestorId,
    capital_amount: Decimal,
    total_shipment_cost: Decimal,
    profit_share_percentage: Decimal,
    occurred_at: DateTime<Utc>,
}

impl InvestmentView {
    fn contribution_ratio(&self) -> Decimal {
        self.capital_amount / self.total_shipment_cost
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LotView {
    lot_id: LotId,
    investment_id: InvestmentId,
    product_id: ProductId,
    total_quantity: i64,
    remaining_quantity: i64,
    buying_price: Decimal,
    opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryView {
    entry_no: u64,
    investor_id: InvestorId,
    lot_id: LotId,
    quantity: i64,
    investor_share: Decimal,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TenantState {
    investments: Vec<InvestmentView>,
    lots: Vec<LotView>,
    entries: Vec<EntryView>,
    payouts: Vec<PayoutRecord>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// Read-side rollup over the investor ledger stream plus payout records.
#[derive(Debug, Default)]
pub struct InvestorStatsProjection {
    state: RwLock<HashMap<TenantId, TenantState>>,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl InvestorStatsProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest an externally-owned payout record.
    pub fn record_payout(&self, tenant_id: TenantId, payout: PayoutRecord) {
        if let Ok(mut state) = self.state.write() {
            let tenant = state.entry(tenant_id).or_default();
            // Re-ingesting the same payout replaces it (at-least-once safe).
            tenant.payouts.retain(|p| p.payout_id != payout.payout_id);
            tenant.payouts.push(payout);
        }
    }

    /// Apply one envelope from the investor ledger stream.
    ///
    /// Envelopes for other aggregate types are skipped; already-seen sequence
    /// numbers are skipped (idempotent under at-least-once delivery); a gap in
    /// the sequence is an error so a missed event never silently corrupts the
    /// rollup.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), InvestorStatsError> {
        if envelope.aggregate_type() != LEDGER_AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(tenant_id, aggregate_id);

        if seq == 0 {
            return Err(InvestorStatsError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(InvestorStatsError::NonMonotonicSequence { last, found: seq });
        }

        let ev: InvestorLedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| InvestorStatsError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            InvestorLedgerEvent::InvestmentFinalized(e) => e.tenant_id,
            InvestorLedgerEvent::LotOpened(e) => e.tenant_id,
            InvestorLedgerEvent::InvestmentTermsRevised(e) => e.tenant_id,
            InvestorLedgerEvent::ProfitRecorded(e) => e.tenant_id,
            InvestorLedgerEvent::ProfitReversed(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(InvestorStatsError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }

        {
            let mut state = self
                .state
                .write()
                .map_err(|_| InvestorStatsError::LockPoisoned)?;
            let tenant = state.entry(tenant_id).or_default();
            Self::fold(tenant, &ev);
        }

        self.update_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch (payout records survive; they are
    /// not derived from the stream).
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), InvestorStatsError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();

            let mut state = self
                .state
                .write()
                .map_err(|_| InvestorStatsError::LockPoisoned)?;
            let mut cursors = self
                .cursors
                .write()
                .map_err(|_| InvestorStatsError::LockPoisoned)?;
            for t in tenants {
                if let Some(tenant) = state.get_mut(&t) {
                    tenant.investments.clear();
                    tenant.lots.clear();
                    tenant.entries.clear();
                }
                cursors.retain(|k, _| k.tenant_id != t);
            }
        }

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }

    /// Positions with realized and projected profit for one investor.
    pub fn positions(
        &self,
        tenant_id: TenantId,
        investor_id: InvestorId,
        market: &dyn MarketPriceSource,
    ) -> Vec<InvestorPosition> {
        let state = match self.state.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let Some(tenant) = state.get(&tenant_id) else {
            return vec![];
        };

        tenant
            .lots
            .iter()
            .filter_map(|lot| {
                let investment = tenant
                    .investments
                    .iter()
                    .find(|i| i.investment_id == lot.investment_id)?;
                if investment.investor_id != investor_id {
                    return None;
                }

                let (realized, quantity_sold) = tenant
                    .entries
                    .iter()
                    .filter(|e| e.lot_id == lot.lot_id)
                    .fold((Decimal::ZERO, 0i64), |(share, qty), e| {
                        (share + e.investor_share, qty + e.quantity)
                    });

                let projected = projected_profit(
                    lot,
                    investment,
                    realized,
                    quantity_sold,
                    market.market_price(tenant_id, &lot.product_id),
                );

                Some(InvestorPosition {
                    investment_id: lot.investment_id,
                    lot_id: lot.lot_id,
                    product_id: lot.product_id,
                    buying_price: lot.buying_price,
                    total_quantity: lot.total_quantity,
                    remaining_quantity: lot.remaining_quantity,
                    quantity_sold,
                    realized_profit: realized,
                    projected_profit: projected,
                })
            })
            .collect()
    }

    /// Chronological money ledger for one investor, with a running balance.
    pub fn ledger(&self, tenant_id: TenantId, investor_id: InvestorId) -> Vec<InvestorLedgerLine> {
        let state = match self.state.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let Some(tenant) = state.get(&tenant_id) else {
            return vec![];
        };

        let mut lines: Vec<(DateTime<Utc>, LedgerLineKind, Decimal, Decimal)> = Vec::new();

        for investment in &tenant.investments {
            if investment.investor_id == investor_id {
                lines.push((
                    investment.occurred_at,
                    LedgerLineKind::Capital,
                    investment.capital_amount,
                    Decimal::ZERO,
                ));
            }
        }
        for entry in &tenant.entries {
            if entry.investor_id == investor_id {
                lines.push((
                    entry.occurred_at,
                    LedgerLineKind::ProfitShare,
                    entry.investor_share,
                    Decimal::ZERO,
                ));
            }
        }
        for payout in &tenant.payouts {
            if payout.investor_id == investor_id {
                lines.push((
                    payout.occurred_at,
                    LedgerLineKind::Payout,
                    Decimal::ZERO,
                    payout.amount,
                ));
            }
        }

        lines.sort_by_key(|(at, _, _, _)| *at);

        let mut balance = Decimal::ZERO;
        lines
            .into_iter()
            .map(|(occurred_at, kind, credit, debit)| {
                balance += credit - debit;
                InvestorLedgerLine {
                    kind,
                    occurred_at,
                    credit,
                    debit,
                    running_balance: balance,
                }
            })
            .collect()
    }

    /// Full rollup: summary totals, positions, and ledger.
    pub fn stats(
        &self,
        tenant_id: TenantId,
        investor_id: InvestorId,
        market: &dyn MarketPriceSource,
    ) -> InvestorStats {
        let positions = self.positions(tenant_id, investor_id, market);
        let ledger = self.ledger(tenant_id, investor_id);

        let (capital, withdrawn) = {
            let state = self.state.read().ok();
            state
                .as_deref()
                .and_then(|s| s.get(&tenant_id))
                .map(|tenant| {
                    let capital = tenant
                        .investments
                        .iter()
                        .filter(|i| i.investor_id == investor_id)
                        .map(|i| i.capital_amount)
                        .sum();
                    let withdrawn = tenant
                        .payouts
                        .iter()
                        .filter(|p| p.investor_id == investor_id)
                        .map(|p| p.amount)
                        .sum();
                    (capital, withdrawn)
                })
                .unwrap_or((Decimal::ZERO, Decimal::ZERO))
        };

        let realized_profit: Decimal = positions.iter().map(|p| p.realized_profit).sum();
        let projected_profit: Decimal = positions.iter().map(|p| p.projected_profit).sum();

        InvestorStats {
            investor_id,
            summary: InvestorStatsSummary {
                capital,
                realized_profit,
                projected_profit,
                withdrawn,
                withdrawable: capital + realized_profit + projected_profit - withdrawn,
                profit_withdrawable: realized_profit + projected_profit - withdrawn,
            },
            positions,
            ledger,
        }
    }

    fn fold(tenant: &mut TenantState, ev: &InvestorLedgerEvent) {
        match ev {
            InvestorLedgerEvent::InvestmentFinalized(e) => {
                tenant.investments.push(InvestmentView {
                    investment_id: e.investment.investment_id,
                    investor_id: e.investment.investor_id,
                    capital_amount: e.investment.capital_amount,
                    total_shipment_cost: e.investment.total_shipment_cost,
                    profit_share_percentage: e.investment.profit_share_percentage,
                    occurred_at: e.occurred_at,
                });
            }
            InvestorLedgerEvent::LotOpened(e) => {
                tenant.lots.push(LotView {
                    lot_id: e.lot_id,
                    investment_id: e.investment_id,
                    product_id: e.product_id,
                    total_quantity: e.quantity,
                    remaining_quantity: e.quantity,
                    buying_price: e.buying_price,
                    opened_at: e.occurred_at,
                });
            }
            InvestorLedgerEvent::InvestmentTermsRevised(e) => {
                if let Some(investment) = tenant
                    .investments
                    .iter_mut()
                    .find(|i| i.investment_id == e.investment_id)
                {
                    investment.capital_amount = e.capital_amount;
                    investment.total_shipment_cost = e.total_shipment_cost;
                    investment.profit_share_percentage = e.profit_share_percentage;
                }
            }
            InvestorLedgerEvent::ProfitRecorded(e) => {
                if let Some(lot) = tenant.lots.iter_mut().find(|l| l.lot_id == e.entry.lot_id) {
                    lot.remaining_quantity -= e.entry.quantity;
                }
                tenant.entries.push(EntryView {
                    entry_no: e.entry.entry_no,
                    investor_id: e.entry.investor_id,
                    lot_id: e.entry.lot_id,
                    quantity: e.entry.quantity,
                    investor_share: e.entry.investor_share,
                    occurred_at: e.entry.occurred_at,
                });
            }
            InvestorLedgerEvent::ProfitReversed(e) => {
                if let Some(lot) = tenant.lots.iter_mut().find(|l| l.lot_id == e.lot_id) {
                    lot.remaining_quantity += e.quantity;
                }
                tenant.entries.retain(|entry| entry.entry_no != e.entry_no);
            }
        }
    }

    fn cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey {
                    tenant_id,
                    aggregate_id,
                })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                },
                seq,
            );
        }
    }
}

/// Projected profit for what is left in a lot.
///
/// No sales yet: project from the current market price. Otherwise extrapolate
/// from the realized per-unit result, which already bakes in the frozen terms
/// of past sales.
fn projected_profit(
    lot: &LotView,
    investment: &InvestmentView,
    realized: Decimal,
    quantity_sold: i64,
    market_price: Option<Decimal>,
) -> Decimal {
    let remaining = Decimal::from(lot.remaining_quantity);
    if lot.remaining_quantity <= 0 {
        return Decimal::ZERO;
    }

    if quantity_sold == 0 {
        let Some(market) = market_price else {
            return Decimal::ZERO;
        };
        (market - lot.buying_price)
            * remaining
            * investment.contribution_ratio()
            * investment.profit_share_percentage
            / Decimal::from(100)
    } else {
        realized / Decimal::from(quantity_sold) * remaining
    }
}
