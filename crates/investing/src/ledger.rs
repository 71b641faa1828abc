use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shipstock_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use shipstock_events::Event;
use shipstock_products::ProductId;

use crate::investment::{Investment, InvestmentId, InvestorId, InvoiceId};

/// Investor ledger identifier. One ledger stream per tenant holds every
/// investment, lot and profit entry, so FIFO decisions see all lots at once.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestorLedgerId(pub AggregateId);

impl InvestorLedgerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvestorLedgerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stock lot identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(pub AggregateId);

impl LotId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Units of one product funded by one investment.
///
/// `remaining_quantity` only decreases through sales and only increases
/// through sale reversal; `0 ≤ remaining ≤ total` throughout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLot {
    pub lot_id: LotId,
    pub investment_id: InvestmentId,
    pub product_id: ProductId,
    pub total_quantity: i64,
    pub remaining_quantity: i64,
    /// Landed cost per unit, fixed when the lot opens.
    pub buying_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Immutable audit record of one FIFO deduction.
///
/// Carries the lot it was drawn from, so reversal is a pointer-follow rather
/// than a re-derived oldest-lot guess, and freezes the investment terms in
/// force at sale time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitEntry {
    /// Per-ledger monotonic entry number (audit ordering).
    pub entry_no: u64,
    pub invoice_id: InvoiceId,
    pub investor_id: InvestorId,
    pub investment_id: InvestmentId,
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub total_profit: Decimal,
    pub investor_share: Decimal,
    pub contribution_ratio: Decimal,
    pub profit_share_percentage: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Lot to open when an investment is finalized: one per distinct product in
/// the funded shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotSpec {
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub buying_price: Decimal,
}

/// Aggregate root: InvestorLedger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvestorLedger {
    id: InvestorLedgerId,
    tenant_id: Option<TenantId>,
    investments: Vec<Investment>,
    lots: Vec<StockLot>,
    entries: Vec<ProfitEntry>,
    entry_seq: u64,
    version: u64,
}

impl InvestorLedger {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: InvestorLedgerId) -> Self {
        Self {
            id,
            tenant_id: None,
            investments: Vec::new(),
            lots: Vec::new(),
            entries: Vec::new(),
            entry_seq: 0,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> InvestorLedgerId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn investments(&self) -> &[Investment] {
        &self.investments
    }

    pub fn lots(&self) -> &[StockLot] {
        &self.lots
    }

    pub fn entries(&self) -> &[ProfitEntry] {
        &self.entries
    }

    pub fn investment(&self, investment_id: InvestmentId) -> Option<&Investment> {
        self.investments
            .iter()
            .find(|i| i.investment_id == investment_id)
    }

    pub fn lot(&self, lot_id: LotId) -> Option<&StockLot> {
        self.lots.iter().find(|l| l.lot_id == lot_id)
    }
}

impl AggregateRoot for InvestorLedger {
    type Id = InvestorLedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: FinalizeInvestment (record terms + open the funded lots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeInvestment {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub investment: Investment,
    pub lots: Vec<LotSpec>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseInvestmentTerms (explicit admin edit; history untouched).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseInvestmentTerms {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub investment_id: InvestmentId,
    pub capital_amount: Decimal,
    pub total_shipment_cost: Decimal,
    pub profit_share_percentage: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordSale, the FIFO consumption entry point for one invoice line.
///
/// `buying_price_at_sale` is the catalog price the sale was booked against;
/// it travels with the sale contract but profit is computed from each lot's
/// own landed cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSale {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub invoice_id: InvoiceId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub sale_price: Decimal,
    pub buying_price_at_sale: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseSale, undoing every deduction recorded for an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseSale {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestorLedgerCommand {
    FinalizeInvestment(FinalizeInvestment),
    ReviseInvestmentTerms(ReviseInvestmentTerms),
    RecordSale(RecordSale),
    ReverseSale(ReverseSale),
}

/// Event: InvestmentFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentFinalized {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub investment: Investment,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LotOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotOpened {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub lot_id: LotId,
    pub investment_id: InvestmentId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub buying_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvestmentTermsRevised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentTermsRevised {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub investment_id: InvestmentId,
    pub capital_amount: Decimal,
    pub total_shipment_cost: Decimal,
    pub profit_share_percentage: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfitRecorded (one FIFO deduction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitRecorded {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub entry: ProfitEntry,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProfitReversed (entry deleted, quantity restored to its lot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitReversed {
    pub tenant_id: TenantId,
    pub ledger_id: InvestorLedgerId,
    pub entry_no: u64,
    pub invoice_id: InvoiceId,
    pub investor_id: InvestorId,
    pub investment_id: InvestmentId,
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub investor_share: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestorLedgerEvent {
    InvestmentFinalized(InvestmentFinalized),
    LotOpened(LotOpened),
    InvestmentTermsRevised(InvestmentTermsRevised),
    ProfitRecorded(ProfitRecorded),
    ProfitReversed(ProfitReversed),
}

impl Event for InvestorLedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvestorLedgerEvent::InvestmentFinalized(_) => "investing.ledger.investment_finalized",
            InvestorLedgerEvent::LotOpened(_) => "investing.ledger.lot_opened",
            InvestorLedgerEvent::InvestmentTermsRevised(_) => "investing.ledger.terms_revised",
            InvestorLedgerEvent::ProfitRecorded(_) => "investing.ledger.profit_recorded",
            InvestorLedgerEvent::ProfitReversed(_) => "investing.ledger.profit_reversed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvestorLedgerEvent::InvestmentFinalized(e) => e.occurred_at,
            InvestorLedgerEvent::LotOpened(e) => e.occurred_at,
            InvestorLedgerEvent::InvestmentTermsRevised(e) => e.occurred_at,
            InvestorLedgerEvent::ProfitRecorded(e) => e.occurred_at,
            InvestorLedgerEvent::ProfitReversed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InvestorLedger {
    type Command = InvestorLedgerCommand;
    type Event = InvestorLedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvestorLedgerEvent::InvestmentFinalized(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.investments.push(e.investment.clone());
            }
            InvestorLedgerEvent::LotOpened(e) => {
                self.lots.push(StockLot {
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
                if let Some(investment) = self
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
                if let Some(lot) = self.lots.iter_mut().find(|l| l.lot_id == e.entry.lot_id) {
                    lot.remaining_quantity -= e.entry.quantity;
                }
                self.entry_seq = self.entry_seq.max(e.entry.entry_no);
                self.entries.push(e.entry.clone());
            }
            InvestorLedgerEvent::ProfitReversed(e) => {
                if let Some(lot) = self.lots.iter_mut().find(|l| l.lot_id == e.lot_id) {
                    lot.remaining_quantity += e.quantity;
                }
                self.entries.retain(|entry| entry.entry_no != e.entry_no);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvestorLedgerCommand::FinalizeInvestment(cmd) => self.handle_finalize(cmd),
            InvestorLedgerCommand::ReviseInvestmentTerms(cmd) => self.handle_revise(cmd),
            InvestorLedgerCommand::RecordSale(cmd) => self.handle_record_sale(cmd),
            InvestorLedgerCommand::ReverseSale(cmd) => self.handle_reverse_sale(cmd),
        }
    }
}

impl InvestorLedger {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            Some(existing) if existing != tenant_id => {
                Err(DomainError::invariant("tenant mismatch"))
            }
            _ => Ok(()),
        }
    }

    fn ensure_ledger_id(&self, ledger_id: InvestorLedgerId) -> Result<(), DomainError> {
        if self.id != ledger_id {
            return Err(DomainError::invariant("ledger_id mismatch"));
        }
        Ok(())
    }

    fn handle_finalize(
        &self,
        cmd: &FinalizeInvestment,
    ) -> Result<Vec<InvestorLedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        cmd.investment.validate()?;
        if self.investment(cmd.investment.investment_id).is_some() {
            return Err(DomainError::conflict("investment already finalized"));
        }

        if cmd.lots.is_empty() {
            return Err(DomainError::validation(
                "investment must fund at least one lot",
            ));
        }
        for (idx, lot) in cmd.lots.iter().enumerate() {
            if lot.quantity <= 0 {
                return Err(DomainError::validation("lot quantity must be positive"));
            }
            if lot.buying_price < Decimal::ZERO {
                return Err(DomainError::validation("lot buying price cannot be negative"));
            }
            // One lot per distinct product in the funded shipment.
            if cmd.lots[..idx].iter().any(|l| l.product_id == lot.product_id) {
                return Err(DomainError::validation(format!(
                    "duplicate lot for product {}",
                    lot.product_id
                )));
            }
        }

        let mut events = vec![InvestorLedgerEvent::InvestmentFinalized(
            InvestmentFinalized {
                tenant_id: cmd.tenant_id,
                ledger_id: cmd.ledger_id,
                investment: cmd.investment.clone(),
                occurred_at: cmd.occurred_at,
            },
        )];
        events.extend(cmd.lots.iter().map(|lot| {
            InvestorLedgerEvent::LotOpened(LotOpened {
                tenant_id: cmd.tenant_id,
                ledger_id: cmd.ledger_id,
                lot_id: lot.lot_id,
                investment_id: cmd.investment.investment_id,
                product_id: lot.product_id,
                quantity: lot.quantity,
                buying_price: lot.buying_price,
                occurred_at: cmd.occurred_at,
            })
        }));
        Ok(events)
    }

    fn handle_revise(
        &self,
        cmd: &ReviseInvestmentTerms,
    ) -> Result<Vec<InvestorLedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        let current = self
            .investment(cmd.investment_id)
            .ok_or(DomainError::NotFound)?;

        let revised = Investment {
            capital_amount: cmd.capital_amount,
            total_shipment_cost: cmd.total_shipment_cost,
            profit_share_percentage: cmd.profit_share_percentage,
            ..current.clone()
        };
        revised.validate()?;

        Ok(vec![InvestorLedgerEvent::InvestmentTermsRevised(
            InvestmentTermsRevised {
                tenant_id: cmd.tenant_id,
                ledger_id: cmd.ledger_id,
                investment_id: cmd.investment_id,
                capital_amount: cmd.capital_amount,
                total_shipment_cost: cmd.total_shipment_cost,
                profit_share_percentage: cmd.profit_share_percentage,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_record_sale(
        &self,
        cmd: &RecordSale,
    ) -> Result<Vec<InvestorLedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("sale quantity must be positive"));
        }

        // FIFO: open lots for the product, oldest first. Stable sort keeps
        // insertion order for lots opened at the same instant.
        let mut open_lots: Vec<&StockLot> = self
            .lots
            .iter()
            .filter(|l| l.product_id == cmd.product_id && l.remaining_quantity > 0)
            .collect();
        open_lots.sort_by_key(|l| l.opened_at);

        let mut still_needed = cmd.quantity;
        let mut events = Vec::new();

        for lot in open_lots {
            if still_needed == 0 {
                break;
            }

            let investment = self.investment(lot.investment_id).ok_or_else(|| {
                DomainError::invariant("lot references an unknown investment")
            })?;

            let quantity = still_needed.min(lot.remaining_quantity);
            let ratio = investment.contribution_ratio();
            let share_pct = investment.profit_share_percentage;
            let total_profit = (cmd.sale_price - lot.buying_price) * Decimal::from(quantity);
            let investor_share = total_profit * ratio * share_pct / Decimal::from(100);

            events.push(InvestorLedgerEvent::ProfitRecorded(ProfitRecorded {
                tenant_id: cmd.tenant_id,
                ledger_id: cmd.ledger_id,
                entry: ProfitEntry {
                    entry_no: self.entry_seq + events.len() as u64 + 1,
                    invoice_id: cmd.invoice_id,
                    investor_id: investment.investor_id,
                    investment_id: investment.investment_id,
                    lot_id: lot.lot_id,
                    product_id: cmd.product_id,
                    quantity,
                    total_profit,
                    investor_share,
                    contribution_ratio: ratio,
                    profit_share_percentage: share_pct,
                    occurred_at: cmd.occurred_at,
                },
                occurred_at: cmd.occurred_at,
            }));

            still_needed -= quantity;
        }

        // Quantity sold beyond all investor lots is ordinary margin; it
        // simply attracts no entries.
        Ok(events)
    }

    fn handle_reverse_sale(
        &self,
        cmd: &ReverseSale,
    ) -> Result<Vec<InvestorLedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_ledger_id(cmd.ledger_id)?;

        // An invoice with no recorded entries had no investor participation;
        // reversing it is a no-op, not an error.
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.invoice_id == cmd.invoice_id)
            .map(|entry| {
                InvestorLedgerEvent::ProfitReversed(ProfitReversed {
                    tenant_id: cmd.tenant_id,
                    ledger_id: cmd.ledger_id,
                    entry_no: entry.entry_no,
                    invoice_id: entry.invoice_id,
                    investor_id: entry.investor_id,
                    investment_id: entry.investment_id,
                    lot_id: entry.lot_id,
                    product_id: entry.product_id,
                    quantity: entry.quantity,
                    investor_share: entry.investor_share,
                    occurred_at: cmd.occurred_at,
                })
            })
            .collect())
    }
}
