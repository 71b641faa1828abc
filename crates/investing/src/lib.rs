//! Investor funding module (stock lots, profit sharing, event-sourced).
//!
//! An investment ties an investor's capital to one shipment; the funded goods
//! become FIFO stock lots that external sales consume, producing immutable
//! profit entries. Pure domain logic only: no IO, no persistence concerns.

pub mod investment;
pub mod ledger;

pub use investment::{Investment, InvestmentId, InvestorId, InvoiceId};
pub use ledger::{
    FinalizeInvestment, InvestmentFinalized, InvestmentTermsRevised, InvestorLedger,
    InvestorLedgerCommand, InvestorLedgerEvent, InvestorLedgerId, LotId, LotOpened, LotSpec,
    ProfitEntry, ProfitRecorded, ProfitReversed, RecordSale, ReverseSale, ReviseInvestmentTerms,
    StockLot,
};
