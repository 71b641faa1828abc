//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Tenant-isolated**: data is partitioned by tenant
//! - **Idempotent**: safe for at-least-once delivery
//!
//! Projection reads are not synchronized with writers; they are views, never
//! a source of truth for mutation decisions.

pub mod investor_stats;

pub use investor_stats::{
    InvestorLedgerLine, InvestorPosition, InvestorStats, InvestorStatsError,
    InvestorStatsProjection, InvestorStatsSummary, LedgerLineKind, MarketPriceSource, NoMarketPrices,
    PayoutRecord, ProductMarketPrices, LEDGER_AGGREGATE_TYPE,
};
