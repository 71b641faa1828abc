//! Shipment entities: status machine, codes, addressing.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shipstock_core::{AggregateId, DomainError, DomainResult, Entity};
use shipstock_products::ProductId;

use crate::order::ReceiptLine;

/// Shipment identifier (internal, stable).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub AggregateId);

impl ShipmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Item identifier, shared by order items and their shipment snapshots so a
/// moved item keeps its identity across containers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub AggregateId);

impl ItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human-readable shipment code, `SHP-YYYYMMDD-NNN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentCode(String);

impl ShipmentCode {
    /// Build a code from its parts. `seq` wraps into three digits.
    pub fn from_parts(date: NaiveDate, seq: u32) -> Self {
        Self(format!("SHP-{}-{:03}", date.format("%Y%m%d"), seq % 1000))
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        let valid = parts.len() == 3
            && parts[0] == "SHP"
            && parts[1].len() == 8
            && parts[1].chars().all(|c| c.is_ascii_digit())
            && parts[2].len() == 3
            && parts[2].chars().all(|c| c.is_ascii_digit())
            && NaiveDate::parse_from_str(parts[1], "%Y%m%d").is_ok();

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(DomainError::invalid_id(format!(
                "shipment code must be SHP-YYYYMMDD-NNN, got '{s}'"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ShipmentCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of shipment codes.
///
/// Injected at the boundary; commands that may create a shipment carry a
/// pre-generated allocation so aggregate decision logic stays pure.
pub trait ShipmentCodeGenerator: Send + Sync {
    fn next_code(&self, date: NaiveDate) -> ShipmentCode;
}

/// Monotonic per-day counter. Unlike a random suffix, generated codes never
/// collide within a process.
#[derive(Debug, Default)]
pub struct SequentialShipmentCodes {
    counters: Mutex<HashMap<NaiveDate, u32>>,
}

impl SequentialShipmentCodes {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShipmentCodeGenerator for SequentialShipmentCodes {
    fn next_code(&self, date: NaiveDate) -> ShipmentCode {
        let mut counters = match self.counters.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = counters.entry(date).or_insert(0);
        *seq += 1;
        ShipmentCode::from_parts(date, *seq)
    }
}

/// Identity for a shipment that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentAllocation {
    pub shipment_id: ShipmentId,
    pub code: ShipmentCode,
}

impl ShipmentAllocation {
    pub fn next(generator: &dyn ShipmentCodeGenerator, date: NaiveDate) -> Self {
        Self {
            shipment_id: ShipmentId::new(AggregateId::new()),
            code: generator.next_code(date),
        }
    }
}

/// Canonical shipment lookup key.
///
/// Callers may address a shipment by internal id or by its human code; the
/// shape is decided once, at the boundary, and internal logic only ever
/// matches on the tagged key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentKey {
    ById(ShipmentId),
    ByCode(String),
}

impl ShipmentKey {
    /// Classify a raw identifier string: UUIDs address by id, anything else
    /// by code.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<AggregateId>() {
            Ok(id) => Self::ById(ShipmentId::new(id)),
            Err(_) => Self::ByCode(raw.to_string()),
        }
    }
}

impl From<ShipmentId> for ShipmentKey {
    fn from(value: ShipmentId) -> Self {
        Self::ById(value)
    }
}

impl From<&ShipmentCode> for ShipmentKey {
    fn from(value: &ShipmentCode) -> Self {
        Self::ByCode(value.as_str().to_string())
    }
}

/// Shipment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipmentStatus {
    Pending,
    Shipped,
    Received,
}

/// Everything that can happen to a shipment, for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipmentAction {
    EditItems,
    MarkShipped,
    Complete,
    UndoComplete,
    Receive,
    UndoReceive,
    Delete,
}

/// The single (status, action) → status table.
///
/// Every guard in the order aggregate goes through here, so an illegal pair
/// is rejected in one place with one message shape.
pub fn transition(status: ShipmentStatus, action: ShipmentAction) -> DomainResult<ShipmentStatus> {
    use ShipmentAction as A;
    use ShipmentStatus as S;

    match (status, action) {
        (S::Pending | S::Shipped, A::EditItems) => Ok(status),
        (S::Pending, A::MarkShipped) => Ok(S::Shipped),
        (S::Shipped, A::Complete | A::UndoComplete) => Ok(S::Shipped),
        (S::Shipped, A::Receive) => Ok(S::Received),
        (S::Received, A::UndoReceive) => Ok(S::Shipped),
        (S::Pending | S::Shipped, A::Delete) => Ok(status),
        (status, action) => Err(DomainError::invariant(format!(
            "{action:?} is not allowed while shipment is {status:?}"
        ))),
    }
}

/// One item inside a shipment: a snapshot copy of an order item,
/// independently quantitied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentItem {
    pub item_id: ItemId,
    pub product_id: Option<ProductId>,
    pub name: String,
    pub quantity: i64,
    pub quantity_per_ctn: i64,
    pub price_rmb: Decimal,
    pub per_ctn_weight: Decimal,
}

impl ShipmentItem {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("item name cannot be empty"));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation("item quantity must be positive"));
        }
        Ok(())
    }
}

/// Shipment entity, owned by an import order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: ShipmentId,
    pub code: ShipmentCode,
    pub status: ShipmentStatus,
    /// Only meaningful while `status == Shipped`.
    pub is_completed: bool,
    pub shipment_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    pub items: Vec<ShipmentItem>,
    /// Costed lines frozen at receive time; drives an exact undo.
    pub receipt_lines: Vec<ReceiptLine>,
}

impl Shipment {
    pub fn pending(shipment_id: ShipmentId, code: ShipmentCode) -> Self {
        Self {
            shipment_id,
            code,
            status: ShipmentStatus::Pending,
            is_completed: false,
            shipment_date: None,
            received_date: None,
            items: Vec::new(),
            receipt_lines: Vec::new(),
        }
    }

    pub fn shipped(shipment_id: ShipmentId, code: ShipmentCode, shipment_date: DateTime<Utc>) -> Self {
        Self {
            status: ShipmentStatus::Shipped,
            shipment_date: Some(shipment_date),
            ..Self::pending(shipment_id, code)
        }
    }

    pub fn matches_key(&self, key: &ShipmentKey) -> bool {
        match key {
            ShipmentKey::ById(id) => self.shipment_id == *id,
            ShipmentKey::ByCode(code) => self.code.as_str() == code,
        }
    }

    pub fn item(&self, item_id: ItemId) -> Option<&ShipmentItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    /// Shipped on the same calendar day, still open for more items.
    pub fn accepts_same_day_items(&self, date: NaiveDate) -> bool {
        self.status == ShipmentStatus::Shipped
            && !self.is_completed
            && self.shipment_date.map(|d| d.date_naive()) == Some(date)
    }
}

impl Entity for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.shipment_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_parse() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let code = ShipmentCode::from_parts(date, 7);
        assert_eq!(code.as_str(), "SHP-20240315-007");
        assert_eq!(ShipmentCode::parse(code.as_str()).unwrap(), code);
    }

    #[test]
    fn parse_rejects_malformed_codes() {
        for bad in ["SHP-2024031-007", "SHP-20240315-07", "XYZ-20240315-007", "SHP-20241315-007", "SHP-20240315-007-1"] {
            assert!(ShipmentCode::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn sequential_codes_never_collide_within_a_day() {
        let generator = SequentialShipmentCodes::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generator.next_code(date)));
        }
        assert_eq!(
            generator.next_code(NaiveDate::from_ymd_opt(2024, 3, 16).unwrap()).as_str(),
            "SHP-20240316-001"
        );
    }

    #[test]
    fn key_parse_classifies_uuid_vs_code() {
        let id = ShipmentId::new(AggregateId::new());
        match ShipmentKey::parse(&id.to_string()) {
            ShipmentKey::ById(parsed) => assert_eq!(parsed, id),
            other => panic!("expected ById, got {other:?}"),
        }
        match ShipmentKey::parse("SHP-20240315-001") {
            ShipmentKey::ByCode(code) => assert_eq!(code, "SHP-20240315-001"),
            other => panic!("expected ByCode, got {other:?}"),
        }
    }

    #[test]
    fn transition_table_rejects_illegal_pairs() {
        use ShipmentAction as A;
        use ShipmentStatus as S;

        assert_eq!(transition(S::Pending, A::MarkShipped).unwrap(), S::Shipped);
        assert_eq!(transition(S::Shipped, A::Receive).unwrap(), S::Received);
        assert_eq!(transition(S::Received, A::UndoReceive).unwrap(), S::Shipped);

        assert!(transition(S::Received, A::EditItems).is_err());
        assert!(transition(S::Received, A::Delete).is_err());
        assert!(transition(S::Received, A::Receive).is_err());
        assert!(transition(S::Pending, A::Receive).is_err());
        assert!(transition(S::Pending, A::Complete).is_err());
        assert!(transition(S::Shipped, A::MarkShipped).is_err());
    }
}
