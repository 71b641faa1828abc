use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shipstock_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use shipstock_events::Event;
use shipstock_products::ProductId;

use crate::costing::{applied_price, display_cost, unit_cost, CostBasis, CostingPolicy};
use crate::shipment::{
    transition, ItemId, Shipment, ShipmentAction, ShipmentAllocation, ShipmentCode, ShipmentId,
    ShipmentItem, ShipmentKey, ShipmentStatus,
};

/// Import order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportOrderId(pub AggregateId);

impl ImportOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ImportOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Supplier reference (the supplier record itself lives elsewhere).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(pub AggregateId);

impl SupplierId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SupplierId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Master planned item on the order; shipments carry snapshot copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub item_id: ItemId,
    pub product_id: Option<ProductId>,
    pub name: String,
    pub quantity_per_ctn: i64,
    pub carton_count: i64,
    pub price_rmb: Decimal,
    pub per_ctn_weight: Decimal,
}

impl OrderItem {
    pub fn total_quantity(&self) -> i64 {
        self.quantity_per_ctn * self.carton_count
    }

    pub fn total_price_rmb(&self) -> Decimal {
        self.price_rmb * Decimal::from(self.total_quantity())
    }

    pub fn cost_basis(&self) -> CostBasis {
        CostBasis {
            price_rmb: self.price_rmb,
            quantity_per_ctn: self.quantity_per_ctn,
            per_ctn_weight: self.per_ctn_weight,
        }
    }

    /// Snapshot copy carried by a shipment, quantitied independently.
    pub fn to_shipment_item(&self, quantity: i64) -> ShipmentItem {
        ShipmentItem {
            item_id: self.item_id,
            product_id: self.product_id,
            name: self.name.clone(),
            quantity,
            quantity_per_ctn: self.quantity_per_ctn,
            price_rmb: self.price_rmb,
            per_ctn_weight: self.per_ctn_weight,
        }
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("order item name cannot be empty"));
        }
        if self.quantity_per_ctn < 0 || self.carton_count < 0 {
            return Err(DomainError::validation(
                "carton size and carton count cannot be negative",
            ));
        }
        Ok(())
    }
}

/// One costed line of a received shipment.
///
/// `unit_cost` is the 2dp figure stored on the shipment; `applied_price` is
/// the integer written to the product catalog. Both rounded from the same raw
/// landed cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub item_id: ItemId,
    pub product_id: Option<ProductId>,
    pub name: String,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub applied_price: i64,
}

/// Aggregate root: ImportOrder.
///
/// Owns the master item list, the costing policy, and every shipment moving
/// goods for this order. Shipments are addressed through [`ShipmentKey`] and
/// guarded by the [`transition`] table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOrder {
    id: ImportOrderId,
    tenant_id: Option<TenantId>,
    supplier_id: Option<SupplierId>,
    items: Vec<OrderItem>,
    costs: Option<CostingPolicy>,
    shipments: Vec<Shipment>,
    version: u64,
    created: bool,
}

impl ImportOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ImportOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            supplier_id: None,
            items: Vec::new(),
            costs: None,
            shipments: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ImportOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn costs(&self) -> Option<&CostingPolicy> {
        self.costs.as_ref()
    }

    pub fn shipments(&self) -> &[Shipment] {
        &self.shipments
    }

    /// Total planned quantity across the order (basis for `Total` tax).
    pub fn order_total_quantity(&self) -> i64 {
        self.items.iter().map(OrderItem::total_quantity).sum()
    }

    /// The order's current Pending shipment, if one exists.
    pub fn pending_shipment(&self) -> Option<&Shipment> {
        self.shipments
            .iter()
            .find(|s| s.status == ShipmentStatus::Pending)
    }

    /// Resolve a shipment by tagged key (id or human code).
    pub fn resolve_shipment(&self, key: &ShipmentKey) -> Result<&Shipment, DomainError> {
        self.shipments
            .iter()
            .find(|s| s.matches_key(key))
            .ok_or(DomainError::NotFound)
    }
}

impl AggregateRoot for ImportOrder {
    type Id = ImportOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateImportOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateImportOrder {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub supplier_id: SupplierId,
    pub items: Vec<OrderItem>,
    pub costs: CostingPolicy,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpsertOrderItem (master list; keyed by item id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOrderItem {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item: OrderItem,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveOrderItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOrderItem {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CreatePendingShipment.
///
/// No-op when a Pending shipment already exists; callers read it back via
/// [`ImportOrder::pending_shipment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePendingShipment {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub allocation: ShipmentAllocation,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpsertShipmentItem (Pending/Shipped only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertShipmentItem {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub item: ShipmentItem,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteShipmentItem (Pending/Shipped only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteShipmentItem {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MoveItemToShipped.
///
/// `target` picks an explicit Shipped shipment; without it the order reuses a
/// same-day open Shipped shipment or creates one from `allocation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveItemToShipped {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item_id: ItemId,
    pub target: Option<ShipmentKey>,
    pub allocation: ShipmentAllocation,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UndoItemToPending (reverse of MoveItemToShipped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoItemToPending {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item_id: ItemId,
    pub allocation: ShipmentAllocation,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipped (bulk Pending → Shipped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipped {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteShipment {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UndoCompleteShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoCompleteShipment {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveShipment (prices goods and closes the shipment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveShipment {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UndoReceiveShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReceiveShipment {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteShipment (not allowed once Received).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteShipment {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment: ShipmentKey,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportOrderCommand {
    CreateImportOrder(CreateImportOrder),
    UpsertOrderItem(UpsertOrderItem),
    RemoveOrderItem(RemoveOrderItem),
    CreatePendingShipment(CreatePendingShipment),
    UpsertShipmentItem(UpsertShipmentItem),
    DeleteShipmentItem(DeleteShipmentItem),
    MoveItemToShipped(MoveItemToShipped),
    UndoItemToPending(UndoItemToPending),
    MarkShipped(MarkShipped),
    CompleteShipment(CompleteShipment),
    UndoCompleteShipment(UndoCompleteShipment),
    ReceiveShipment(ReceiveShipment),
    UndoReceiveShipment(UndoReceiveShipment),
    DeleteShipment(DeleteShipment),
}

/// Event: ImportOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub supplier_id: SupplierId,
    pub items: Vec<OrderItem>,
    pub costs: CostingPolicy,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderItemUpserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemUpserted {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item: OrderItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRemoved {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PendingShipmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingShipmentCreated {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub code: ShipmentCode,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShippedShipmentCreated (target of an item move, born Shipped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippedShipmentCreated {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub code: ShipmentCode,
    pub shipment_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentItemUpserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentItemUpserted {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub item: ShipmentItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentItemDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentItemDeleted {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub item_id: ItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemMovedToShipped (single-item cross-shipment move).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMovedToShipped {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item_id: ItemId,
    pub source_id: ShipmentId,
    pub target_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemMovedToPending (reverse move).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMovedToPending {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub item_id: ItemId,
    pub source_id: ShipmentId,
    pub target_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentMarkedShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentMarkedShipped {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub shipment_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCompleted {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentCompletionUndone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCompletionUndone {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentReceived.
///
/// Carries the costed lines so downstream stock application never has to
/// re-derive them; the same lines drive the exact inverse on undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentReceived {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub lines: Vec<ReceiptLine>,
    pub received_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentReceiveUndone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentReceiveUndone {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub lines: Vec<ReceiptLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDeleted {
    pub tenant_id: TenantId,
    pub order_id: ImportOrderId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportOrderEvent {
    ImportOrderCreated(ImportOrderCreated),
    OrderItemUpserted(OrderItemUpserted),
    OrderItemRemoved(OrderItemRemoved),
    PendingShipmentCreated(PendingShipmentCreated),
    ShippedShipmentCreated(ShippedShipmentCreated),
    ShipmentItemUpserted(ShipmentItemUpserted),
    ShipmentItemDeleted(ShipmentItemDeleted),
    ItemMovedToShipped(ItemMovedToShipped),
    ItemMovedToPending(ItemMovedToPending),
    ShipmentMarkedShipped(ShipmentMarkedShipped),
    ShipmentCompleted(ShipmentCompleted),
    ShipmentCompletionUndone(ShipmentCompletionUndone),
    ShipmentReceived(ShipmentReceived),
    ShipmentReceiveUndone(ShipmentReceiveUndone),
    ShipmentDeleted(ShipmentDeleted),
}

impl Event for ImportOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ImportOrderEvent::ImportOrderCreated(_) => "importing.order.created",
            ImportOrderEvent::OrderItemUpserted(_) => "importing.order.item_upserted",
            ImportOrderEvent::OrderItemRemoved(_) => "importing.order.item_removed",
            ImportOrderEvent::PendingShipmentCreated(_) => "importing.shipment.pending_created",
            ImportOrderEvent::ShippedShipmentCreated(_) => "importing.shipment.shipped_created",
            ImportOrderEvent::ShipmentItemUpserted(_) => "importing.shipment.item_upserted",
            ImportOrderEvent::ShipmentItemDeleted(_) => "importing.shipment.item_deleted",
            ImportOrderEvent::ItemMovedToShipped(_) => "importing.shipment.item_moved_to_shipped",
            ImportOrderEvent::ItemMovedToPending(_) => "importing.shipment.item_moved_to_pending",
            ImportOrderEvent::ShipmentMarkedShipped(_) => "importing.shipment.marked_shipped",
            ImportOrderEvent::ShipmentCompleted(_) => "importing.shipment.completed",
            ImportOrderEvent::ShipmentCompletionUndone(_) => "importing.shipment.completion_undone",
            ImportOrderEvent::ShipmentReceived(_) => "importing.shipment.received",
            ImportOrderEvent::ShipmentReceiveUndone(_) => "importing.shipment.receive_undone",
            ImportOrderEvent::ShipmentDeleted(_) => "importing.shipment.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ImportOrderEvent::ImportOrderCreated(e) => e.occurred_at,
            ImportOrderEvent::OrderItemUpserted(e) => e.occurred_at,
            ImportOrderEvent::OrderItemRemoved(e) => e.occurred_at,
            ImportOrderEvent::PendingShipmentCreated(e) => e.occurred_at,
            ImportOrderEvent::ShippedShipmentCreated(e) => e.occurred_at,
            ImportOrderEvent::ShipmentItemUpserted(e) => e.occurred_at,
            ImportOrderEvent::ShipmentItemDeleted(e) => e.occurred_at,
            ImportOrderEvent::ItemMovedToShipped(e) => e.occurred_at,
            ImportOrderEvent::ItemMovedToPending(e) => e.occurred_at,
            ImportOrderEvent::ShipmentMarkedShipped(e) => e.occurred_at,
            ImportOrderEvent::ShipmentCompleted(e) => e.occurred_at,
            ImportOrderEvent::ShipmentCompletionUndone(e) => e.occurred_at,
            ImportOrderEvent::ShipmentReceived(e) => e.occurred_at,
            ImportOrderEvent::ShipmentReceiveUndone(e) => e.occurred_at,
            ImportOrderEvent::ShipmentDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ImportOrder {
    type Command = ImportOrderCommand;
    type Event = ImportOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ImportOrderEvent::ImportOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.supplier_id = Some(e.supplier_id);
                self.items = e.items.clone();
                self.costs = Some(e.costs);
                self.shipments.clear();
                self.created = true;
            }
            ImportOrderEvent::OrderItemUpserted(e) => {
                match self.items.iter_mut().find(|i| i.item_id == e.item.item_id) {
                    Some(existing) => *existing = e.item.clone(),
                    None => self.items.push(e.item.clone()),
                }
            }
            ImportOrderEvent::OrderItemRemoved(e) => {
                self.items.retain(|i| i.item_id != e.item_id);
            }
            ImportOrderEvent::PendingShipmentCreated(e) => {
                self.shipments
                    .push(Shipment::pending(e.shipment_id, e.code.clone()));
            }
            ImportOrderEvent::ShippedShipmentCreated(e) => {
                self.shipments.push(Shipment::shipped(
                    e.shipment_id,
                    e.code.clone(),
                    e.shipment_date,
                ));
            }
            ImportOrderEvent::ShipmentItemUpserted(e) => {
                if let Some(shipment) = self.shipment_mut(e.shipment_id) {
                    // Replace the same goods (product link first, name string
                    // as fallback) or append as a new line.
                    let pos = e
                        .item
                        .product_id
                        .and_then(|pid| {
                            shipment.items.iter().position(|i| i.product_id == Some(pid))
                        })
                        .or_else(|| shipment.items.iter().position(|i| i.name == e.item.name));
                    match pos {
                        Some(p) => shipment.items[p] = e.item.clone(),
                        None => shipment.items.push(e.item.clone()),
                    }
                }
            }
            ImportOrderEvent::ShipmentItemDeleted(e) => {
                if let Some(shipment) = self.shipment_mut(e.shipment_id) {
                    shipment.items.retain(|i| i.item_id != e.item_id);
                }
            }
            ImportOrderEvent::ItemMovedToShipped(e) => {
                self.move_item(e.item_id, e.source_id, e.target_id);
            }
            ImportOrderEvent::ItemMovedToPending(e) => {
                self.move_item(e.item_id, e.source_id, e.target_id);
            }
            ImportOrderEvent::ShipmentMarkedShipped(e) => {
                if let Some(shipment) = self.shipment_mut(e.shipment_id) {
                    shipment.status = ShipmentStatus::Shipped;
                    shipment.shipment_date = Some(e.shipment_date);
                }
            }
            ImportOrderEvent::ShipmentCompleted(e) => {
                if let Some(shipment) = self.shipment_mut(e.shipment_id) {
                    shipment.is_completed = true;
                }
            }
            ImportOrderEvent::ShipmentCompletionUndone(e) => {
                if let Some(shipment) = self.shipment_mut(e.shipment_id) {
                    shipment.is_completed = false;
                }
            }
            ImportOrderEvent::ShipmentReceived(e) => {
                if let Some(shipment) = self.shipment_mut(e.shipment_id) {
                    shipment.status = ShipmentStatus::Received;
                    shipment.received_date = Some(e.received_date);
                    shipment.receipt_lines = e.lines.clone();
                }
            }
            ImportOrderEvent::ShipmentReceiveUndone(e) => {
                if let Some(shipment) = self.shipment_mut(e.shipment_id) {
                    shipment.status = ShipmentStatus::Shipped;
                    shipment.received_date = None;
                    shipment.receipt_lines.clear();
                }
            }
            ImportOrderEvent::ShipmentDeleted(e) => {
                self.shipments.retain(|s| s.shipment_id != e.shipment_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ImportOrderCommand::CreateImportOrder(cmd) => self.handle_create(cmd),
            ImportOrderCommand::UpsertOrderItem(cmd) => self.handle_upsert_order_item(cmd),
            ImportOrderCommand::RemoveOrderItem(cmd) => self.handle_remove_order_item(cmd),
            ImportOrderCommand::CreatePendingShipment(cmd) => self.handle_create_pending(cmd),
            ImportOrderCommand::UpsertShipmentItem(cmd) => self.handle_upsert_shipment_item(cmd),
            ImportOrderCommand::DeleteShipmentItem(cmd) => self.handle_delete_shipment_item(cmd),
            ImportOrderCommand::MoveItemToShipped(cmd) => self.handle_move_to_shipped(cmd),
            ImportOrderCommand::UndoItemToPending(cmd) => self.handle_undo_to_pending(cmd),
            ImportOrderCommand::MarkShipped(cmd) => self.handle_mark_shipped(cmd),
            ImportOrderCommand::CompleteShipment(cmd) => self.handle_complete(cmd),
            ImportOrderCommand::UndoCompleteShipment(cmd) => self.handle_undo_complete(cmd),
            ImportOrderCommand::ReceiveShipment(cmd) => self.handle_receive(cmd),
            ImportOrderCommand::UndoReceiveShipment(cmd) => self.handle_undo_receive(cmd),
            ImportOrderCommand::DeleteShipment(cmd) => self.handle_delete_shipment(cmd),
        }
    }
}

impl ImportOrder {
    fn shipment_mut(&mut self, shipment_id: ShipmentId) -> Option<&mut Shipment> {
        self.shipments
            .iter_mut()
            .find(|s| s.shipment_id == shipment_id)
    }

    fn move_item(&mut self, item_id: ItemId, source_id: ShipmentId, target_id: ShipmentId) {
        let item = self.shipment_mut(source_id).and_then(|source| {
            source
                .items
                .iter()
                .position(|i| i.item_id == item_id)
                .map(|pos| source.items.remove(pos))
        });

        if let (Some(item), Some(target)) = (item, self.shipment_mut(target_id)) {
            target.items.push(item);
        }
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: ImportOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_addressable(
        &self,
        tenant_id: TenantId,
        order_id: ImportOrderId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_order_id(order_id)
    }

    /// Master item carrying the costing context for a shipment item:
    /// product link first, name string as fallback.
    fn order_item_matching(
        &self,
        product_id: Option<ProductId>,
        name: &str,
    ) -> Option<&OrderItem> {
        product_id
            .and_then(|pid| self.items.iter().find(|i| i.product_id == Some(pid)))
            .or_else(|| self.items.iter().find(|i| i.name == name))
    }

    /// Shipment containing the given item, with the item itself.
    fn locate_item(&self, item_id: ItemId) -> Option<(&Shipment, &ShipmentItem)> {
        self.shipments.iter().find_map(|s| {
            s.item(item_id).map(|i| (s, i))
        })
    }

    fn handle_create(&self, cmd: &CreateImportOrder) -> Result<Vec<ImportOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("import order already exists"));
        }
        if cmd.costs.rmb_rate <= Decimal::ZERO {
            return Err(DomainError::validation("rmb rate must be positive"));
        }
        for item in &cmd.items {
            item.validate()?;
        }

        Ok(vec![ImportOrderEvent::ImportOrderCreated(
            ImportOrderCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                supplier_id: cmd.supplier_id,
                items: cmd.items.clone(),
                costs: cmd.costs,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_upsert_order_item(
        &self,
        cmd: &UpsertOrderItem,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;
        cmd.item.validate()?;

        Ok(vec![ImportOrderEvent::OrderItemUpserted(OrderItemUpserted {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            item: cmd.item.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_order_item(
        &self,
        cmd: &RemoveOrderItem,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        if !self.items.iter().any(|i| i.item_id == cmd.item_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![ImportOrderEvent::OrderItemRemoved(OrderItemRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_create_pending(
        &self,
        cmd: &CreatePendingShipment,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        // One Pending shipment per order; creating again is a no-op and the
        // caller reads the existing one back.
        if self.pending_shipment().is_some() {
            return Ok(vec![]);
        }

        Ok(vec![ImportOrderEvent::PendingShipmentCreated(
            PendingShipmentCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                shipment_id: cmd.allocation.shipment_id,
                code: cmd.allocation.code.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_upsert_shipment_item(
        &self,
        cmd: &UpsertShipmentItem,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::EditItems)?;
        cmd.item.validate()?;

        Ok(vec![ImportOrderEvent::ShipmentItemUpserted(
            ShipmentItemUpserted {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                shipment_id: shipment.shipment_id,
                item: cmd.item.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_delete_shipment_item(
        &self,
        cmd: &DeleteShipmentItem,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::EditItems)?;

        if shipment.item(cmd.item_id).is_none() {
            return Err(DomainError::not_found());
        }

        Ok(vec![ImportOrderEvent::ShipmentItemDeleted(
            ShipmentItemDeleted {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                shipment_id: shipment.shipment_id,
                item_id: cmd.item_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_move_to_shipped(
        &self,
        cmd: &MoveItemToShipped,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let (source, _) = self.locate_item(cmd.item_id).ok_or(DomainError::NotFound)?;
        if source.status != ShipmentStatus::Pending {
            return Err(DomainError::invariant(
                "items can only be moved out of a pending shipment",
            ));
        }

        let mut events = Vec::new();
        let target_id = match &cmd.target {
            Some(key) => {
                let target = self.resolve_shipment(key)?;
                if target.status != ShipmentStatus::Shipped {
                    return Err(DomainError::invariant(
                        "move target must be a shipped shipment",
                    ));
                }
                if target.is_completed {
                    return Err(DomainError::invariant("move target is already completed"));
                }
                target.shipment_id
            }
            None => {
                let same_day = self
                    .shipments
                    .iter()
                    .find(|s| s.accepts_same_day_items(cmd.occurred_at.date_naive()));
                match same_day {
                    Some(target) => target.shipment_id,
                    None => {
                        events.push(ImportOrderEvent::ShippedShipmentCreated(
                            ShippedShipmentCreated {
                                tenant_id: cmd.tenant_id,
                                order_id: cmd.order_id,
                                shipment_id: cmd.allocation.shipment_id,
                                code: cmd.allocation.code.clone(),
                                shipment_date: cmd.occurred_at,
                                occurred_at: cmd.occurred_at,
                            },
                        ));
                        cmd.allocation.shipment_id
                    }
                }
            }
        };

        events.push(ImportOrderEvent::ItemMovedToShipped(ItemMovedToShipped {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            source_id: source.shipment_id,
            target_id,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_undo_to_pending(
        &self,
        cmd: &UndoItemToPending,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let (source, _) = self.locate_item(cmd.item_id).ok_or(DomainError::NotFound)?;
        if source.status != ShipmentStatus::Shipped {
            return Err(DomainError::invariant(
                "items can only be undone from a shipped shipment",
            ));
        }
        if source.is_completed {
            return Err(DomainError::invariant(
                "cannot move items out of a completed shipment",
            ));
        }

        let mut events = Vec::new();
        let target_id = match self.pending_shipment() {
            Some(pending) => pending.shipment_id,
            None => {
                events.push(ImportOrderEvent::PendingShipmentCreated(
                    PendingShipmentCreated {
                        tenant_id: cmd.tenant_id,
                        order_id: cmd.order_id,
                        shipment_id: cmd.allocation.shipment_id,
                        code: cmd.allocation.code.clone(),
                        occurred_at: cmd.occurred_at,
                    },
                ));
                cmd.allocation.shipment_id
            }
        };

        events.push(ImportOrderEvent::ItemMovedToPending(ItemMovedToPending {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            source_id: source.shipment_id,
            target_id,
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_mark_shipped(&self, cmd: &MarkShipped) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::MarkShipped)?;

        if shipment.items.is_empty() {
            return Err(DomainError::invariant(
                "cannot mark an empty shipment as shipped",
            ));
        }

        Ok(vec![ImportOrderEvent::ShipmentMarkedShipped(
            ShipmentMarkedShipped {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                shipment_id: shipment.shipment_id,
                shipment_date: cmd.occurred_at,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_complete(&self, cmd: &CompleteShipment) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::Complete)?;

        if shipment.is_completed {
            return Err(DomainError::conflict("shipment is already completed"));
        }

        Ok(vec![ImportOrderEvent::ShipmentCompleted(ShipmentCompleted {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            shipment_id: shipment.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_undo_complete(
        &self,
        cmd: &UndoCompleteShipment,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::UndoComplete)?;

        if !shipment.is_completed {
            return Err(DomainError::conflict("shipment is not completed"));
        }

        Ok(vec![ImportOrderEvent::ShipmentCompletionUndone(
            ShipmentCompletionUndone {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                shipment_id: shipment.shipment_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_receive(&self, cmd: &ReceiveShipment) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::Receive)?;

        let costs = self
            .costs
            .as_ref()
            .ok_or_else(|| DomainError::invariant("import order has no costing policy"))?;
        let order_total = self.order_total_quantity();

        let mut lines = Vec::with_capacity(shipment.items.len());
        for item in &shipment.items {
            // Costing context comes from the master order item where one
            // matches; a detached shipment item prices from its own snapshot.
            let basis = self
                .order_item_matching(item.product_id, &item.name)
                .map(OrderItem::cost_basis)
                .unwrap_or(CostBasis {
                    price_rmb: item.price_rmb,
                    quantity_per_ctn: item.quantity_per_ctn,
                    per_ctn_weight: item.per_ctn_weight,
                });

            let cost = unit_cost(&basis, costs, order_total);
            let applied = applied_price(cost).ok_or_else(|| {
                DomainError::validation(format!("landed cost out of range for '{}'", item.name))
            })?;

            lines.push(ReceiptLine {
                item_id: item.item_id,
                product_id: item.product_id,
                name: item.name.clone(),
                quantity: item.quantity,
                unit_cost: display_cost(cost),
                applied_price: applied,
            });
        }

        Ok(vec![ImportOrderEvent::ShipmentReceived(ShipmentReceived {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            shipment_id: shipment.shipment_id,
            lines,
            received_date: cmd.occurred_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_undo_receive(
        &self,
        cmd: &UndoReceiveShipment,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::UndoReceive)?;

        // Replay the lines frozen at receive time so the stock-side inverse
        // is exact even if the master items changed since.
        Ok(vec![ImportOrderEvent::ShipmentReceiveUndone(
            ShipmentReceiveUndone {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                shipment_id: shipment.shipment_id,
                lines: shipment.receipt_lines.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_delete_shipment(
        &self,
        cmd: &DeleteShipment,
    ) -> Result<Vec<ImportOrderEvent>, DomainError> {
        self.ensure_addressable(cmd.tenant_id, cmd.order_id)?;

        let shipment = self.resolve_shipment(&cmd.shipment)?;
        transition(shipment.status, ShipmentAction::Delete)?;

        Ok(vec![ImportOrderEvent::ShipmentDeleted(ShipmentDeleted {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            shipment_id: shipment.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costing::TaxRule;
    use crate::shipment::{SequentialShipmentCodes, ShipmentCodeGenerator};
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        s.parse().expect("decimal literal")
    }

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_order_id() -> ImportOrderId {
        ImportOrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
    }

    fn test_policy() -> CostingPolicy {
        CostingPolicy {
            rmb_rate: dec("17.5"),
            tax: TaxRule::PerItem(dec("5")),
            labour_bill_per_ctn: dec("100"),
        }
    }

    fn test_order_item(name: &str, product_id: Option<ProductId>) -> OrderItem {
        OrderItem {
            item_id: ItemId::new(AggregateId::new()),
            product_id,
            name: name.to_string(),
            quantity_per_ctn: 50,
            carton_count: 4,
            price_rmb: dec("10"),
            per_ctn_weight: dec("25"),
        }
    }

    fn allocation() -> ShipmentAllocation {
        ShipmentAllocation::next(&SequentialShipmentCodes::new(), test_time().date_naive())
    }

    fn drive(order: &mut ImportOrder, cmd: ImportOrderCommand) -> Vec<ImportOrderEvent> {
        let events = order.handle(&cmd).expect("command should succeed");
        for event in &events {
            order.apply(event);
        }
        events
    }

    /// Created order with one master item and a Pending shipment holding one
    /// snapshot item (qty 100).
    fn seeded_order() -> (ImportOrder, TenantId, ImportOrderId, ProductId, ShipmentId) {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let product_id = ProductId::new(AggregateId::new());
        let mut order = ImportOrder::empty(order_id);

        let master = test_order_item("Steel Bolt", Some(product_id));
        drive(
            &mut order,
            ImportOrderCommand::CreateImportOrder(CreateImportOrder {
                tenant_id,
                order_id,
                supplier_id: SupplierId::new(AggregateId::new()),
                items: vec![master.clone()],
                costs: test_policy(),
                occurred_at: test_time(),
            }),
        );

        drive(
            &mut order,
            ImportOrderCommand::CreatePendingShipment(CreatePendingShipment {
                tenant_id,
                order_id,
                allocation: allocation(),
                occurred_at: test_time(),
            }),
        );
        let shipment_id = order.pending_shipment().unwrap().shipment_id;

        drive(
            &mut order,
            ImportOrderCommand::UpsertShipmentItem(UpsertShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item: master.to_shipment_item(100),
                occurred_at: test_time(),
            }),
        );

        (order, tenant_id, order_id, product_id, shipment_id)
    }

    fn ship_and_receive(
        order: &mut ImportOrder,
        tenant_id: TenantId,
        order_id: ImportOrderId,
        shipment_id: ShipmentId,
    ) {
        drive(
            order,
            ImportOrderCommand::MarkShipped(MarkShipped {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );
        drive(
            order,
            ImportOrderCommand::ReceiveShipment(ReceiveShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );
    }

    #[test]
    fn create_import_order_emits_created_event() {
        let tenant_id = test_tenant_id();
        let order_id = test_order_id();
        let order = ImportOrder::empty(order_id);

        let cmd = CreateImportOrder {
            tenant_id,
            order_id,
            supplier_id: SupplierId::new(AggregateId::new()),
            items: vec![test_order_item("Steel Bolt", None)],
            costs: test_policy(),
            occurred_at: test_time(),
        };

        let events = order
            .handle(&ImportOrderCommand::CreateImportOrder(cmd))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ImportOrderEvent::ImportOrderCreated(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.order_id, order_id);
                assert_eq!(e.items.len(), 1);
            }
            _ => panic!("Expected ImportOrderCreated event"),
        }
    }

    #[test]
    fn create_pending_shipment_is_noop_when_one_exists() {
        let (mut order, tenant_id, order_id, _, _) = seeded_order();

        let events = order
            .handle(&ImportOrderCommand::CreatePendingShipment(
                CreatePendingShipment {
                    tenant_id,
                    order_id,
                    allocation: allocation(),
                    occurred_at: test_time(),
                },
            ))
            .unwrap();

        assert!(events.is_empty());
        drive(&mut order, ImportOrderCommand::CreatePendingShipment(CreatePendingShipment {
            tenant_id,
            order_id,
            allocation: allocation(),
            occurred_at: test_time(),
        }));
        assert_eq!(
            order
                .shipments()
                .iter()
                .filter(|s| s.status == ShipmentStatus::Pending)
                .count(),
            1
        );
    }

    #[test]
    fn upsert_replaces_matching_goods_and_appends_new_ones() {
        let (mut order, tenant_id, order_id, product_id, shipment_id) = seeded_order();

        // Same product: replaces the existing line.
        let replacement = ShipmentItem {
            item_id: ItemId::new(AggregateId::new()),
            product_id: Some(product_id),
            name: "Steel Bolt".to_string(),
            quantity: 40,
            quantity_per_ctn: 50,
            price_rmb: dec("11"),
            per_ctn_weight: dec("25"),
        };
        drive(
            &mut order,
            ImportOrderCommand::UpsertShipmentItem(UpsertShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item: replacement,
                occurred_at: test_time(),
            }),
        );
        let shipment = order.resolve_shipment(&ShipmentKey::ById(shipment_id)).unwrap();
        assert_eq!(shipment.items.len(), 1);
        assert_eq!(shipment.items[0].quantity, 40);

        // Unlinked item with a new name: appended.
        let extra = ShipmentItem {
            item_id: ItemId::new(AggregateId::new()),
            product_id: None,
            name: "Brass Nut".to_string(),
            quantity: 10,
            quantity_per_ctn: 20,
            price_rmb: dec("2"),
            per_ctn_weight: dec("8"),
        };
        drive(
            &mut order,
            ImportOrderCommand::UpsertShipmentItem(UpsertShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item: extra,
                occurred_at: test_time(),
            }),
        );
        let shipment = order.resolve_shipment(&ShipmentKey::ById(shipment_id)).unwrap();
        assert_eq!(shipment.items.len(), 2);
    }

    #[test]
    fn editing_received_shipment_fails_and_leaves_items_unchanged() {
        let (mut order, tenant_id, order_id, product_id, shipment_id) = seeded_order();
        ship_and_receive(&mut order, tenant_id, order_id, shipment_id);

        let before = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items
            .clone();
        let item_id = before[0].item_id;

        let err = order
            .handle(&ImportOrderCommand::UpsertShipmentItem(UpsertShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item: ShipmentItem {
                    item_id: ItemId::new(AggregateId::new()),
                    product_id: Some(product_id),
                    name: "Steel Bolt".to_string(),
                    quantity: 1,
                    quantity_per_ctn: 50,
                    price_rmb: dec("10"),
                    per_ctn_weight: dec("25"),
                },
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let err = order
            .handle(&ImportOrderCommand::DeleteShipmentItem(DeleteShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let after = &order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items;
        assert_eq!(&before, after);
    }

    #[test]
    fn mark_shipped_rejects_empty_shipment() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();
        let item_id = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items[0]
            .item_id;
        drive(
            &mut order,
            ImportOrderCommand::DeleteShipmentItem(DeleteShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item_id,
                occurred_at: test_time(),
            }),
        );

        let err = order
            .handle(&ImportOrderCommand::MarkShipped(MarkShipped {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(
            order
                .resolve_shipment(&ShipmentKey::ById(shipment_id))
                .unwrap()
                .status,
            ShipmentStatus::Pending
        );
    }

    #[test]
    fn mark_shipped_sets_shipment_date() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();

        drive(
            &mut order,
            ImportOrderCommand::MarkShipped(MarkShipped {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );

        let shipment = order.resolve_shipment(&ShipmentKey::ById(shipment_id)).unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Shipped);
        assert_eq!(shipment.shipment_date, Some(test_time()));
    }

    #[test]
    fn move_item_creates_same_day_shipped_shipment_when_absent() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();
        let item_id = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items[0]
            .item_id;

        let alloc = allocation();
        let events = drive(
            &mut order,
            ImportOrderCommand::MoveItemToShipped(MoveItemToShipped {
                tenant_id,
                order_id,
                item_id,
                target: None,
                allocation: alloc.clone(),
                occurred_at: test_time(),
            }),
        );

        assert!(matches!(events[0], ImportOrderEvent::ShippedShipmentCreated(_)));
        assert!(matches!(events[1], ImportOrderEvent::ItemMovedToShipped(_)));

        let target = order
            .resolve_shipment(&ShipmentKey::ById(alloc.shipment_id))
            .unwrap();
        assert_eq!(target.status, ShipmentStatus::Shipped);
        assert_eq!(target.items.len(), 1);
        assert!(order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items
            .is_empty());
    }

    #[test]
    fn move_item_reuses_same_day_open_shipment() {
        let (mut order, tenant_id, order_id, product_id, shipment_id) = seeded_order();

        // Second pending item so the source stays non-empty for the first move.
        let second = ShipmentItem {
            item_id: ItemId::new(AggregateId::new()),
            product_id: None,
            name: "Brass Nut".to_string(),
            quantity: 10,
            quantity_per_ctn: 20,
            price_rmb: dec("2"),
            per_ctn_weight: dec("8"),
        };
        drive(
            &mut order,
            ImportOrderCommand::UpsertShipmentItem(UpsertShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item: second.clone(),
                occurred_at: test_time(),
            }),
        );

        let first_item = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items
            .iter()
            .find(|i| i.product_id == Some(product_id))
            .unwrap()
            .item_id;

        let first_alloc = allocation();
        drive(
            &mut order,
            ImportOrderCommand::MoveItemToShipped(MoveItemToShipped {
                tenant_id,
                order_id,
                item_id: first_item,
                target: None,
                allocation: first_alloc.clone(),
                occurred_at: test_time(),
            }),
        );

        // Second move the same day must land in the shipment just created.
        let events = drive(
            &mut order,
            ImportOrderCommand::MoveItemToShipped(MoveItemToShipped {
                tenant_id,
                order_id,
                item_id: second.item_id,
                target: None,
                allocation: allocation(),
                occurred_at: test_time(),
            }),
        );
        assert_eq!(events.len(), 1);

        let target = order
            .resolve_shipment(&ShipmentKey::ById(first_alloc.shipment_id))
            .unwrap();
        assert_eq!(target.items.len(), 2);
    }

    #[test]
    fn move_item_to_completed_target_fails() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();
        let item_id = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items[0]
            .item_id;

        let alloc = allocation();
        drive(
            &mut order,
            ImportOrderCommand::MoveItemToShipped(MoveItemToShipped {
                tenant_id,
                order_id,
                item_id,
                target: None,
                allocation: alloc.clone(),
                occurred_at: test_time(),
            }),
        );
        drive(
            &mut order,
            ImportOrderCommand::CompleteShipment(CompleteShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(alloc.shipment_id),
                occurred_at: test_time(),
            }),
        );

        // Bring the item back is forbidden (source completed), and so is
        // pushing another item at the completed target explicitly.
        let err = order
            .handle(&ImportOrderCommand::UndoItemToPending(UndoItemToPending {
                tenant_id,
                order_id,
                item_id,
                allocation: allocation(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let another = ShipmentItem {
            item_id: ItemId::new(AggregateId::new()),
            product_id: None,
            name: "Brass Nut".to_string(),
            quantity: 10,
            quantity_per_ctn: 20,
            price_rmb: dec("2"),
            per_ctn_weight: dec("8"),
        };
        drive(
            &mut order,
            ImportOrderCommand::UpsertShipmentItem(UpsertShipmentItem {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                item: another.clone(),
                occurred_at: test_time(),
            }),
        );
        let err = order
            .handle(&ImportOrderCommand::MoveItemToShipped(MoveItemToShipped {
                tenant_id,
                order_id,
                item_id: another.item_id,
                target: Some(ShipmentKey::ById(alloc.shipment_id)),
                allocation: allocation(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn move_then_undo_restores_item_fields() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();
        let original = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .items[0]
            .clone();

        drive(
            &mut order,
            ImportOrderCommand::MoveItemToShipped(MoveItemToShipped {
                tenant_id,
                order_id,
                item_id: original.item_id,
                target: None,
                allocation: allocation(),
                occurred_at: test_time(),
            }),
        );
        drive(
            &mut order,
            ImportOrderCommand::UndoItemToPending(UndoItemToPending {
                tenant_id,
                order_id,
                item_id: original.item_id,
                allocation: allocation(),
                occurred_at: test_time(),
            }),
        );

        let restored = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .item(original.item_id)
            .unwrap();
        assert_eq!(restored, &original);
    }

    #[test]
    fn receive_computes_costed_lines() {
        let (mut order, tenant_id, order_id, product_id, shipment_id) = seeded_order();

        drive(
            &mut order,
            ImportOrderCommand::MarkShipped(MarkShipped {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );

        let events = drive(
            &mut order,
            ImportOrderCommand::ReceiveShipment(ReceiveShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );

        match &events[0] {
            ImportOrderEvent::ShipmentReceived(e) => {
                assert_eq!(e.lines.len(), 1);
                let line = &e.lines[0];
                assert_eq!(line.product_id, Some(product_id));
                assert_eq!(line.quantity, 100);
                // 10 * 17.5 + 5 + 100/50 = 182
                assert_eq!(line.unit_cost, dec("182.00"));
                assert_eq!(line.applied_price, 182);
            }
            _ => panic!("Expected ShipmentReceived event"),
        }

        let shipment = order.resolve_shipment(&ShipmentKey::ById(shipment_id)).unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Received);
        assert_eq!(shipment.received_date, Some(test_time()));
    }

    #[test]
    fn receive_twice_fails() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();
        ship_and_receive(&mut order, tenant_id, order_id, shipment_id);

        let err = order
            .handle(&ImportOrderCommand::ReceiveShipment(ReceiveShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn undo_receive_replays_the_received_lines() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();
        ship_and_receive(&mut order, tenant_id, order_id, shipment_id);

        let received_lines = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .receipt_lines
            .clone();

        let events = drive(
            &mut order,
            ImportOrderCommand::UndoReceiveShipment(UndoReceiveShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );

        match &events[0] {
            ImportOrderEvent::ShipmentReceiveUndone(e) => {
                assert_eq!(e.lines, received_lines);
            }
            _ => panic!("Expected ShipmentReceiveUndone event"),
        }

        let shipment = order.resolve_shipment(&ShipmentKey::ById(shipment_id)).unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Shipped);
        assert!(shipment.receipt_lines.is_empty());
        assert_eq!(shipment.received_date, None);
    }

    #[test]
    fn shipment_resolves_by_id_and_by_code() {
        let (order, _, _, _, shipment_id) = seeded_order();
        let code = order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .code
            .clone();

        let by_code = order
            .resolve_shipment(&ShipmentKey::parse(code.as_str()))
            .unwrap();
        let by_id = order
            .resolve_shipment(&ShipmentKey::parse(&shipment_id.to_string()))
            .unwrap();
        assert_eq!(by_code.shipment_id, by_id.shipment_id);

        assert_eq!(
            order.resolve_shipment(&ShipmentKey::ByCode("SHP-19990101-001".to_string())),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn delete_shipment_rejected_once_received() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();
        ship_and_receive(&mut order, tenant_id, order_id, shipment_id);

        let err = order
            .handle(&ImportOrderCommand::DeleteShipment(DeleteShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        drive(
            &mut order,
            ImportOrderCommand::UndoReceiveShipment(UndoReceiveShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );
        drive(
            &mut order,
            ImportOrderCommand::DeleteShipment(DeleteShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );
        assert!(order.shipments().is_empty());
    }

    #[test]
    fn complete_requires_shipped_status() {
        let (mut order, tenant_id, order_id, _, shipment_id) = seeded_order();

        let err = order
            .handle(&ImportOrderCommand::CompleteShipment(CompleteShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        drive(
            &mut order,
            ImportOrderCommand::MarkShipped(MarkShipped {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );
        drive(
            &mut order,
            ImportOrderCommand::CompleteShipment(CompleteShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );
        assert!(order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .is_completed);

        drive(
            &mut order,
            ImportOrderCommand::UndoCompleteShipment(UndoCompleteShipment {
                tenant_id,
                order_id,
                shipment: ShipmentKey::ById(shipment_id),
                occurred_at: test_time(),
            }),
        );
        assert!(!order
            .resolve_shipment(&ShipmentKey::ById(shipment_id))
            .unwrap()
            .is_completed);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: handle is deterministic and never mutates state.
            #[test]
            fn handle_is_pure(qty in 1i64..10_000, price in 1i64..10_000) {
                let (mut order, tenant_id, order_id, product_id, shipment_id) = seeded_order();
                drive(&mut order, ImportOrderCommand::UpsertShipmentItem(UpsertShipmentItem {
                    tenant_id,
                    order_id,
                    shipment: ShipmentKey::ById(shipment_id),
                    item: ShipmentItem {
                        item_id: ItemId::new(AggregateId::new()),
                        product_id: Some(product_id),
                        name: "Steel Bolt".to_string(),
                        quantity: qty,
                        quantity_per_ctn: 50,
                        price_rmb: Decimal::from(price),
                        per_ctn_weight: Decimal::from(25),
                    },
                    occurred_at: test_time(),
                }));
                drive(&mut order, ImportOrderCommand::MarkShipped(MarkShipped {
                    tenant_id,
                    order_id,
                    shipment: ShipmentKey::ById(shipment_id),
                    occurred_at: test_time(),
                }));

                let state_before = order.clone();
                let cmd = ImportOrderCommand::ReceiveShipment(ReceiveShipment {
                    tenant_id,
                    order_id,
                    shipment: ShipmentKey::ById(shipment_id),
                    occurred_at: test_time(),
                });
                let first = order.handle(&cmd).unwrap();
                let second = order.handle(&cmd).unwrap();
                prop_assert_eq!(first, second);
                prop_assert_eq!(state_before, order);
            }
        }
    }
}
