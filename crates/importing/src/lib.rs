//! Import order module (shipment lifecycle, event-sourced).
//!
//! An import order owns its shipments; shipments move Pending → Shipped →
//! Received, and receiving prices the goods via the landed-cost calculator.
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod costing;
pub mod order;
pub mod shipment;

pub use costing::{applied_price, display_cost, unit_cost, CostBasis, CostingPolicy, TaxRule};
pub use order::{
    CompleteShipment, CreateImportOrder, CreatePendingShipment, DeleteShipment,
    DeleteShipmentItem, ImportOrder, ImportOrderCommand, ImportOrderCreated, ImportOrderEvent,
    ImportOrderId, ItemMovedToPending, ItemMovedToShipped, MarkShipped, MoveItemToShipped,
    OrderItem, OrderItemRemoved, OrderItemUpserted, PendingShipmentCreated, ReceiptLine,
    ReceiveShipment, RemoveOrderItem, ShipmentCompleted, ShipmentCompletionUndone,
    ShipmentDeleted, ShipmentItemDeleted, ShipmentItemUpserted, ShipmentMarkedShipped,
    ShipmentReceiveUndone, ShipmentReceived, ShippedShipmentCreated, SupplierId,
    UndoCompleteShipment, UndoItemToPending, UndoReceiveShipment, UpsertOrderItem,
    UpsertShipmentItem,
};
pub use shipment::{
    transition, ItemId, SequentialShipmentCodes, Shipment, ShipmentAction, ShipmentAllocation,
    ShipmentCode, ShipmentCodeGenerator, ShipmentId, ShipmentItem, ShipmentKey, ShipmentStatus,
};
