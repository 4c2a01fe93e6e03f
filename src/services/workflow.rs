use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        invoice::InvoiceStatus,
        repair_order::{self, Entity as RepairOrder, RepairStatus},
        stock_level::{self, Entity as StockLevel},
        stock_movement::{self, MovementType, ReferenceType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        inventory::{apply_movement, InventoryService, NewMovement},
        repair_orders::{self, transition_in},
    },
};

/// One part drawn from stock while finishing a repair.
#[derive(Debug, Clone)]
pub struct PartLine {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
}

/// Result of finishing a repair: the order in `completed` plus the `out`
/// movements that consumed its parts.
#[derive(Debug, Clone)]
pub struct CompletedRepair {
    pub order: repair_order::Model,
    pub movements: Vec<stock_movement::Model>,
}

/// Cross-component orchestrations that have to commit atomically:
/// finishing a repair consumes parts from the stock ledger and moves the
/// order in one transaction; delivering a device checks the invoice is
/// settled before the final transition.
#[derive(Clone)]
pub struct WorkflowService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    event_sender: EventSender,
}

impl WorkflowService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            inventory,
            event_sender,
        }
    }

    /// Moves `under_repair` → `completed`, consuming the listed parts as
    /// `out` movements and recording the actual cost. All stock is checked
    /// for sufficiency before anything is written, so a shortfall on the
    /// last part leaves no partial consumption behind.
    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    pub async fn complete_repair(
        &self,
        order_id: Uuid,
        actual_cost: Decimal,
        parts: Vec<PartLine>,
        actor: Option<Uuid>,
    ) -> Result<CompletedRepair, ServiceError> {
        if actual_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "actual cost must not be negative".to_string(),
            ));
        }

        // Duplicate part lines for the same level collapse into one draw.
        let mut merged: BTreeMap<(Uuid, Uuid), i32> = BTreeMap::new();
        for part in &parts {
            if part.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "part quantity must be positive".to_string(),
                ));
            }
            *merged
                .entry((part.item_id, part.warehouse_id))
                .or_insert(0) += part.quantity;
        }

        let keys: Vec<(Uuid, Uuid)> = merged.keys().copied().collect();
        let _guards = self.inventory.lock_levels(&keys).await?;

        let parts_consumed = merged.len();
        let result = self
            .db
            .transaction::<_, CompletedRepair, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = RepairOrder::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("repair order {} not found", order_id))
                        })?;

                    // Sufficiency check before any write.
                    for ((item_id, warehouse_id), quantity) in &merged {
                        let available = StockLevel::find()
                            .filter(stock_level::Column::ItemId.eq(*item_id))
                            .filter(stock_level::Column::WarehouseId.eq(*warehouse_id))
                            .one(txn)
                            .await?
                            .map(|l| l.quantity)
                            .unwrap_or(0);
                        if available < *quantity {
                            return Err(ServiceError::InsufficientStock(format!(
                                "insufficient stock of item {} in warehouse {}: have {}, need {}",
                                item_id, warehouse_id, available, quantity
                            )));
                        }
                    }

                    let mut movements = Vec::with_capacity(merged.len());
                    for ((item_id, warehouse_id), quantity) in &merged {
                        let posted = apply_movement(
                            txn,
                            &NewMovement {
                                item_id: *item_id,
                                warehouse_id: *warehouse_id,
                                quantity: -quantity,
                                movement_type: MovementType::Out,
                                reason: Some(format!(
                                    "parts consumed by repair order {}",
                                    order.order_number
                                )),
                                reference: Some((ReferenceType::RepairOrder, order.id)),
                                performed_by: actor,
                            },
                        )
                        .await?;
                        movements.push(posted.movement);
                    }

                    let (order, _log) = transition_in(
                        txn,
                        order,
                        RepairStatus::Completed,
                        actor,
                        None,
                    )
                    .await?;

                    let mut active: repair_order::ActiveModel = order.into();
                    active.actual_cost = Set(Some(actual_cost));
                    let order = active.update(txn).await?;

                    Ok(CompletedRepair { order, movements })
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(order = %result.order.order_number, parts_consumed, "repair completed");
        self.event_sender.send_or_log(Event::RepairCompleted {
            repair_order_id: result.order.id,
            parts_consumed,
        });

        Ok(result)
    }

    /// The final hand-over: `ready_for_delivery` → `delivered`, allowed
    /// only once the invoice is fully paid. Records who handed the device
    /// over and the customer's signature.
    #[instrument(skip(self, signature))]
    pub async fn deliver_device(
        &self,
        order_id: Uuid,
        delivered_by: Uuid,
        signature: Option<String>,
    ) -> Result<repair_order::Model, ServiceError> {
        let order = self
            .db
            .transaction::<_, repair_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = RepairOrder::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("repair order {} not found", order_id))
                        })?;

                    let invoice = repair_orders::current_invoice(txn, order.id)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::PreconditionFailed(format!(
                                "repair order {} has no invoice to settle",
                                order.order_number
                            ))
                        })?;
                    if invoice.invoice_status() != Some(InvoiceStatus::Paid) {
                        return Err(ServiceError::PreconditionFailed(format!(
                            "invoice {} is not fully paid ({} outstanding)",
                            invoice.invoice_number,
                            invoice.remaining()
                        )));
                    }

                    let now = Utc::now();
                    let (order, _log) = transition_in(
                        txn,
                        order,
                        RepairStatus::Delivered,
                        Some(delivered_by),
                        None,
                    )
                    .await?;

                    let mut active: repair_order::ActiveModel = order.into();
                    active.delivered_at = Set(Some(now));
                    active.delivered_by = Set(Some(delivered_by));
                    active.delivery_signature = Set(signature.clone());
                    Ok(active.update(txn).await?)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::DeviceDelivered {
            repair_order_id: order.id,
            delivered_by,
        });

        Ok(order)
    }
}
