use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_item::Entity as InventoryItem,
        purchase_order::{self, ApprovalStatus, Entity as PurchaseOrder, FulfillmentStatus},
        purchase_order_item::{self, Entity as PurchaseOrderItem},
        stock_movement::{MovementType, ReferenceType},
        warehouse::Entity as Warehouse,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        document_number,
        inventory::{apply_movement, InventoryService, NewMovement},
    },
};

#[derive(Debug, Clone)]
pub struct NewPurchaseOrderLine {
    pub item_id: Uuid,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewPurchaseOrder {
    pub vendor_id: Uuid,
    pub warehouse_id: Uuid,
    pub lines: Vec<NewPurchaseOrderLine>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ReceiptLine {
    pub item_id: Uuid,
    pub quantity: i32,
}

/// Purchase order approval and receiving.
///
/// Approval is a one-shot gate: a pending order is approved or rejected
/// exactly once, and only approved orders can receive stock. Receiving is
/// incremental; each delivery posts `in` movements through the stock ledger
/// and rolls the fulfillment status forward.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    event_sender: EventSender,
}

impl PurchaseOrderService {
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

    #[instrument(skip(self, new), fields(vendor_id = %new.vendor_id, warehouse_id = %new.warehouse_id))]
    pub async fn create_purchase_order(
        &self,
        new: NewPurchaseOrder,
    ) -> Result<(purchase_order::Model, Vec<purchase_order_item::Model>), ServiceError> {
        if new.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "a purchase order requires at least one line".to_string(),
            ));
        }
        for line in &new.lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "ordered quantity must be positive".to_string(),
                ));
            }
            if line.unit_cost < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "unit cost must not be negative".to_string(),
                ));
            }
        }

        let result = self
            .db
            .transaction::<_, (purchase_order::Model, Vec<purchase_order_item::Model>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let warehouse = Warehouse::find_by_id(new.warehouse_id)
                            .one(txn)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "warehouse {} not found",
                                    new.warehouse_id
                                ))
                            })?;
                        if !warehouse.is_active() {
                            return Err(ServiceError::ValidationError(format!(
                                "warehouse {} is archived and cannot receive stock",
                                warehouse.code
                            )));
                        }

                        for line in &new.lines {
                            let item = InventoryItem::find_by_id(line.item_id)
                                .one(txn)
                                .await?
                                .ok_or_else(|| {
                                    ServiceError::NotFound(format!(
                                        "inventory item {} not found",
                                        line.item_id
                                    ))
                                })?;
                            if !item.is_active() {
                                return Err(ServiceError::ValidationError(format!(
                                    "inventory item {} is archived and cannot be ordered",
                                    item.sku
                                )));
                            }
                        }

                        let now = Utc::now();
                        let order = purchase_order::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            po_number: Set(document_number("PO")),
                            vendor_id: Set(new.vendor_id),
                            warehouse_id: Set(new.warehouse_id),
                            approval_status: Set(ApprovalStatus::Pending.as_str().to_string()),
                            fulfillment_status: Set(FulfillmentStatus::Open.as_str().to_string()),
                            approved_by: Set(None),
                            approved_at: Set(None),
                            rejected_by: Set(None),
                            rejected_at: Set(None),
                            rejection_reason: Set(None),
                            notes: Set(new.notes.clone()),
                            created_by: Set(new.created_by),
                            created_at: Set(now),
                            updated_at: Set(now),
                        }
                        .insert(txn)
                        .await?;

                        let mut items = Vec::with_capacity(new.lines.len());
                        for line in &new.lines {
                            let row = purchase_order_item::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                purchase_order_id: Set(order.id),
                                item_id: Set(line.item_id),
                                ordered_quantity: Set(line.quantity),
                                received_quantity: Set(0),
                                unit_cost: Set(line.unit_cost),
                                created_at: Set(now),
                                updated_at: Set(now),
                            }
                            .insert(txn)
                            .await?;
                            items.push(row);
                        }

                        Ok((order, items))
                    })
                },
            )
            .await
            .map_err(ServiceError::from)?;

        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        po_id: Uuid,
        approved_by: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let order = self
            .db
            .transaction::<_, purchase_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_po(txn, po_id).await?;
                    require_pending(&order)?;

                    let now = Utc::now();
                    let mut active: purchase_order::ActiveModel = order.into();
                    active.approval_status = Set(ApprovalStatus::Approved.as_str().to_string());
                    active.approved_by = Set(Some(approved_by));
                    active.approved_at = Set(Some(now));
                    active.updated_at = Set(now);
                    Ok(active.update(txn).await?)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::PurchaseOrderApproved {
            purchase_order_id: order.id,
            approved_by,
        });

        Ok(order)
    }

    #[instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        po_id: Uuid,
        rejected_by: Uuid,
        reason: String,
    ) -> Result<purchase_order::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "a rejection reason is required".to_string(),
            ));
        }

        let order = self
            .db
            .transaction::<_, purchase_order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let order = load_po(txn, po_id).await?;
                    require_pending(&order)?;

                    let now = Utc::now();
                    let mut active: purchase_order::ActiveModel = order.into();
                    active.approval_status = Set(ApprovalStatus::Rejected.as_str().to_string());
                    active.rejected_by = Set(Some(rejected_by));
                    active.rejected_at = Set(Some(now));
                    active.rejection_reason = Set(Some(reason));
                    active.updated_at = Set(now);
                    Ok(active.update(txn).await?)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::PurchaseOrderRejected {
            purchase_order_id: order.id,
            rejected_by,
        });

        Ok(order)
    }

    /// Books a (possibly partial) delivery: one `in` movement per line,
    /// received quantities and the fulfillment status updated in the same
    /// transaction. Receiving more than was ordered is rejected.
    #[instrument(skip(self, receipts))]
    pub async fn receive_items(
        &self,
        po_id: Uuid,
        receipts: Vec<ReceiptLine>,
        received_by: Option<Uuid>,
    ) -> Result<(purchase_order::Model, Vec<purchase_order_item::Model>), ServiceError> {
        if receipts.is_empty() {
            return Err(ServiceError::ValidationError(
                "a receipt requires at least one line".to_string(),
            ));
        }
        let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
        for receipt in &receipts {
            if receipt.quantity <= 0 {
                return Err(ServiceError::ValidationError(
                    "received quantity must be positive".to_string(),
                ));
            }
            *merged.entry(receipt.item_id).or_insert(0) += receipt.quantity;
        }

        let line_count = merged.len();

        // Pre-read only to know which level locks to take.
        let order = load_po(&*self.db, po_id).await?;
        let keys: Vec<(Uuid, Uuid)> = merged
            .keys()
            .map(|item_id| (*item_id, order.warehouse_id))
            .collect();
        let _guards = self.inventory.lock_levels(&keys).await?;

        let result = self
            .db
            .transaction::<_, (purchase_order::Model, Vec<purchase_order_item::Model>), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let order = load_po(txn, po_id).await?;
                        if order.approval() != Some(ApprovalStatus::Approved) {
                            return Err(ServiceError::PreconditionFailed(format!(
                                "purchase order {} is {}; only approved orders receive stock",
                                order.po_number, order.approval_status
                            )));
                        }

                        let lines = PurchaseOrderItem::find()
                            .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
                            .all(txn)
                            .await?;

                        let mut by_item: BTreeMap<Uuid, purchase_order_item::Model> =
                            lines.into_iter().map(|l| (l.item_id, l)).collect();

                        let now = Utc::now();
                        for (item_id, quantity) in &merged {
                            let line = by_item.remove(item_id).ok_or_else(|| {
                                ServiceError::ValidationError(format!(
                                    "item {} is not on purchase order {}",
                                    item_id, order.po_number
                                ))
                            })?;
                            if *quantity > line.remaining_quantity() {
                                return Err(ServiceError::ValidationError(format!(
                                    "receiving {} of item {} exceeds the {} outstanding on {}",
                                    quantity,
                                    item_id,
                                    line.remaining_quantity(),
                                    order.po_number
                                )));
                            }

                            apply_movement(
                                txn,
                                &NewMovement {
                                    item_id: *item_id,
                                    warehouse_id: order.warehouse_id,
                                    quantity: *quantity,
                                    movement_type: MovementType::In,
                                    reason: Some(format!(
                                        "purchase order {} receipt",
                                        order.po_number
                                    )),
                                    reference: Some((ReferenceType::PurchaseOrder, order.id)),
                                    performed_by: received_by,
                                },
                            )
                            .await?;

                            let received = line.received_quantity + quantity;
                            let mut active: purchase_order_item::ActiveModel = line.into();
                            active.received_quantity = Set(received);
                            active.updated_at = Set(now);
                            let updated = active.update(txn).await?;
                            by_item.insert(*item_id, updated);
                        }

                        let lines: Vec<purchase_order_item::Model> =
                            by_item.into_values().collect();
                        let fulfillment = derive_fulfillment(&lines);

                        let mut active: purchase_order::ActiveModel = order.into();
                        active.fulfillment_status = Set(fulfillment.as_str().to_string());
                        active.updated_at = Set(now);
                        let order = active.update(txn).await?;

                        Ok((order, lines))
                    })
                },
            )
            .await
            .map_err(ServiceError::from)?;

        info!(
            po = %result.0.po_number,
            fulfillment = %result.0.fulfillment_status,
            lines = line_count,
            "purchase order receipt booked"
        );
        self.event_sender.send_or_log(Event::PurchaseOrderReceived {
            purchase_order_id: result.0.id,
            lines: line_count,
        });

        Ok(result)
    }

    pub async fn get_purchase_order(
        &self,
        po_id: Uuid,
    ) -> Result<(purchase_order::Model, Vec<purchase_order_item::Model>), ServiceError> {
        let order = load_po(&*self.db, po_id).await?;
        let items = PurchaseOrderItem::find()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
            .order_by_asc(purchase_order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok((order, items))
    }

    pub async fn list_purchase_orders(
        &self,
        approval: Option<ApprovalStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<purchase_order::Model>, u64), ServiceError> {
        let mut query = PurchaseOrder::find().order_by_desc(purchase_order::Column::CreatedAt);
        if let Some(approval) = approval {
            query = query.filter(purchase_order::Column::ApprovalStatus.eq(approval.as_str()));
        }

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }
}

async fn load_po<C: ConnectionTrait>(
    conn: &C,
    po_id: Uuid,
) -> Result<purchase_order::Model, ServiceError> {
    PurchaseOrder::find_by_id(po_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("purchase order {} not found", po_id)))
}

fn require_pending(order: &purchase_order::Model) -> Result<(), ServiceError> {
    if order.approval() != Some(ApprovalStatus::Pending) {
        return Err(ServiceError::InvalidTransition(format!(
            "purchase order {} has already been {}; approval is final",
            order.po_number, order.approval_status
        )));
    }
    Ok(())
}

fn derive_fulfillment(lines: &[purchase_order_item::Model]) -> FulfillmentStatus {
    if !lines.is_empty() && lines.iter().all(|l| l.received_quantity >= l.ordered_quantity) {
        FulfillmentStatus::Received
    } else if lines.iter().any(|l| l.received_quantity > 0) {
        FulfillmentStatus::PartiallyReceived
    } else {
        FulfillmentStatus::Open
    }
}
