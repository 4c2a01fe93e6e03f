use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_item::{self, Entity as InventoryItem},
        stock_count::{self, Entity as StockCount, StockCountStatus},
        stock_count_item::{self, Entity as StockCountItem},
        stock_level::{self, Entity as StockLevel},
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
pub struct NewStockCount {
    pub warehouse_id: Uuid,
    pub count_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CountEntry {
    pub item_id: Uuid,
    pub counted_quantity: i32,
    pub counted_by: Option<Uuid>,
    pub notes: Option<String>,
}

/// Stock-count reconciliation.
///
/// A count freezes a per-item `system_quantity` snapshot when the item is
/// first recorded; completion turns each nonzero variance into an
/// `adjustment` movement through the stock ledger, all in one transaction.
/// If stock moved between snapshot and completion, completion aborts rather
/// than adjust against stale numbers.
#[derive(Clone)]
pub struct StockCountService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    event_sender: EventSender,
}

impl StockCountService {
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

    #[instrument(skip(self, new), fields(warehouse_id = %new.warehouse_id))]
    pub async fn create_count(
        &self,
        new: NewStockCount,
    ) -> Result<stock_count::Model, ServiceError> {
        let warehouse = Warehouse::find_by_id(new.warehouse_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("warehouse {} not found", new.warehouse_id))
            })?;
        if !warehouse.is_active() {
            return Err(ServiceError::ValidationError(format!(
                "warehouse {} is archived and cannot be counted",
                warehouse.code
            )));
        }

        let now = Utc::now();
        let count = stock_count::ActiveModel {
            id: Set(Uuid::new_v4()),
            count_number: Set(document_number("SC")),
            warehouse_id: Set(new.warehouse_id),
            status: Set(StockCountStatus::Scheduled.as_str().to_string()),
            count_date: Set(new.count_date),
            started_at: Set(None),
            reviewed_by: Set(None),
            approved_by: Set(None),
            adjusted_by: Set(None),
            completed_at: Set(None),
            notes: Set(new.notes),
            total_items: Set(0),
            discrepancies: Set(0),
            total_value_difference: Set(Decimal::ZERO),
            created_by: Set(new.created_by),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        Ok(count)
    }

    /// Records (or re-records) one item's physical count. The first entry
    /// for an item snapshots `system_quantity` from the live level;
    /// re-entries update only the counted side, against the frozen
    /// snapshot. Header aggregates are recomputed in the same transaction.
    #[instrument(skip(self, entry), fields(item_id = %entry.item_id, counted = entry.counted_quantity))]
    pub async fn record_count_item(
        &self,
        count_id: Uuid,
        entry: CountEntry,
    ) -> Result<(stock_count::Model, stock_count_item::Model), ServiceError> {
        if entry.counted_quantity < 0 {
            return Err(ServiceError::ValidationError(
                "counted quantity must not be negative".to_string(),
            ));
        }

        let result = self
            .db
            .transaction::<_, (stock_count::Model, stock_count_item::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let count = load_count(txn, count_id).await?;
                        let status = count_status_of(&count)?;
                        if !status.accepts_items() {
                            return Err(ServiceError::PreconditionFailed(format!(
                                "stock count {} is {} and no longer accepts items",
                                count.count_number,
                                status.as_str()
                            )));
                        }

                        let item = InventoryItem::find_by_id(entry.item_id)
                            .one(txn)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!(
                                    "inventory item {} not found",
                                    entry.item_id
                                ))
                            })?;
                        if !item.is_active() {
                            return Err(ServiceError::ValidationError(format!(
                                "inventory item {} is archived and cannot be counted",
                                item.sku
                            )));
                        }

                        let now = Utc::now();
                        let existing = StockCountItem::find()
                            .filter(stock_count_item::Column::StockCountId.eq(count_id))
                            .filter(stock_count_item::Column::ItemId.eq(entry.item_id))
                            .one(txn)
                            .await?;

                        let row = match existing {
                            Some(row) => {
                                // The snapshot stays frozen on re-entry.
                                let system_quantity = row.system_quantity;
                                let mut active: stock_count_item::ActiveModel = row.into();
                                active.counted_quantity = Set(entry.counted_quantity);
                                active.variance = Set(entry.counted_quantity - system_quantity);
                                active.counted_by = Set(entry.counted_by);
                                active.notes = Set(entry.notes.clone());
                                active.updated_at = Set(now);
                                active.update(txn).await?
                            }
                            None => {
                                let system_quantity = StockLevel::find()
                                    .filter(stock_level::Column::ItemId.eq(entry.item_id))
                                    .filter(
                                        stock_level::Column::WarehouseId.eq(count.warehouse_id),
                                    )
                                    .one(txn)
                                    .await?
                                    .map(|l| l.quantity)
                                    .unwrap_or(0);

                                stock_count_item::ActiveModel {
                                    id: Set(Uuid::new_v4()),
                                    stock_count_id: Set(count_id),
                                    item_id: Set(entry.item_id),
                                    system_quantity: Set(system_quantity),
                                    counted_quantity: Set(entry.counted_quantity),
                                    variance: Set(entry.counted_quantity - system_quantity),
                                    counted_by: Set(entry.counted_by),
                                    notes: Set(entry.notes.clone()),
                                    created_at: Set(now),
                                    updated_at: Set(now),
                                }
                                .insert(txn)
                                .await?
                            }
                        };

                        let count = recompute_aggregates(txn, count).await?;
                        Ok((count, row))
                    })
                },
            )
            .await
            .map_err(ServiceError::from)?;

        Ok(result)
    }

    /// Advances the count along scheduled → in_progress → pending_review →
    /// approved → completed (or to cancelled), stamping the actor at each
    /// gate. Completion posts one `adjustment` movement per nonzero
    /// variance and fails wholesale if any snapshot went stale.
    #[instrument(skip(self))]
    pub async fn advance(
        &self,
        count_id: Uuid,
        to: StockCountStatus,
        actor: Option<Uuid>,
    ) -> Result<stock_count::Model, ServiceError> {
        if to == StockCountStatus::Completed {
            return self.complete(count_id, actor).await;
        }

        let count = self
            .db
            .transaction::<_, stock_count::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let count = load_count(txn, count_id).await?;
                    let from = count_status_of(&count)?;
                    check_transition(&count, from, to)?;

                    let now = Utc::now();
                    let mut active: stock_count::ActiveModel = count.into();
                    active.status = Set(to.as_str().to_string());
                    active.updated_at = Set(now);
                    match to {
                        StockCountStatus::InProgress => active.started_at = Set(Some(now)),
                        StockCountStatus::PendingReview => active.reviewed_by = Set(actor),
                        StockCountStatus::Approved => active.approved_by = Set(actor),
                        _ => {}
                    }
                    Ok(active.update(txn).await?)
                })
            })
            .await
            .map_err(ServiceError::from)?;

        Ok(count)
    }

    pub async fn get_count(
        &self,
        count_id: Uuid,
    ) -> Result<(stock_count::Model, Vec<stock_count_item::Model>), ServiceError> {
        let count = load_count(&*self.db, count_id).await?;
        let items = StockCountItem::find()
            .filter(stock_count_item::Column::StockCountId.eq(count_id))
            .order_by_asc(stock_count_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok((count, items))
    }

    /// Completion: approved → completed, one adjustment per discrepancy.
    async fn complete(
        &self,
        count_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<stock_count::Model, ServiceError> {
        // Pre-read outside the transaction only to know which level locks
        // to take; everything is re-validated under the locks.
        let count = load_count(&*self.db, count_id).await?;
        let warehouse_id = count.warehouse_id;
        let discrepant = StockCountItem::find()
            .filter(stock_count_item::Column::StockCountId.eq(count_id))
            .filter(stock_count_item::Column::Variance.ne(0))
            .all(&*self.db)
            .await?;

        let keys: Vec<(Uuid, Uuid)> = discrepant
            .iter()
            .map(|row| (row.item_id, warehouse_id))
            .collect();
        let _guards = self.inventory.lock_levels(&keys).await?;

        let (count, adjustments) = self
            .db
            .transaction::<_, (stock_count::Model, usize), ServiceError>(move |txn| {
                Box::pin(async move {
                    let count = load_count(txn, count_id).await?;
                    let from = count_status_of(&count)?;
                    check_transition(&count, from, StockCountStatus::Completed)?;

                    let rows = StockCountItem::find()
                        .filter(stock_count_item::Column::StockCountId.eq(count_id))
                        .filter(stock_count_item::Column::Variance.ne(0))
                        .all(txn)
                        .await?;

                    for row in &rows {
                        let live = StockLevel::find()
                            .filter(stock_level::Column::ItemId.eq(row.item_id))
                            .filter(stock_level::Column::WarehouseId.eq(count.warehouse_id))
                            .one(txn)
                            .await?
                            .map(|l| l.quantity)
                            .unwrap_or(0);
                        if live != row.system_quantity {
                            return Err(ServiceError::PreconditionFailed(format!(
                                "stock for item {} moved since count {} was taken \
                                 (snapshot {}, now {}); recount before completing",
                                row.item_id, count.count_number, row.system_quantity, live
                            )));
                        }

                        apply_movement(
                            txn,
                            &NewMovement {
                                item_id: row.item_id,
                                warehouse_id: count.warehouse_id,
                                quantity: row.variance,
                                movement_type: MovementType::Adjustment,
                                reason: Some(format!(
                                    "stock count {} reconciliation",
                                    count.count_number
                                )),
                                reference: Some((ReferenceType::StockCount, count.id)),
                                performed_by: actor,
                            },
                        )
                        .await?;
                    }

                    let now = Utc::now();
                    let adjustments = rows.len();
                    let mut active: stock_count::ActiveModel = count.into();
                    active.status = Set(StockCountStatus::Completed.as_str().to_string());
                    active.adjusted_by = Set(actor);
                    active.completed_at = Set(Some(now));
                    active.updated_at = Set(now);
                    let count = active.update(txn).await?;

                    Ok((count, adjustments))
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(count = %count.count_number, adjustments, "stock count completed");
        self.event_sender.send_or_log(Event::StockCountCompleted {
            stock_count_id: count.id,
            adjustments,
        });

        Ok(count)
    }
}

async fn load_count<C: ConnectionTrait>(
    conn: &C,
    count_id: Uuid,
) -> Result<stock_count::Model, ServiceError> {
    StockCount::find_by_id(count_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("stock count {} not found", count_id)))
}

fn count_status_of(count: &stock_count::Model) -> Result<StockCountStatus, ServiceError> {
    count.count_status().ok_or_else(|| {
        ServiceError::InternalError(format!(
            "stock count {} has unrecognized status {}",
            count.count_number, count.status
        ))
    })
}

fn check_transition(
    count: &stock_count::Model,
    from: StockCountStatus,
    to: StockCountStatus,
) -> Result<(), ServiceError> {
    if !from.can_transition_to(to) {
        return Err(ServiceError::InvalidTransition(format!(
            "stock count {} cannot move from {} to {}",
            count.count_number,
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}

/// Header aggregates are denormalized from the child rows and recomputed
/// here inside every transaction that touches them.
async fn recompute_aggregates<C: ConnectionTrait>(
    conn: &C,
    count: stock_count::Model,
) -> Result<stock_count::Model, ServiceError> {
    let children = StockCountItem::find()
        .filter(stock_count_item::Column::StockCountId.eq(count.id))
        .all(conn)
        .await?;

    let item_ids: Vec<Uuid> = children.iter().map(|c| c.item_id).collect();
    let costs: HashMap<Uuid, Decimal> = InventoryItem::find()
        .filter(inventory_item::Column::Id.is_in(item_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|item| (item.id, item.unit_cost))
        .collect();

    let total_items = children.len() as i32;
    let discrepancies = children.iter().filter(|c| c.variance != 0).count() as i32;
    let total_value_difference: Decimal = children
        .iter()
        .map(|c| {
            Decimal::from(c.variance) * costs.get(&c.item_id).copied().unwrap_or(Decimal::ZERO)
        })
        .sum();

    let mut active: stock_count::ActiveModel = count.into();
    active.total_items = Set(total_items);
    active.discrepancies = Set(discrepancies);
    active.total_value_difference = Set(total_value_difference);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}
