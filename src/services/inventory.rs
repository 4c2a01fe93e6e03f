use std::{sync::Arc, time::Duration};

use chrono::Utc;
use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        inventory_item::Entity as InventoryItem,
        stock_level::{self, Entity as StockLevel},
        stock_movement::{self, Entity as StockMovement, MovementType, ReferenceType},
        warehouse::Entity as Warehouse,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Identity of one stock level: (item, warehouse).
pub type LevelKey = (Uuid, Uuid);

/// A movement to append to the stock ledger.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    /// Signed delta: positive for in/transfer_in, negative for
    /// out/transfer_out, either nonzero sign for adjustment.
    pub quantity: i32,
    pub movement_type: MovementType,
    pub reason: Option<String>,
    pub reference: Option<(ReferenceType, Uuid)>,
    pub performed_by: Option<Uuid>,
}

/// A successfully applied movement plus the level it updated.
#[derive(Debug, Clone)]
pub struct PostedMovement {
    pub level: stock_level::Model,
    pub movement: stock_movement::Model,
}

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub outbound: PostedMovement,
    pub inbound: PostedMovement,
}

/// The inventory stock ledger.
///
/// `stock_movements` is the system of record; `stock_levels` is a derived
/// cache updated only here, in the same transaction as the movement append.
/// Writes hold an exclusive in-process lock per (item, warehouse); multi-key
/// operations acquire locks in ascending key order so concurrent transfers
/// touching the same pair in opposite directions cannot deadlock.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    level_locks: Arc<DashMap<LevelKey, Arc<Mutex<()>>>>,
    lock_wait: Duration,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, lock_wait: Duration) -> Self {
        Self {
            db,
            event_sender,
            level_locks: Arc::new(DashMap::new()),
            lock_wait,
        }
    }

    pub(crate) async fn lock_level(
        &self,
        key: LevelKey,
    ) -> Result<OwnedMutexGuard<()>, ServiceError> {
        let cell = self.level_locks.entry(key).or_default().value().clone();
        timeout(self.lock_wait, cell.lock_owned()).await.map_err(|_| {
            ServiceError::ConcurrencyConflict(format!(
                "timed out waiting for stock lock on item {} in warehouse {}",
                key.0, key.1
            ))
        })
    }

    /// Acquire locks for several levels, sorted and deduplicated so every
    /// caller takes them in the same canonical order.
    pub(crate) async fn lock_levels(
        &self,
        keys: &[LevelKey],
    ) -> Result<Vec<OwnedMutexGuard<()>>, ServiceError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.lock_level(key).await?);
        }
        Ok(guards)
    }

    /// Appends one movement and updates the derived level, creating the
    /// level row at zero if absent. Rejects any delta that would take the
    /// level negative.
    #[instrument(skip(self, new), fields(item_id = %new.item_id, warehouse_id = %new.warehouse_id, quantity = new.quantity))]
    pub async fn post_movement(&self, new: NewMovement) -> Result<PostedMovement, ServiceError> {
        let _guard = self.lock_level((new.item_id, new.warehouse_id)).await?;

        let posted = self
            .db
            .transaction::<_, PostedMovement, ServiceError>(move |txn| {
                Box::pin(async move { apply_movement(txn, &new).await })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::StockMovementPosted {
            movement_id: posted.movement.id,
            item_id: posted.movement.item_id,
            warehouse_id: posted.movement.warehouse_id,
            quantity: posted.movement.quantity,
            movement_type: posted.movement.movement_type.clone(),
            new_quantity: posted.level.quantity,
        });

        Ok(posted)
    }

    /// Moves stock between two warehouses as two coupled movements
    /// (source `transfer_out`, destination `transfer_in`) sharing one
    /// reference id, committed as a single unit.
    #[instrument(skip(self, reason))]
    pub async fn transfer(
        &self,
        item_id: Uuid,
        from_warehouse_id: Uuid,
        to_warehouse_id: Uuid,
        quantity: i32,
        reason: Option<String>,
        performed_by: Option<Uuid>,
    ) -> Result<TransferResult, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "transfer quantity must be positive".to_string(),
            ));
        }
        if from_warehouse_id == to_warehouse_id {
            return Err(ServiceError::ValidationError(
                "transfer source and destination warehouses must differ".to_string(),
            ));
        }

        let _guards = self
            .lock_levels(&[(item_id, from_warehouse_id), (item_id, to_warehouse_id)])
            .await?;

        // One reference id couples the two rows of a transfer.
        let transfer_id = Uuid::new_v4();
        let result = self
            .db
            .transaction::<_, TransferResult, ServiceError>(move |txn| {
                Box::pin(async move {
                    let outbound = apply_movement(
                        txn,
                        &NewMovement {
                            item_id,
                            warehouse_id: from_warehouse_id,
                            quantity: -quantity,
                            movement_type: MovementType::TransferOut,
                            reason: reason.clone(),
                            reference: Some((ReferenceType::Transfer, transfer_id)),
                            performed_by,
                        },
                    )
                    .await?;

                    let inbound = apply_movement(
                        txn,
                        &NewMovement {
                            item_id,
                            warehouse_id: to_warehouse_id,
                            quantity,
                            movement_type: MovementType::TransferIn,
                            reason,
                            reference: Some((ReferenceType::Transfer, transfer_id)),
                            performed_by,
                        },
                    )
                    .await?;

                    Ok(TransferResult { outbound, inbound })
                })
            })
            .await
            .map_err(ServiceError::from)?;

        self.event_sender.send_or_log(Event::StockTransferred {
            item_id,
            from_warehouse_id,
            to_warehouse_id,
            quantity,
        });

        Ok(result)
    }

    /// Lock-free read of the current level; `None` means no movements have
    /// ever touched this (item, warehouse).
    pub async fn get_stock_level(
        &self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<stock_level::Model>, ServiceError> {
        let level = StockLevel::find()
            .filter(stock_level::Column::ItemId.eq(item_id))
            .filter(stock_level::Column::WarehouseId.eq(warehouse_id))
            .one(&*self.db)
            .await?;
        Ok(level)
    }

    /// Paginated movement history for one level, newest first.
    pub async fn list_movements(
        &self,
        item_id: Uuid,
        warehouse_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let paginator = StockMovement::find()
            .filter(stock_movement::Column::ItemId.eq(item_id))
            .filter(stock_movement::Column::WarehouseId.eq(warehouse_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await?;
        let movements = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((movements, total))
    }
}

/// The core posting step, callable inside a caller-owned transaction so
/// orchestrations (repair completion, count reconciliation, PO receiving)
/// commit their movements together with their own writes. Callers must hold
/// the corresponding level locks.
pub(crate) async fn apply_movement<C: ConnectionTrait>(
    conn: &C,
    new: &NewMovement,
) -> Result<PostedMovement, ServiceError> {
    validate_delta(new.movement_type, new.quantity)?;

    let item = InventoryItem::find_by_id(new.item_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("inventory item {} not found", new.item_id))
        })?;
    if !item.is_active() {
        return Err(ServiceError::ValidationError(format!(
            "inventory item {} is archived and cannot move stock",
            item.sku
        )));
    }

    Warehouse::find_by_id(new.warehouse_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("warehouse {} not found", new.warehouse_id))
        })?;

    let now = Utc::now();
    let existing = StockLevel::find()
        .filter(stock_level::Column::ItemId.eq(new.item_id))
        .filter(stock_level::Column::WarehouseId.eq(new.warehouse_id))
        .one(conn)
        .await?;

    let current = existing.as_ref().map(|l| l.quantity).unwrap_or(0);
    let next = current + new.quantity;
    if next < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "insufficient stock for item {}: have {}, need {}",
            item.sku,
            current,
            new.quantity.unsigned_abs()
        )));
    }

    let level = match existing {
        Some(level) => {
            let mut active: stock_level::ActiveModel = level.into();
            active.quantity = Set(next);
            active.updated_at = Set(now);
            active.update(conn).await?
        }
        None => {
            stock_level::ActiveModel {
                id: Set(Uuid::new_v4()),
                item_id: Set(new.item_id),
                warehouse_id: Set(new.warehouse_id),
                quantity: Set(next),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?
        }
    };

    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        item_id: Set(new.item_id),
        warehouse_id: Set(new.warehouse_id),
        quantity: Set(new.quantity),
        movement_type: Set(new.movement_type.as_str().to_string()),
        reason: Set(new.reason.clone()),
        reference_type: Set(new.reference.map(|(kind, _)| kind.as_str().to_string())),
        reference_id: Set(new.reference.map(|(_, id)| id)),
        performed_by: Set(new.performed_by),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    info!(
        item = %item.sku,
        warehouse = %new.warehouse_id,
        delta = new.quantity,
        quantity = level.quantity,
        "stock movement posted"
    );

    Ok(PostedMovement { level, movement })
}

fn validate_delta(movement_type: MovementType, quantity: i32) -> Result<(), ServiceError> {
    if quantity == 0 {
        return Err(ServiceError::ValidationError(
            "movement quantity must be nonzero".to_string(),
        ));
    }

    let sign_ok = match movement_type {
        MovementType::In | MovementType::TransferIn => quantity > 0,
        MovementType::Out | MovementType::TransferOut => quantity < 0,
        MovementType::Adjustment => true,
    };
    if !sign_ok {
        return Err(ServiceError::ValidationError(format!(
            "movement type {} requires a {} quantity",
            movement_type.as_str(),
            if quantity > 0 { "negative" } else { "positive" }
        )));
    }
    Ok(())
}
